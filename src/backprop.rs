//! Differentiable sparse filter in closure form.
//!
//! # Autograd Pattern
//!
//! 1. **Inputs** are the input batch plus the layer parameters as `WithGrad` tensors.
//! 2. **Forward Pass** computes the output batch.
//! 3. **Backward Pass** is a closure that, given `dL/d(out)`, returns
//!    `(dL/d(input), dL/d(weight), dL/d(bias))`.
//!
//! Use this when composing the filter with other closure-style operations;
//! use [`crate::layer::SparseFilterConv`] when a reusable module is wanted.

use crate::error::{Error, Result};
use crate::geometry::LayerDims;
use crate::ops::cpu::{self, DEFAULT_SCALE};
use crate::tensors::{Tensor, WithGrad};

/// `(grad_input, grad_weight, grad_bias)`
pub type SparseFilterGrads = (Tensor<f32>, Tensor<f32>, Tensor<f32>);

/// Applies the sparse filter to `input`.
///
/// # Returns
/// - Output tensor `[B, O, H, W]`
/// - Backward closure mapping `dL/d(out)` to the three gradients
///
/// # Errors
/// Returns an error if `weight` is not `[O, I, S]` or any other operand
/// disagrees with it. The closure errors if `dL/d(out)` has the wrong shape.
///
/// # Example
/// ```rust
/// use sparse_filter::backprop::sparse_filter;
/// use sparse_filter::tensors::{Tensor, WithGrad};
///
/// let input = Tensor::new(vec![1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
/// let weight = WithGrad::new(Tensor::new(vec![1, 1, 1], vec![3.0]));
/// let bias = WithGrad::new(Tensor::new(vec![1], vec![0.0]));
/// let offsets = Tensor::new(vec![1, 1, 2], vec![0, 0]);
///
/// let (out, back) = sparse_filter(&input, &weight, &bias, &offsets).unwrap();
/// assert_eq!(out.data, vec![3.0, 6.0, 9.0, 12.0]);
///
/// let (grad_input, grad_weight, grad_bias) = back(&Tensor::new(vec![1, 1, 2, 2], vec![1.0; 4])).unwrap();
/// assert_eq!(grad_input.data, vec![3.0; 4]);
/// assert_eq!(grad_weight.data, vec![10.0]);
/// assert_eq!(grad_bias.data, vec![4.0]);
/// ```
pub fn sparse_filter<'a>(
    input: &'a Tensor<f32>,
    weight: &'a WithGrad<Tensor<f32>>,
    bias: &'a WithGrad<Tensor<f32>>,
    offsets: &'a Tensor<i32>,
) -> Result<(
    Tensor<f32>,
    impl Fn(&Tensor<f32>) -> Result<SparseFilterGrads> + 'a,
)> {
    let dims = match weight.value.shape.as_slice() {
        &[o, i, s] => LayerDims::new(o, i, s),
        _ => {
            return Err(Error::Rank {
                name: "weight",
                expected: 3,
                got: weight.value.shape.clone(),
            });
        }
    };

    let mut out = match input.shape.as_slice() {
        &[b, _, h, w] => Tensor::zeros(vec![b, dims.output_planes, h, w]),
        _ => {
            return Err(Error::Rank {
                name: "input",
                expected: 4,
                got: input.shape.clone(),
            });
        }
    };
    cpu::update_output(dims, input, &weight.value, &bias.value, offsets, &mut out)?;

    let back = move |grad_output: &Tensor<f32>| -> Result<SparseFilterGrads> {
        let mut grad_input = Tensor::zeros(input.shape.clone());
        let mut grad_weight = Tensor::zeros(dims.weight_shape());
        let mut grad_bias = Tensor::zeros(dims.bias_shape());

        cpu::update_grad_input(dims, input, grad_output, &weight.value, offsets, &mut grad_input)?;
        cpu::acc_grad_parameters(
            dims,
            input,
            grad_output,
            offsets,
            &mut grad_weight,
            &mut grad_bias,
            DEFAULT_SCALE,
        )?;

        Ok((grad_input, grad_weight, grad_bias))
    };

    Ok((out, back))
}
