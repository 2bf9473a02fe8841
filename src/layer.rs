//! The sparse filter layer module.
//!
//! [`SparseFilterConv`] owns a layer's parameters and the reusable output and
//! input-gradient buffers, and forwards each training-step call to the
//! kernels in [`crate::ops::cpu`]. Buffers are resized on demand when the
//! incoming batch shape changes.
//!
//! ```rust
//! use sparse_filter::config::SparseFilterConfig;
//! use sparse_filter::layer::SparseFilterConv;
//! use sparse_filter::tensors::Tensor;
//!
//! # fn main() -> sparse_filter::Result<()> {
//! let mut layer = SparseFilterConv::new(SparseFilterConfig::new(2, 3, 4).seed(1))?;
//! let input = Tensor::new(vec![1, 2, 5, 5], vec![1.0; 50]);
//! let grad_output = Tensor::new(vec![1, 3, 5, 5], vec![0.1; 75]);
//!
//! assert_eq!(layer.update_output(&input)?.shape, vec![1, 3, 5, 5]);
//! layer.backward(&input, &grad_output, None)?;
//! layer.update_parameters(0.01);
//! # Ok(())
//! # }
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::SparseFilterConfig;
use crate::error::Result;
use crate::geometry::{Geometry, LayerDims, Offset, ValidRegion};
use crate::ops::cpu::{self, DEFAULT_SCALE};
use crate::tensors::{sgd, Tensor, WithGrad};

/// A learned sparse spatial filter layer.
#[derive(Debug, Clone)]
pub struct SparseFilterConv {
    config: SparseFilterConfig,
    /// `[O, I, S]`
    pub weight: WithGrad<Tensor<f32>>,
    /// `[O]`
    pub bias: WithGrad<Tensor<f32>>,
    /// `[O, S, 2]` of `(dy, dx)`
    pub offsets: Tensor<i32>,
    /// Result of the last [`Self::update_output`].
    pub output: Tensor<f32>,
    /// Result of the last [`Self::update_grad_input`].
    pub grad_input: Tensor<f32>,
}

impl SparseFilterConv {
    /// Builds a layer and initialises its parameters with [`Self::reset`].
    ///
    /// # Errors
    /// Returns an error if `config` fails validation.
    pub fn new(config: SparseFilterConfig) -> Result<Self> {
        config.check()?;
        let dims = config.dims();
        let mut layer = Self {
            weight: WithGrad::new(Tensor::zeros(dims.weight_shape())),
            bias: WithGrad::new(Tensor::zeros(dims.bias_shape())),
            offsets: Tensor::zeros(dims.offsets_shape()),
            output: Tensor::zeros(Vec::new()),
            grad_input: Tensor::zeros(Vec::new()),
            config,
        };
        layer.reset();
        Ok(layer)
    }

    /// Builds a layer around existing parameters.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid or a parameter's shape does not
    /// match the configured dimensions.
    pub fn with_parameters(
        config: SparseFilterConfig,
        weight: Tensor<f32>,
        bias: Tensor<f32>,
        offsets: Tensor<i32>,
    ) -> Result<Self> {
        config.check()?;
        let dims = config.dims();
        weight.expect_shape("weight", &dims.weight_shape())?;
        bias.expect_shape("bias", &dims.bias_shape())?;
        offsets.expect_shape("offsets", &dims.offsets_shape())?;
        Ok(Self {
            weight: WithGrad::new(weight),
            bias: WithGrad::new(bias),
            offsets,
            output: Tensor::zeros(Vec::new()),
            grad_input: Tensor::zeros(Vec::new()),
            config,
        })
    }

    pub fn dims(&self) -> LayerDims {
        self.config.dims()
    }

    /// Re-initialises weight, bias and offsets.
    ///
    /// Weight and bias are drawn uniformly from `±1/sqrt(I * S)`. Each offset
    /// is a uniformly chosen cell of the dilated sampling window centred on the
    /// output pixel. A seeded configuration reproduces the same parameters.
    pub fn reset(&mut self) {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let dims = self.dims();
        let stdv = 1.0 / ((dims.input_planes * dims.samples) as f32).sqrt();

        for w in &mut self.weight.value.data {
            *w = rng.random_range(-stdv..=stdv);
        }
        for b in &mut self.bias.value.data {
            *b = rng.random_range(-stdv..=stdv);
        }

        let SparseFilterConfig {
            kernel_h,
            kernel_w,
            dilation_h,
            dilation_w,
            ..
        } = self.config;
        for pair in self.offsets.data.chunks_exact_mut(2) {
            pair[0] = window_offset(rng.random_range(0..kernel_h), kernel_h, dilation_h);
            pair[1] = window_offset(rng.random_range(0..kernel_w), kernel_w, dilation_w);
        }

        self.zero_grad_parameters();
        debug!(?dims, kernel_h, kernel_w, dilation_h, dilation_w, "sparse filter reset");
    }

    /// Forward pass. The result is kept in `self.output`.
    ///
    /// # Errors
    /// Returns an error if `input` is not a `[B, I, H, W]` batch.
    pub fn update_output(&mut self, input: &Tensor<f32>) -> Result<&Tensor<f32>> {
        let dims = self.dims();
        let geometry = Geometry::for_forward(
            dims,
            input,
            &self.weight.value,
            &self.bias.value,
            &self.offsets,
        )?;

        let uncovered = self.uncovered_planes(geometry.height, geometry.width);
        if !uncovered.is_empty() {
            warn!(
                ?uncovered,
                height = geometry.height,
                width = geometry.width,
                "output planes with no in-bounds sample produce bias only"
            );
        }

        self.output.resize(&geometry.output_shape());
        cpu::update_output(
            dims,
            input,
            &self.weight.value,
            &self.bias.value,
            &self.offsets,
            &mut self.output,
        )?;
        Ok(&self.output)
    }

    /// Input-gradient pass. The result is kept in `self.grad_input`.
    ///
    /// # Errors
    /// Returns an error if `grad_output` does not match `input`.
    pub fn update_grad_input(
        &mut self,
        input: &Tensor<f32>,
        grad_output: &Tensor<f32>,
    ) -> Result<&Tensor<f32>> {
        let dims = self.dims();
        let geometry =
            Geometry::for_grad_input(dims, input, grad_output, &self.weight.value, &self.offsets)?;

        self.grad_input.resize(&geometry.input_shape());
        cpu::update_grad_input(
            dims,
            input,
            grad_output,
            &self.weight.value,
            &self.offsets,
            &mut self.grad_input,
        )?;
        Ok(&self.grad_input)
    }

    /// Parameter-gradient pass into `weight.grad` and `bias.grad`.
    ///
    /// `scale` defaults to `1.0`. Gradients are replaced, not added to.
    ///
    /// # Errors
    /// Returns an error if `grad_output` does not match `input`.
    pub fn acc_grad_parameters(
        &mut self,
        input: &Tensor<f32>,
        grad_output: &Tensor<f32>,
        scale: Option<f32>,
    ) -> Result<()> {
        cpu::acc_grad_parameters(
            self.dims(),
            input,
            grad_output,
            &self.offsets,
            &mut self.weight.grad,
            &mut self.bias.grad,
            scale.unwrap_or(DEFAULT_SCALE),
        )
    }

    /// Runs both gradient passes and returns the input gradient.
    ///
    /// # Errors
    /// Returns an error if `grad_output` does not match `input`.
    pub fn backward(
        &mut self,
        input: &Tensor<f32>,
        grad_output: &Tensor<f32>,
        scale: Option<f32>,
    ) -> Result<&Tensor<f32>> {
        self.acc_grad_parameters(input, grad_output, scale)?;
        self.update_grad_input(input, grad_output)
    }

    pub fn zero_grad_parameters(&mut self) {
        self.weight.grad.data.fill(0.0);
        self.bias.grad.data.fill(0.0);
    }

    /// Plain SGD step on weight and bias; gradients are reset afterwards.
    ///
    /// Offsets are integer positions and are not updated.
    pub fn update_parameters(&mut self, lr: f32) {
        sgd(&mut self.weight, lr);
        sgd(&mut self.bias, lr);
    }

    /// Output planes none of whose samples land inside a `height x width` image.
    ///
    /// Such planes output only their bias.
    pub fn uncovered_planes(&self, height: usize, width: usize) -> Vec<usize> {
        let samples = self.dims().samples;
        self.offsets
            .data
            .chunks_exact(samples * 2)
            .enumerate()
            .filter(|(_, table)| {
                (0..samples).all(|s| {
                    ValidRegion::new(Offset::from_table(table, samples, 0, s), height, width)
                        .is_empty()
                })
            })
            .map(|(o, _)| o)
            .collect()
    }
}

/// Offset of window cell `cell`, measured from the window centre in steps of `dilation`.
fn window_offset(cell: usize, kernel: usize, dilation: usize) -> i32 {
    let centred = cell as i64 - (kernel / 2) as i64;
    // windows are validated to fit the i32 range
    (centred * dilation as i64) as i32
}
