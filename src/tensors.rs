//! Core tensor container shared by the kernels and the layer.
//!
//! # Tensor Utilities
//!
//! The kernels operate on caller-owned, contiguous, row-major buffers. This
//! module provides the minimal owned container for them:
//! - Construction of N-dimensional tensors with shape and row-major data layout
//! - Zero-filled allocation for destination and gradient buffers
//! - `WithGrad` wrappers pairing a parameter with its gradient
//! - SGD-style parameter updates
//! - The `tensor!` macro for literal tensors
//!
//! ## Limitations
//! - Row-major only
//! - No broadcasting, slicing, or strides
//!
//! ## Example
//!
//! ```rust
//! use sparse_filter::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! ```

use crate::error::{Error, Result};

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - `shape` defines the structure, e.g. `[B, C, H, W]` for an image batch.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Checks that `data` holds exactly as many elements as `shape` describes.
    ///
    /// The fields are public, so a tensor built by hand can disagree with itself.
    pub(crate) fn expect_consistent(&self, name: &'static str) -> Result<()> {
        let len = self.shape.iter().product::<usize>();
        if self.data.len() != len {
            return Err(Error::ShapeMismatch {
                name,
                expected: vec![len],
                got: vec![self.data.len()],
            });
        }
        Ok(())
    }

    /// Checks that the tensor has exactly `shape` and matching data.
    pub(crate) fn expect_shape(&self, name: &'static str, shape: &[usize]) -> Result<()> {
        if self.shape != shape {
            return Err(Error::ShapeMismatch {
                name,
                expected: shape.to_vec(),
                got: self.shape.clone(),
            });
        }
        self.expect_consistent(name)
    }
}

impl<T: Clone + Default> Tensor<T> {
    /// Creates a tensor of `shape` filled with `T::default()`.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![T::default(); len],
        }
    }

    /// Reshapes in place to `shape`, reallocating only when the shape changes.
    ///
    /// Contents are unspecified afterwards; callers overwrite them.
    pub fn resize(&mut self, shape: &[usize]) {
        if self.shape != shape {
            *self = Self::zeros(shape);
        }
    }
}

/// A container for tracking gradients of values.
///
/// Used as `WithGrad<Tensor<f32>>` for the layer's weight and bias.
#[derive(Debug, Clone)]
pub struct WithGrad<T> {
    pub value: T,
    pub grad: T,
}

impl<T: Clone + Default> WithGrad<Tensor<T>> {
    /// Wraps `value` with a zeroed gradient of the same shape.
    pub fn new(value: Tensor<T>) -> Self {
        let grad = Tensor::zeros(value.shape.clone());
        Self { value, grad }
    }
}

/// Performs SGD update in-place: `param -= lr * grad`, resets gradient to 0.0.
///
/// # Panics
/// Panics if shapes of `value` and `grad` mismatch.
pub fn sgd(w: &mut WithGrad<Tensor<f32>>, lr: f32) {
    assert_eq!(w.value.shape, w.grad.shape, "parameter/gradient shape mismatch");
    for (w_i, g_i) in w.value.data.iter_mut().zip(&w.grad.data) {
        *w_i -= lr * *g_i;
    }
    w.grad.data.fill(0.0);
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use sparse_filter::tensor;
/// let t: sparse_filter::tensors::Tensor<f32> = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = children[0].shape.clone();
        assert!(children.iter().all(|c| c.shape == first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(&first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}
