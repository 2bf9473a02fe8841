//! sparse_filter: a learned sparse spatial filter layer for CPU training.
//!
//! A sparse filter is a convolution-like layer in which each output plane,
//! instead of a dense `kH x kW` window, samples a small learned set of integer
//! offsets `(dy, dx)` from every input plane. The offsets of an output plane
//! are shared by all input planes; only the weight differs per input plane.
//!
//! # Features
//!
//! - Forward, input-gradient and parameter-gradient kernels over row-major
//!   `f32` buffers, parallelised with `rayon`.
//! - Implicit zero padding: output has the input's spatial size, and samples
//!   falling outside the image contribute nothing.
//! - A layer module with parameter initialisation and an SGD step.
//! - A closure-style autograd entry point.
//!
//! # Modules
//!
//! - [`tensors`] — Tensor container, gradient wrapper, SGD update.
//! - [`geometry`] — Shape validation and per-sample valid regions.
//! - [`ops`] — The three CPU kernels.
//! - [`config`] — Layer configuration.
//! - [`layer`] — The [`SparseFilterConv`] module.
//! - [`backprop`] — Forward value plus backward closure.
//!
//! # Example
//!
//! ```rust
//! use sparse_filter::{tensor, LayerDims};
//! use sparse_filter::ops::cpu::update_output;
//! use sparse_filter::tensors::Tensor;
//!
//! let input: Tensor<f32> = tensor!([[[[5.0, 5.0], [5.0, 5.0]]]]);
//! let weight = tensor!([[[2.0]]]);
//! let bias = tensor!([1.0]);
//! let offsets = tensor!([[[0, 0]]]);
//! let mut output = Tensor::zeros(vec![1, 1, 2, 2]);
//!
//! update_output(LayerDims::new(1, 1, 1), &input, &weight, &bias, &offsets, &mut output).unwrap();
//! assert_eq!(output.data, vec![11.0; 4]);
//! ```

pub mod backprop;
pub mod config;
pub mod error;
pub mod geometry;
pub mod layer;
pub mod ops;
pub mod tensors;

pub use config::SparseFilterConfig;
pub use error::{Error, Result};
pub use geometry::LayerDims;
pub use layer::SparseFilterConv;
