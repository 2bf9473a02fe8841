//! # Sparse Filter Kernels
//!
//! The three passes needed to train a sparse spatial filter layer:
//!
//! - [`cpu::update_output`] — forward activation
//! - [`cpu::update_grad_input`] — gradient w.r.t. the input batch
//! - [`cpu::acc_grad_parameters`] — gradient w.r.t. weight and bias
//!
//! All three are independent entry points. They share the geometry resolver in
//! [`crate::geometry`] and the same offset-driven gather/scatter walk, and
//! differ only in which buffer is read and which is written.
//!
//! ## Notes
//!
//! - Operands are validated up front; a shape violation returns an error and
//!   leaves every destination buffer untouched.
//! - Destination buffers are partitioned across `rayon` workers so that no two
//!   workers write the same element. There are no locks or atomics.

pub mod cpu;
