//! Parallel CPU sparse filter kernels
//!
//! # CPU Backend
//!
//! Reference implementations of the forward, input-gradient and
//! parameter-gradient passes. Each entry point validates its operands, then
//! runs a data-parallel loop over a dimension that partitions the destination
//! buffer:
//!
//! | Pass                    | Parallel over  | Worker owns                     |
//! |-------------------------|----------------|---------------------------------|
//! | [`update_output`]       | batch          | `output[b, .., .., ..]`         |
//! | [`update_grad_input`]   | batch          | `grad_input[b, .., .., ..]`     |
//! | [`acc_grad_parameters`] | output plane   | `grad_weight[o, .., ..]`, `grad_bias[o]` |
//!
//! Within a worker the summation order is fixed (output plane, sample, input
//! plane, row, column), so results do not depend on scheduling.
//!
//! ## Example
//!
//! ```rust
//! use sparse_filter::geometry::LayerDims;
//! use sparse_filter::ops::cpu::update_output;
//! use sparse_filter::tensors::Tensor;
//!
//! let dims = LayerDims::new(1, 1, 1);
//! let input = Tensor::new(vec![1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
//! let weight = Tensor::new(vec![1, 1, 1], vec![2.0]);
//! let bias = Tensor::new(vec![1], vec![0.5]);
//! let offsets = Tensor::new(vec![1, 1, 2], vec![0, 1]);
//! let mut output = Tensor::zeros(vec![1, 1, 2, 2]);
//!
//! update_output(dims, &input, &weight, &bias, &offsets, &mut output).unwrap();
//! assert_eq!(output.data, vec![4.5, 0.5, 8.5, 0.5]);
//! ```

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::error::Result;
use crate::geometry::{Geometry, LayerDims, ValidRegion};
use crate::tensors::Tensor;

/// Scale applied by [`acc_grad_parameters`] when the caller has none.
pub const DEFAULT_SCALE: f32 = 1.0;

/// Computes the forward activation into `output`.
///
/// $$ out_{b,o,y,x} = bias_o + \\sum_i \\sum_s w_{o,i,s} \\cdot in_{b,i,y+dy_{o,s},x+dx_{o,s}} $$
///
/// Terms whose source pixel falls outside the image are dropped. Every element
/// of `output` is overwritten.
///
/// # Errors
/// Returns an error if any operand disagrees with `dims` or with the input
/// batch, including `output` not being `[B, O, H, W]`.
pub fn update_output(
    dims: LayerDims,
    input: &Tensor<f32>,
    weight: &Tensor<f32>,
    bias: &Tensor<f32>,
    offsets: &Tensor<i32>,
    output: &mut Tensor<f32>,
) -> Result<()> {
    let geometry = Geometry::for_forward(dims, input, weight, bias, offsets)?;
    output.expect_shape("output", &geometry.output_shape())?;
    log_pass("update_output", &geometry);

    if geometry.is_empty() {
        return Ok(());
    }

    let in_image = dims.input_planes * geometry.plane_len();
    let out_image = dims.output_planes * geometry.plane_len();

    output
        .data
        .par_chunks_mut(out_image)
        .zip(input.data.par_chunks(in_image))
        .for_each(|(out, inp)| {
            forward_image(&geometry, inp, &weight.data, &bias.data, &offsets.data, out);
        });

    Ok(())
}

/// Computes the gradient w.r.t. the input batch into `grad_input`.
///
/// This is the exact transpose of [`update_output`]: every weighted gather
/// `(y + dy, x + dx) -> (y, x)` becomes a scatter `(y, x) -> (y + dy, x + dx)`
/// under the same valid-region gate. The bias has no input gradient.
///
/// `grad_input` is zeroed before the scatter.
///
/// # Errors
/// Returns an error if `grad_output` does not match the input batch's size
/// and extent, or any operand disagrees with `dims`.
pub fn update_grad_input(
    dims: LayerDims,
    input: &Tensor<f32>,
    grad_output: &Tensor<f32>,
    weight: &Tensor<f32>,
    offsets: &Tensor<i32>,
    grad_input: &mut Tensor<f32>,
) -> Result<()> {
    let geometry = Geometry::for_grad_input(dims, input, grad_output, weight, offsets)?;
    grad_input.expect_shape("grad_input", &geometry.input_shape())?;
    log_pass("update_grad_input", &geometry);

    if geometry.is_empty() {
        return Ok(());
    }

    let in_image = dims.input_planes * geometry.plane_len();
    let out_image = dims.output_planes * geometry.plane_len();

    grad_input
        .data
        .par_chunks_mut(in_image)
        .zip(grad_output.data.par_chunks(out_image))
        .for_each(|(grad_in, grad_out)| {
            grad_input_image(&geometry, grad_out, &weight.data, &offsets.data, grad_in);
        });

    Ok(())
}

/// Computes the gradient w.r.t. weight and bias.
///
/// - `grad_weight[o, i, s] = scale * Σ_b Σ_{valid y, x} input[b, i, y+dy, x+dx] * grad_output[b, o, y, x]`
/// - `grad_bias[o] = Σ_b Σ_y Σ_x grad_output[b, o, y, x]`
///
/// The bias gradient sums `grad_output` over *every* pixel, including pixels
/// that no sample of plane `o` actually reaches. This approximation is kept
/// on purpose; changing it changes training dynamics.
///
/// Both destinations are zeroed first, so each call yields a fresh gradient
/// rather than adding to the previous step's.
///
/// # Errors
/// Returns an error if `grad_output` does not match the input batch, or the
/// gradient buffers are not `[O, I, S]` and `[O]`.
pub fn acc_grad_parameters(
    dims: LayerDims,
    input: &Tensor<f32>,
    grad_output: &Tensor<f32>,
    offsets: &Tensor<i32>,
    grad_weight: &mut Tensor<f32>,
    grad_bias: &mut Tensor<f32>,
    scale: f32,
) -> Result<()> {
    let geometry = Geometry::for_grad_parameters(dims, input, grad_output, offsets)?;
    grad_weight.expect_shape("grad_weight", &dims.weight_shape())?;
    grad_bias.expect_shape("grad_bias", &dims.bias_shape())?;
    log_pass("acc_grad_parameters", &geometry);

    let plane = geometry.plane_len();

    grad_bias
        .data
        .par_iter_mut()
        .enumerate()
        .for_each(|(o, gb)| {
            *gb = (0..geometry.batch)
                .map(|b| {
                    let base = (b * dims.output_planes + o) * plane;
                    grad_output.data[base..base + plane].iter().sum::<f32>()
                })
                .sum();
        });

    // one worker per output plane; batch and sample loops stay sequential
    // inside it so no two workers touch the same gradient cell
    grad_weight
        .data
        .par_chunks_mut(dims.input_planes * dims.samples)
        .enumerate()
        .for_each(|(o, gw)| {
            weight_grad_plane(&geometry, o, &input.data, &grad_output.data, &offsets.data, gw);
            if scale != 1.0 {
                gw.iter_mut().for_each(|g| *g *= scale);
            }
        });

    Ok(())
}

fn log_pass(pass: &'static str, geometry: &Geometry) {
    debug!(
        pass,
        batch = geometry.batch,
        input_planes = geometry.dims.input_planes,
        output_planes = geometry.dims.output_planes,
        samples = geometry.dims.samples,
        height = geometry.height,
        width = geometry.width,
        "sparse filter pass"
    );
}

/// `p + d`, where the valid region guarantees the result is an in-bounds index.
#[inline]
fn shift(p: usize, d: i32) -> usize {
    p.wrapping_add_signed(d as isize)
}

/// Visits every row of `region`, yielding the flat start index of the
/// destination span `(y, x_start)`, the flat start index of its shifted source
/// span, and the span length.
#[inline]
fn for_each_row(
    region: &ValidRegion,
    dy: i32,
    dx: i32,
    width: usize,
    mut f: impl FnMut(usize, usize, usize),
) {
    let len = region.x_end - region.x_start;
    let sx = shift(region.x_start, dx);
    for y in region.y_start..region.y_end {
        f(y * width + region.x_start, shift(y, dy) * width + sx, len);
    }
}

/// Forward pass for one image: `input` is `[I, H, W]`, `output` is `[O, H, W]`.
fn forward_image(
    geometry: &Geometry,
    input: &[f32],
    weight: &[f32],
    bias: &[f32],
    offsets: &[i32],
    output: &mut [f32],
) {
    let plane = geometry.plane_len();
    let LayerDims {
        input_planes,
        samples,
        ..
    } = geometry.dims;

    for (o, out_plane) in output.chunks_mut(plane).enumerate() {
        out_plane.fill(bias[o]);

        for s in 0..samples {
            let (offset, region) = geometry.sample(offsets, o, s);
            if region.is_empty() {
                trace!(
                    o,
                    s,
                    dy = offset.dy,
                    dx = offset.dx,
                    area = region.area(),
                    "sample outside image"
                );
                continue;
            }

            for (i, in_plane) in input.chunks(plane).enumerate() {
                let k = weight[(o * input_planes + i) * samples + s];
                for_each_row(&region, offset.dy, offset.dx, geometry.width, |dst, src, len| {
                    let out_row = &mut out_plane[dst..dst + len];
                    let in_row = &in_plane[src..src + len];
                    for (y, &x) in out_row.iter_mut().zip(in_row) {
                        *y += k * x;
                    }
                });
            }
        }
    }
}

/// Input-gradient pass for one image: `grad_output` is `[O, H, W]`,
/// `grad_input` is `[I, H, W]`.
fn grad_input_image(
    geometry: &Geometry,
    grad_output: &[f32],
    weight: &[f32],
    offsets: &[i32],
    grad_input: &mut [f32],
) {
    let plane = geometry.plane_len();
    let LayerDims {
        input_planes,
        samples,
        ..
    } = geometry.dims;

    grad_input.fill(0.0);

    for (o, go_plane) in grad_output.chunks(plane).enumerate() {
        for s in 0..samples {
            let (offset, region) = geometry.sample(offsets, o, s);
            if region.is_empty() {
                continue;
            }

            for (i, gi_plane) in grad_input.chunks_mut(plane).enumerate() {
                let k = weight[(o * input_planes + i) * samples + s];
                for_each_row(&region, offset.dy, offset.dx, geometry.width, |dst, src, len| {
                    let go_row = &go_plane[dst..dst + len];
                    let gi_row = &mut gi_plane[src..src + len];
                    for (g, &d) in gi_row.iter_mut().zip(go_row) {
                        *g += k * d;
                    }
                });
            }
        }
    }
}

/// Unscaled weight gradient of output plane `o` into `grad_weight` (`[I, S]`).
fn weight_grad_plane(
    geometry: &Geometry,
    o: usize,
    input: &[f32],
    grad_output: &[f32],
    offsets: &[i32],
    grad_weight: &mut [f32],
) {
    let plane = geometry.plane_len();
    let LayerDims {
        output_planes,
        input_planes,
        samples,
    } = geometry.dims;

    grad_weight.fill(0.0);

    for b in 0..geometry.batch {
        let go_base = (b * output_planes + o) * plane;
        let go_plane = &grad_output[go_base..go_base + plane];

        for s in 0..samples {
            let (offset, region) = geometry.sample(offsets, o, s);
            if region.is_empty() {
                continue;
            }

            for i in 0..input_planes {
                let in_base = (b * input_planes + i) * plane;
                let in_plane = &input[in_base..in_base + plane];

                let mut acc = 0.0;
                for_each_row(&region, offset.dy, offset.dx, geometry.width, |dst, src, len| {
                    acc += go_plane[dst..dst + len]
                        .iter()
                        .zip(&in_plane[src..src + len])
                        .map(|(&d, &x)| d * x)
                        .sum::<f32>();
                });
                grad_weight[i * samples + s] += acc;
            }
        }
    }
}
