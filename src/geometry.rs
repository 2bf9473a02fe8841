//! Shape and geometry resolution shared by every pass.
//!
//! Two jobs live here:
//!
//! 1. Validating that the caller's buffers agree with each other and with the
//!    layer's [`LayerDims`] before any kernel runs.
//! 2. Computing, for one sample offset, the rectangle of output pixels whose
//!    source pixel lies inside the image ([`ValidRegion`]). Everything outside
//!    that rectangle contributes nothing, which is how the layer behaves as if
//!    the input were zero-padded without ever materialising a padded copy.

use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Per-layer dimensions, fixed for the lifetime of a layer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerDims {
    pub output_planes: usize,
    pub input_planes: usize,
    pub samples: usize,
}

impl LayerDims {
    pub const fn new(output_planes: usize, input_planes: usize, samples: usize) -> Self {
        Self {
            output_planes,
            input_planes,
            samples,
        }
    }

    /// `[O, I, S]`
    pub const fn weight_shape(&self) -> [usize; 3] {
        [self.output_planes, self.input_planes, self.samples]
    }

    /// `[O]`
    pub const fn bias_shape(&self) -> [usize; 1] {
        [self.output_planes]
    }

    /// `[O, S, 2]`
    pub const fn offsets_shape(&self) -> [usize; 3] {
        [self.output_planes, self.samples, 2]
    }

    /// Rejects zero plane or sample counts.
    pub fn check(&self) -> Result<()> {
        if self.output_planes == 0 {
            return Err(Error::ZeroDimension("output_planes"));
        }
        if self.input_planes == 0 {
            return Err(Error::ZeroDimension("input_planes"));
        }
        if self.samples == 0 {
            return Err(Error::ZeroDimension("samples"));
        }
        Ok(())
    }
}

/// A sample's displacement from the output pixel to the input pixel it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset {
    pub dy: i32,
    pub dx: i32,
}

impl Offset {
    pub const fn new(dy: i32, dx: i32) -> Self {
        Self { dy, dx }
    }

    /// Reads the offset of sample `s` of output plane `o` from a flat `[O, S, 2]` table.
    #[inline]
    pub fn from_table(table: &[i32], samples: usize, o: usize, s: usize) -> Self {
        let base = (o * samples + s) * 2;
        Self {
            dy: table[base],
            dx: table[base + 1],
        }
    }
}

/// Half-open rectangle `[y_start, y_end) x [x_start, x_end)` of output pixels
/// whose shifted source pixel is inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidRegion {
    pub y_start: usize,
    pub y_end: usize,
    pub x_start: usize,
    pub x_end: usize,
}

impl ValidRegion {
    /// The region with no pixels.
    pub const EMPTY: Self = Self {
        y_start: 0,
        y_end: 0,
        x_start: 0,
        x_end: 0,
    };

    /// Computes the overlap of an image of `height x width` with itself shifted by `offset`.
    ///
    /// ```
    /// use sparse_filter::geometry::{Offset, ValidRegion};
    /// let r = ValidRegion::new(Offset::new(1, -1), 3, 3);
    /// assert_eq!((r.y_start, r.y_end, r.x_start, r.x_end), (0, 2, 1, 3));
    /// ```
    pub fn new(offset: Offset, height: usize, width: usize) -> Self {
        let Some((y_start, y_end)) = axis_range(offset.dy, height) else {
            return Self::EMPTY;
        };
        let Some((x_start, x_end)) = axis_range(offset.dx, width) else {
            return Self::EMPTY;
        };
        Self {
            y_start,
            y_end,
            x_start,
            x_end,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.y_start >= self.y_end || self.x_start >= self.x_end
    }

    /// Number of output pixels covered.
    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.y_end - self.y_start) * (self.x_end - self.x_start)
        }
    }
}

/// `[max(0, -d), min(extent, extent - d))` along one axis, `None` when empty.
#[inline]
fn axis_range(d: i32, extent: usize) -> Option<(usize, usize)> {
    // i64 keeps `-d` and `extent - d` exact for every i32 offset
    let d = i64::from(d);
    let extent = i64::try_from(extent).ok()?;
    let start = 0i64.max(-d);
    let end = extent.min(extent - d);
    if end <= start {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(end).ok()?))
}

/// Dimensions resolved for one kernel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub dims: LayerDims,
    pub batch: usize,
    pub height: usize,
    pub width: usize,
}

impl Geometry {
    /// Resolves and validates the operands of the forward pass.
    pub fn for_forward(
        dims: LayerDims,
        input: &Tensor<f32>,
        weight: &Tensor<f32>,
        bias: &Tensor<f32>,
        offsets: &Tensor<i32>,
    ) -> Result<Self> {
        let geometry = Self::from_input(dims, input)?;
        weight.expect_shape("weight", &dims.weight_shape())?;
        bias.expect_shape("bias", &dims.bias_shape())?;
        offsets.expect_shape("offsets", &dims.offsets_shape())?;
        Ok(geometry)
    }

    /// Resolves and validates the operands of the input-gradient pass.
    pub fn for_grad_input(
        dims: LayerDims,
        input: &Tensor<f32>,
        grad_output: &Tensor<f32>,
        weight: &Tensor<f32>,
        offsets: &Tensor<i32>,
    ) -> Result<Self> {
        let geometry = Self::from_input(dims, input)?;
        geometry.check_grad_output(grad_output)?;
        weight.expect_shape("weight", &dims.weight_shape())?;
        offsets.expect_shape("offsets", &dims.offsets_shape())?;
        Ok(geometry)
    }

    /// Resolves and validates the operands of the parameter-gradient pass.
    pub fn for_grad_parameters(
        dims: LayerDims,
        input: &Tensor<f32>,
        grad_output: &Tensor<f32>,
        offsets: &Tensor<i32>,
    ) -> Result<Self> {
        let geometry = Self::from_input(dims, input)?;
        geometry.check_grad_output(grad_output)?;
        offsets.expect_shape("offsets", &dims.offsets_shape())?;
        Ok(geometry)
    }

    fn from_input(dims: LayerDims, input: &Tensor<f32>) -> Result<Self> {
        dims.check()?;
        let [batch, planes, height, width] = image_dims("input", input)?;
        if planes != dims.input_planes {
            return Err(Error::PlaneMismatch {
                name: "input",
                expected: dims.input_planes,
                got: planes,
            });
        }
        Ok(Self {
            dims,
            batch,
            height,
            width,
        })
    }

    fn check_grad_output(&self, grad_output: &Tensor<f32>) -> Result<()> {
        let [batch, planes, height, width] = image_dims("grad_output", grad_output)?;
        if planes != self.dims.output_planes {
            return Err(Error::PlaneMismatch {
                name: "grad_output",
                expected: self.dims.output_planes,
                got: planes,
            });
        }
        if (batch, height, width) != (self.batch, self.height, self.width) {
            return Err(Error::ShapeMismatch {
                name: "grad_output",
                expected: self.output_shape().to_vec(),
                got: grad_output.shape.clone(),
            });
        }
        Ok(())
    }

    /// `[B, I, H, W]`
    pub const fn input_shape(&self) -> [usize; 4] {
        [self.batch, self.dims.input_planes, self.height, self.width]
    }

    /// `[B, O, H, W]`
    pub const fn output_shape(&self) -> [usize; 4] {
        [self.batch, self.dims.output_planes, self.height, self.width]
    }

    /// Elements in one spatial plane.
    pub const fn plane_len(&self) -> usize {
        self.height * self.width
    }

    /// True when there are no pixels to process at all.
    pub const fn is_empty(&self) -> bool {
        self.batch == 0 || self.height == 0 || self.width == 0
    }

    /// Offset and valid region of sample `s` of output plane `o`.
    #[inline]
    pub fn sample(&self, offsets: &[i32], o: usize, s: usize) -> (Offset, ValidRegion) {
        let offset = Offset::from_table(offsets, self.dims.samples, o, s);
        (offset, ValidRegion::new(offset, self.height, self.width))
    }
}

fn image_dims(name: &'static str, t: &Tensor<f32>) -> Result<[usize; 4]> {
    match t.shape.as_slice() {
        &[b, c, h, w] => {
            t.expect_consistent(name)?;
            Ok([b, c, h, w])
        }
        _ => Err(Error::Rank {
            name,
            expected: 4,
            got: t.shape.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(dy: i32, dx: i32, h: usize, w: usize) -> ValidRegion {
        ValidRegion::new(Offset::new(dy, dx), h, w)
    }

    fn bounds(y_start: usize, y_end: usize, x_start: usize, x_end: usize) -> ValidRegion {
        ValidRegion {
            y_start,
            y_end,
            x_start,
            x_end,
        }
    }

    #[test]
    fn zero_offset_covers_whole_image() {
        let r = region(0, 0, 4, 5);
        assert_eq!(r, bounds(0, 4, 0, 5));
        assert_eq!(r.area(), 20);
    }

    #[test]
    fn positive_offset_trims_trailing_rows() {
        let r = region(1, 2, 3, 4);
        assert_eq!(r, bounds(0, 2, 0, 2));
    }

    #[test]
    fn negative_offset_trims_leading_columns() {
        let r = region(-2, -1, 3, 4);
        assert_eq!(r, bounds(2, 3, 1, 4));
        assert_eq!(r.area(), 3);
    }

    #[test]
    fn offsets_past_the_border_are_empty() {
        assert!(region(3, 0, 3, 3).is_empty());
        assert!(region(-3, 0, 3, 3).is_empty());
        assert!(region(0, 7, 3, 3).is_empty());
        assert!(region(i32::MIN, i32::MAX, 3, 3).is_empty());
        assert_eq!(region(0, -3, 3, 3).area(), 0);
    }

    #[test]
    fn forward_rejects_non_image_input() {
        let dims = LayerDims::new(1, 1, 1);
        let input = Tensor::<f32>::zeros(vec![1, 3, 3]);
        let err = Geometry::for_forward(
            dims,
            &input,
            &Tensor::zeros(vec![1, 1, 1]),
            &Tensor::zeros(vec![1]),
            &Tensor::zeros(vec![1, 1, 2]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Rank { name: "input", expected: 4, .. }));
    }

    #[test]
    fn grad_output_must_match_input_extent() {
        let dims = LayerDims::new(2, 1, 1);
        let input = Tensor::<f32>::zeros(vec![2, 1, 4, 4]);
        let grad_output = Tensor::<f32>::zeros(vec![2, 2, 4, 3]);
        let offsets = Tensor::zeros(vec![2, 1, 2]);
        let err = Geometry::for_grad_parameters(dims, &input, &grad_output, &offsets).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { name: "grad_output", .. }));
    }

    #[test]
    fn plane_counts_are_checked() {
        let dims = LayerDims::new(2, 3, 1);
        let input = Tensor::<f32>::zeros(vec![1, 2, 4, 4]);
        let err = Geometry::for_grad_parameters(
            dims,
            &input,
            &Tensor::zeros(vec![1, 2, 4, 4]),
            &Tensor::zeros(vec![2, 1, 2]),
        )
        .unwrap_err();
        assert_eq!(err, Error::PlaneMismatch { name: "input", expected: 3, got: 2 });
    }

    #[test]
    fn zero_samples_are_rejected() {
        assert_eq!(LayerDims::new(1, 1, 0).check(), Err(Error::ZeroDimension("samples")));
    }

    #[test]
    fn sample_reads_offset_table() {
        let dims = LayerDims::new(2, 1, 2);
        let geometry = Geometry {
            dims,
            batch: 1,
            height: 3,
            width: 3,
        };
        let table = [0, 0, 1, 0, -1, 2, 5, 5];
        let (offset, r) = geometry.sample(&table, 1, 0);
        assert_eq!(offset, Offset::new(-1, 2));
        assert_eq!(r, bounds(1, 3, 0, 1));
        assert!(geometry.sample(&table, 1, 1).1.is_empty());
    }
}
