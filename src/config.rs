//! Layer configuration.
//!
//! A [`SparseFilterConfig`] fixes the plane and sample counts of a layer
//! instance and describes the window that initial sample offsets are drawn
//! from: a `kernel_h x kernel_w` grid centred on the output pixel, with grid
//! steps of `dilation_h` rows and `dilation_w` columns.
//!
//! ```rust
//! use sparse_filter::config::SparseFilterConfig;
//!
//! let config = SparseFilterConfig::new(3, 8, 4).kernel(5, 5).dilation(2, 2).seed(7);
//! assert!(config.check().is_ok());
//! assert_eq!(config.dims().samples, 4);
//! ```

use briny::prelude::{Validate, ValidationError};

use crate::error::{Error, Result};
use crate::geometry::LayerDims;

/// Largest offset magnitude a sampling window may produce.
const MAX_REACH: usize = i32::MAX as usize;

/// Description of one sparse filter layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseFilterConfig {
    pub input_planes: usize,
    pub output_planes: usize,
    pub samples: usize,
    /// Rows in the initial sampling window.
    pub kernel_h: usize,
    /// Columns in the initial sampling window.
    pub kernel_w: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    /// Seed for parameter initialisation. `None` draws from the OS.
    pub seed: Option<u64>,
}

impl SparseFilterConfig {
    /// A 3x3 undilated window with an OS-seeded initialiser.
    pub const fn new(input_planes: usize, output_planes: usize, samples: usize) -> Self {
        Self {
            input_planes,
            output_planes,
            samples,
            kernel_h: 3,
            kernel_w: 3,
            dilation_h: 1,
            dilation_w: 1,
            seed: None,
        }
    }

    #[must_use]
    pub const fn kernel(mut self, kernel_h: usize, kernel_w: usize) -> Self {
        self.kernel_h = kernel_h;
        self.kernel_w = kernel_w;
        self
    }

    #[must_use]
    pub const fn dilation(mut self, dilation_h: usize, dilation_w: usize) -> Self {
        self.dilation_h = dilation_h;
        self.dilation_w = dilation_w;
        self
    }

    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub const fn dims(&self) -> LayerDims {
        LayerDims::new(self.output_planes, self.input_planes, self.samples)
    }

    /// Validates the configuration, naming the first problem found.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if any count is zero or the window reaches
    /// further than an `i32` offset can express.
    pub fn check(&self) -> Result<()> {
        match self.problem() {
            Some(reason) => Err(Error::InvalidConfig(reason)),
            None => Ok(()),
        }
    }

    fn problem(&self) -> Option<&'static str> {
        if self.input_planes == 0 {
            return Some("input_planes must be positive");
        }
        if self.output_planes == 0 {
            return Some("output_planes must be positive");
        }
        if self.samples == 0 {
            return Some("samples must be positive");
        }
        if self.kernel_h == 0 || self.kernel_w == 0 {
            return Some("kernel window must be non-empty");
        }
        if self.dilation_h == 0 || self.dilation_w == 0 {
            return Some("dilation must be positive");
        }
        let reach = |kernel: usize, dilation: usize| {
            kernel
                .checked_mul(dilation)
                .is_some_and(|r| r <= MAX_REACH)
        };
        if !reach(self.kernel_h, self.dilation_h) || !reach(self.kernel_w, self.dilation_w) {
            return Some("sampling window exceeds the offset range");
        }
        None
    }
}

impl Validate for SparseFilterConfig {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        self.check().map_err(|_| ValidationError)
    }
}
