//! The 4×3 parameter block of a track's log-space quadratic trajectory.

use std::fmt;

use ndarray::{Array2, ArrayView2};

use crate::error::Error;
use crate::motion::bbox::BBox;

/// One of the four derived signals a box is decomposed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    CenterX,
    CenterY,
    Width,
    Height,
}

impl Signal {
    /// Row order of the parameter block.
    pub const ALL: [Signal; 4] = [
        Signal::CenterX,
        Signal::CenterY,
        Signal::Width,
        Signal::Height,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::CenterX => "center x",
            Signal::CenterY => "center y",
            Signal::Width => "width",
            Signal::Height => "height",
        };
        f.write_str(name)
    }
}

/// Coefficients `(p0, p1, p2)` of `log(signal) = p2*t^2 + p1*t + p0`, one row per [`Signal`].
///
/// Either every coefficient is finite, or the block is [`MotionParameters::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionParameters([[f64; 3]; 4]);

impl MotionParameters {
    /// Number of scalar coefficients in a block.
    pub const NUM_PARAMETERS: usize = 12;

    /// Sentinel block meaning "no usable fit".
    pub const INVALID: MotionParameters = MotionParameters([[0.0; 3]; 4]);

    pub fn new(rows: [[f64; 3]; 4]) -> Self {
        Self(rows)
    }

    /// Read a block from a `(4, 3)` view.
    pub fn from_view(view: ArrayView2<'_, f64>) -> Result<Self, Error> {
        if view.dim() != (4, 3) {
            return Err(Error::ParameterShape(view.shape().to_vec()));
        }
        let mut rows = [[0.0; 3]; 4];
        for ((r, c), &v) in view.indexed_iter() {
            rows[r][c] = v;
        }
        Ok(Self(rows))
    }

    pub fn to_array(&self) -> Array2<f64> {
        Array2::from_shape_fn((4, 3), |(r, c)| self.0[r][c])
    }

    #[inline]
    pub fn rows(&self) -> &[[f64; 3]; 4] {
        &self.0
    }

    #[inline]
    pub fn row(&self, signal: Signal) -> [f64; 3] {
        self.0[signal.index()]
    }

    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().flatten().all(|v| v.is_finite())
    }

    /// Log-space value of every signal at `time`, in [`Signal::ALL`] order.
    #[inline]
    pub fn log_signal(&self, time: f64) -> [f64; 4] {
        self.0.map(|[p0, p1, p2]| quadratic(time, p0, p1, p2))
    }

    /// Reconstructed box at `time`. Non-finite values propagate untouched.
    pub fn bbox_at(&self, time: f64) -> BBox {
        let [cx, cy, w, h] = self.log_signal(time).map(f64::exp);
        BBox::from_cxcywh(cx, cy, w, h)
    }
}

/// The curve model shared by fitting and evaluation.
#[inline]
pub fn quadratic(t: f64, p0: f64, p1: f64, p2: f64) -> f64 {
    p2 * t * t + p1 * t + p0
}

impl fmt::Display for MotionParameters {
    /// Diagnostic summary of the center-x curve.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [p0, p1, p2] = self.row(Signal::CenterX);
        write!(f, "x = {:.2}t^2+{:.2}t+{:.2}", p2, p1, p0)
    }
}

impl From<MotionParameters> for [[f64; 3]; 4] {
    fn from(params: MotionParameters) -> Self {
        params.0
    }
}
