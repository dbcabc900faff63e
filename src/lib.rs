//! Log-space quadratic motion models for multi-object tracking.
//!
//! A track's boxes are turned into center/size signals, each signal is fitted with a bounded
//! quadratic in log space, and the resulting 4×3 parameter block can be evaluated at any time to
//! interpolate, extrapolate or bridge occlusions.

pub mod error;
pub mod integration;
pub mod motion;

pub use error::{Error, FitError};
pub use motion::{
    BBox, BatchConfig, BatchFit, BatchFitter, FitConfig, MotionModel, MotionParameters, Signal,
    evaluate, evaluate_batch, get_parameters,
};
