mod batch;
mod bbox;
mod evaluator;
mod fitter;
mod params;
pub mod solver;

pub use batch::{
    BatchConfig, BatchFit, BatchFitter, CONFIDENCE_CHANNEL, EXISTENCE_CHANNEL, get_parameters,
};
pub use bbox::BBox;
pub use evaluator::{evaluate, evaluate_batch};
pub use fitter::{FitConfig, MotionModel, fit};
pub use params::{MotionParameters, Signal};
