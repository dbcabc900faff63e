//! Integration module for connecting observation sources and tensor pipelines with the
//! motion model.
//!
//! This module provides the driver-side seams: assembling windows, pulling them from a
//! collaborator, and (with the `burn-backend` feature) evaluating parameter blocks inside a
//! Burn tensor graph.

mod builder;
mod pipeline;
mod source;

pub use builder::{WINDOW_CHANNELS, WindowBuilder, frame_times};
pub use pipeline::{FittedWindow, PipelineError, TrajectoryPipeline};
pub use source::{IntoWindow, ObservationSource, TrackWindow};

#[cfg(feature = "burn-backend")]
pub mod burn_backend;
