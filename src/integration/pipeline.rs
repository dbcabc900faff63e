//! TrajectoryPipeline for combining an observation source with batch fitting.

use thiserror::Error;

use super::{IntoWindow, ObservationSource, TrackWindow};
use crate::error::Error;
use crate::motion::{BatchConfig, BatchFit, BatchFitter};

/// Failure of either the source or the fitter.
#[derive(Debug, Error)]
pub enum PipelineError<E> {
    #[error("observation source failed: {0}")]
    Source(E),
    #[error(transparent)]
    Fit(#[from] Error),
}

/// A window together with the fit computed for it.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedWindow {
    pub window: TrackWindow,
    pub fit: BatchFit,
}

impl FittedWindow {
    /// Observed boxes with occluded frames filled from each track's curve.
    pub fn bridged_boxes(&self) -> Result<ndarray::Array3<f64>, Error> {
        self.fit
            .bridge_gaps(self.window.boxes.view(), self.window.times.view())
    }
}

/// Pulls windows from any `ObservationSource` and fits every track in them.
pub struct TrajectoryPipeline<S: ObservationSource> {
    source: S,
    fitter: BatchFitter,
}

impl<S: ObservationSource> TrajectoryPipeline<S> {
    /// Create a new pipeline with the given source and batch config.
    pub fn new(source: S, config: BatchConfig) -> Self {
        Self {
            source,
            fitter: BatchFitter::new(config),
        }
    }

    /// Create a new pipeline with default batch configuration.
    pub fn with_default_config(source: S) -> Self {
        Self::new(source, BatchConfig::default())
    }

    /// Fit the next window, or return `None` when the source is exhausted.
    pub fn process_window(&mut self) -> Result<Option<FittedWindow>, PipelineError<S::Error>> {
        let Some(window) = self.source.next_window().map_err(PipelineError::Source)? else {
            return Ok(None);
        };
        Ok(Some(self.fit_window(window)?))
    }

    /// Fit a window obtained outside the source.
    pub fn fit_window(&self, window: impl IntoWindow) -> Result<FittedWindow, Error> {
        let window = window.into_window();
        let fit = self.fitter.fit(window.boxes.view(), window.times.view())?;
        Ok(FittedWindow { window, fit })
    }

    /// Get a reference to the underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get a mutable reference to the underlying source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn fitter(&self) -> &BatchFitter {
        &self.fitter
    }
}

impl<S: ObservationSource> Iterator for TrajectoryPipeline<S> {
    type Item = Result<FittedWindow, PipelineError<S::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.process_window().transpose()
    }
}
