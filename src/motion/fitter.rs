//! Per-track curve fitting.

use nalgebra::Vector3;
use tracing::trace;

use crate::error::{Error, FitError};
use crate::motion::bbox::BBox;
use crate::motion::params::{MotionParameters, Signal};
use crate::motion::solver::{
    Bounds, BoundedLevenbergMarquardt, Quadratic, SolveError, SolverOptions,
};

/// Configuration for fitting a single track.
#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    /// Signals are clamped to this floor before taking the log.
    pub floor: f64,
    /// Lower bounds on `(p0, p1, p2)`.
    pub lower: [f64; 3],
    /// Upper bounds on `(p0, p1, p2)`.
    pub upper: [f64; 3],
    /// Distinct present observations needed to fit three coefficients.
    pub min_samples: usize,
    pub solver: SolverOptions,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            floor: 1e-8,
            lower: [0.0, -0.1, 0.0],
            upper: [f64::INFINITY, 1.1, 3.0],
            min_samples: 3,
            solver: SolverOptions::default(),
        }
    }
}

impl FitConfig {
    pub fn with_bounds(mut self, lower: [f64; 3], upper: [f64; 3]) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// Set the solver's iteration budget per signal.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.solver.max_iterations = max_iterations;
        self
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }
}

/// Fit the four signals of a track.
///
/// `times` must be strictly increasing and as long as `boxes`. All-zero boxes are treated as
/// missing and skipped together with their times. The result is atomic: if any signal fails,
/// the whole call fails.
pub fn fit(boxes: &[BBox], times: &[f64], config: &FitConfig) -> Result<MotionParameters, Error> {
    if boxes.len() != times.len() {
        return Err(Error::LengthMismatch {
            boxes: boxes.len(),
            times: times.len(),
        });
    }
    if boxes.is_empty() {
        return Err(Error::Empty);
    }
    check_increasing(times)?;

    let mut ts = Vec::with_capacity(boxes.len());
    let mut signals: [Vec<f64>; 4] = Default::default();
    for (index, (bbox, &t)) in boxes.iter().zip(times).enumerate() {
        if bbox.is_missing() {
            continue;
        }
        if !bbox.is_finite() {
            return Err(FitError::NonFiniteObservation { index }.into());
        }
        ts.push(t);
        for (signal, value) in signals.iter_mut().zip(bbox.to_cxcywh()) {
            signal.push(value.max(config.floor).ln());
        }
    }

    if ts.len() < config.min_samples {
        return Err(FitError::InsufficientSamples {
            required: config.min_samples,
            got: ts.len(),
        }
        .into());
    }

    let solver = BoundedLevenbergMarquardt::new(
        Quadratic,
        Bounds::new(config.lower, config.upper),
        config.solver,
    );

    let mut rows = [[0.0; 3]; 4];
    for (signal, ys) in Signal::ALL.into_iter().zip(&signals) {
        let solution = solver
            .solve(&ts, ys, Vector3::repeat(1.0))
            .map_err(|e| solve_error(signal, e))?;
        let p = solution.params;
        if !p.iter().all(|v| v.is_finite()) {
            return Err(FitError::Diverged { signal }.into());
        }
        trace!(%signal, iterations = solution.iterations, cost = solution.cost, "fitted signal");
        rows[signal.index()] = [p[0], p[1], p[2]];
    }

    Ok(MotionParameters::new(rows))
}

/// Times must be strictly increasing; NaN never compares greater and is rejected too.
pub(crate) fn check_increasing(times: &[f64]) -> Result<(), Error> {
    for (index, pair) in times.windows(2).enumerate() {
        let (previous, current) = (pair[0], pair[1]);
        if !(current > previous) {
            return Err(Error::UnorderedTimes {
                index: index + 1,
                previous,
                current,
            });
        }
    }
    Ok(())
}

fn solve_error(signal: Signal, err: SolveError) -> Error {
    let fit = match err {
        SolveError::Singular => FitError::Singular { signal },
        SolveError::Timeout { iterations } => FitError::Timeout { signal, iterations },
        SolveError::NonFinite => FitError::Diverged { signal },
    };
    fit.into()
}

/// Stateful fitter that remembers the outcome of its most recent fit.
#[derive(Debug, Clone, Default)]
pub struct MotionModel {
    config: FitConfig,
    parameters: Option<MotionParameters>,
}

impl MotionModel {
    pub fn new(config: FitConfig) -> Self {
        Self {
            config,
            parameters: None,
        }
    }

    /// Wrap an already fitted block, e.g. one read back from a batch result.
    pub fn from_parameters(parameters: MotionParameters) -> Self {
        Self {
            config: FitConfig::default(),
            parameters: Some(parameters),
        }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Fit `boxes` observed at `times`. A failed fit clears the stored parameters.
    pub fn fit(&mut self, boxes: &[BBox], times: &[f64]) -> Result<MotionParameters, Error> {
        let result = fit(boxes, times, &self.config);
        self.parameters = result.as_ref().ok().copied();
        result
    }

    /// Fit with times `0..N-1`.
    pub fn fit_indexed(&mut self, boxes: &[BBox]) -> Result<MotionParameters, Error> {
        let times: Vec<f64> = (0..boxes.len()).map(|i| i as f64).collect();
        self.fit(boxes, &times)
    }

    pub fn parameters(&self) -> Option<&MotionParameters> {
        self.parameters.as_ref()
    }

    /// Box at `time` from the last successful fit.
    pub fn bbox_at(&self, time: f64) -> Option<BBox> {
        self.parameters.map(|p| p.bbox_at(time))
    }

    /// Boxes at each of `times`; any box with a non-finite coordinate is zeroed as a whole.
    pub fn bboxes_at(&self, times: &[f64]) -> Option<Vec<BBox>> {
        let params = self.parameters?;
        Some(times.iter().map(|&t| params.bbox_at(t).or_zero()).collect())
    }

    pub fn invalid_params() -> MotionParameters {
        MotionParameters::INVALID
    }

    /// Reserved box value for callers that need a non-zero invalid marker.
    pub fn invalid_box() -> BBox {
        BBox::new(1.0, 1.0, 1.0, 1.0)
    }

    pub fn num_parameters() -> usize {
        MotionParameters::NUM_PARAMETERS
    }

    /// Human readable summary of the center-x curve.
    pub fn summary(parameters: &MotionParameters) -> String {
        parameters.to_string()
    }
}
