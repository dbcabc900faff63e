//! Error types for fitting and evaluation.

use thiserror::Error;

use crate::motion::Signal;

/// Recoverable per-track fitting outcomes.
///
/// The batch orchestrator turns any of these into the invalid parameter block and a zero track
/// confidence instead of aborting the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("need at least {required} distinct observations, got {got}")]
    InsufficientSamples { required: usize, got: usize },

    #[error("observed fraction {rate:.3} is below the required {required:.3}")]
    LowCoverage { rate: f64, required: f64 },

    #[error("observation {index} has a non-finite coordinate")]
    NonFiniteObservation { index: usize },

    #[error("singular normal equations while fitting {signal}")]
    Singular { signal: Signal },

    #[error("solver exhausted {iterations} iterations while fitting {signal}")]
    Timeout { signal: Signal, iterations: usize },

    #[error("solver produced non-finite parameters while fitting {signal}")]
    Diverged { signal: Signal },
}

/// Crate error type.
///
/// Everything except [`Error::Fit`] is a caller-contract violation (bad shapes or ordering) and
/// is never converted into a sentinel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("got {boxes} boxes but {times} times")]
    LengthMismatch { boxes: usize, times: usize },

    #[error("observation sequence is empty")]
    Empty,

    #[error("batch contains no tracks")]
    EmptyBatch,

    #[error("times must be strictly increasing: index {index} has {current} after {previous}")]
    UnorderedTimes {
        index: usize,
        previous: f64,
        current: f64,
    },

    #[error("expected at least 4 box channels, got {0}")]
    MissingChannels(usize),

    #[error("expected a parameter block of shape (tracks, 4, 3), got {0:?}")]
    ParameterShape(Vec<usize>),

    #[error("parameter batch has {parameters} entries but time batch has {times}")]
    BatchMismatch { parameters: usize, times: usize },

    #[error("window of shape {got:?} does not match the fitted (frames, tracks) {expected:?}")]
    WindowMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error(transparent)]
    Fit(#[from] FitError),
}

impl Error {
    /// Whether this error describes noisy or degenerate data rather than a caller bug.
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Error::Fit(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_classification() {
        let fit = Error::from(FitError::InsufficientSamples {
            required: 3,
            got: 1,
        });
        assert!(fit.is_degenerate());
        assert!(!Error::Empty.is_degenerate());
        assert!(
            !Error::UnorderedTimes {
                index: 1,
                previous: 2.0,
                current: 0.0
            }
            .is_degenerate()
        );
    }

    #[test]
    fn test_messages_name_the_signal() {
        let err = FitError::Timeout {
            signal: Signal::Width,
            iterations: 7,
        };
        assert_eq!(
            err.to_string(),
            "solver exhausted 7 iterations while fitting width"
        );
    }
}
