//! Trait for collaborators that supply windows of track observations.

use ndarray::{Array1, Array3};

/// A run of frames for a set of tracks, ready for batch fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackWindow {
    /// Track identifiers, one per column of `boxes`.
    pub track_ids: Vec<u64>,
    /// `(F, T, C)` window: LTRB geometry, existence flag, class confidence.
    pub boxes: Array3<f64>,
    /// `(F,)` strictly increasing frame times in seconds.
    pub times: Array1<f64>,
}

/// Source of observation windows, e.g. a dataset reader or a live tracker's history.
///
/// # Example
///
/// ```ignore
/// use motion_curves::integration::{ObservationSource, TrackWindow};
///
/// struct Replay {
///     windows: Vec<TrackWindow>,
/// }
///
/// impl ObservationSource for Replay {
///     type Error = std::convert::Infallible;
///
///     fn next_window(&mut self) -> Result<Option<TrackWindow>, Self::Error> {
///         Ok(self.windows.pop())
///     }
/// }
/// ```
pub trait ObservationSource {
    /// Error type for read failures.
    type Error;

    /// Produce the next window, or `None` once the source is exhausted.
    fn next_window(&mut self) -> Result<Option<TrackWindow>, Self::Error>;
}

/// Helper trait for converting collaborator-specific containers into a window.
pub trait IntoWindow {
    fn into_window(self) -> TrackWindow;
}

impl IntoWindow for TrackWindow {
    fn into_window(self) -> TrackWindow {
        self
    }
}

/// `(track_ids, boxes, times)` as produced by dataset readers.
impl IntoWindow for (Vec<u64>, Array3<f64>, Array1<f64>) {
    fn into_window(self) -> TrackWindow {
        let (track_ids, boxes, times) = self;
        TrackWindow {
            track_ids,
            boxes,
            times,
        }
    }
}
