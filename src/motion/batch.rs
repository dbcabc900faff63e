//! Batch fitting of every track in a window of frames.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, s};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{Error, FitError};
use crate::motion::bbox::BBox;
use crate::motion::evaluator::evaluate_batch;
use crate::motion::fitter::{FitConfig, check_increasing, fit};
use crate::motion::params::MotionParameters;

/// Channel carrying the per-frame existence flag.
pub const EXISTENCE_CHANNEL: usize = 4;
/// Channel carrying the per-frame class/occlusion confidence.
pub const CONFIDENCE_CHANNEL: usize = 5;

/// Configuration for the batch orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub fit: FitConfig,
    /// Minimum fraction of present frames for a track to be fitted (inclusive).
    pub min_valid_rate: f64,
    /// Fit tracks on the rayon pool instead of sequentially.
    pub parallel: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            fit: FitConfig::default(),
            min_valid_rate: 0.0,
            parallel: true,
        }
    }
}

impl BatchConfig {
    pub fn with_min_valid_rate(mut self, min_valid_rate: f64) -> Self {
        self.min_valid_rate = min_valid_rate;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_fit_config(mut self, fit: FitConfig) -> Self {
        self.fit = fit;
        self
    }
}

/// Output of fitting a window.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFit {
    /// `(T, 4, 3)`; invalid tracks hold the all-zero block.
    pub parameters: Array3<f64>,
    /// `(F, T)`; frames that contributed to each track's fit.
    pub frame_validity: Array2<bool>,
    /// `(T,)`; zero for every invalid track.
    pub track_confidence: Array1<f64>,
}

impl BatchFit {
    pub fn num_tracks(&self) -> usize {
        self.track_confidence.len()
    }

    pub fn track_parameters(&self, track: usize) -> Option<MotionParameters> {
        if track >= self.num_tracks() {
            return None;
        }
        MotionParameters::from_view(self.parameters.index_axis(Axis(0), track)).ok()
    }

    /// Reconstructed boxes `(Q, T, 4)` at `times`. Invalid tracks are left at zero.
    pub fn reconstruct(&self, times: ArrayView1<'_, f64>) -> Result<Array3<f64>, Error> {
        let mut boxes = evaluate_batch(self.parameters.view(), times)?;
        for (track, block) in self.parameters.outer_iter().enumerate() {
            if block.iter().all(|&v| v == 0.0) {
                boxes.slice_mut(s![.., track, ..]).fill(0.0);
            }
        }
        Ok(boxes)
    }

    /// Fill the frames each track did not use with boxes from its curve.
    ///
    /// Frames that contributed to the fit keep their observed geometry. Invalid tracks keep
    /// only their observed frames. The result has shape `(F, T, 4)`.
    pub fn bridge_gaps(
        &self,
        all_boxes: ArrayView3<'_, f64>,
        times: ArrayView1<'_, f64>,
    ) -> Result<Array3<f64>, Error> {
        let (frames, tracks, channels) = all_boxes.dim();
        if channels < 4 {
            return Err(Error::MissingChannels(channels));
        }
        if frames != times.len() {
            return Err(Error::LengthMismatch {
                boxes: frames,
                times: times.len(),
            });
        }
        if (frames, tracks) != self.frame_validity.dim() {
            return Err(Error::WindowMismatch {
                expected: self.frame_validity.dim(),
                got: (frames, tracks),
            });
        }

        let mut bridged = self.reconstruct(times)?;
        for ((frame, track), &used) in self.frame_validity.indexed_iter() {
            if used {
                bridged
                    .slice_mut(s![frame, track, ..])
                    .assign(&all_boxes.slice(s![frame, track, ..4]));
            }
        }
        Ok(bridged)
    }
}

/// Per-track result before it is written into the batch arrays.
struct TrackFit {
    parameters: MotionParameters,
    mask: Vec<bool>,
    confidence: f64,
}

/// Fits every track of a window independently.
#[derive(Debug, Clone, Default)]
pub struct BatchFitter {
    config: BatchConfig,
}

impl BatchFitter {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Fit a `(F, T, C)` window observed at `times`.
    ///
    /// Channels `0..4` are LTRB geometry, channel 4 (if present) is the existence flag and
    /// channel 5 (if present) the class confidence. Shape and ordering problems are returned as
    /// errors; a track that cannot be fitted gets the invalid block and zero confidence.
    pub fn fit(
        &self,
        all_boxes: ArrayView3<'_, f64>,
        times: ArrayView1<'_, f64>,
    ) -> Result<BatchFit, Error> {
        let (frames, tracks, channels) = all_boxes.dim();
        if channels < 4 {
            return Err(Error::MissingChannels(channels));
        }
        if frames != times.len() {
            return Err(Error::LengthMismatch {
                boxes: frames,
                times: times.len(),
            });
        }
        if frames == 0 {
            return Err(Error::Empty);
        }
        if tracks == 0 {
            return Err(Error::EmptyBatch);
        }
        let times = times.to_vec();
        check_increasing(&times)?;

        let fit_track =
            |track: usize| self.fit_track(all_boxes.index_axis(Axis(1), track), &times, track);
        let results = if self.config.parallel {
            (0..tracks)
                .into_par_iter()
                .map(fit_track)
                .collect::<Result<Vec<_>, Error>>()?
        } else {
            (0..tracks)
                .map(fit_track)
                .collect::<Result<Vec<_>, Error>>()?
        };

        let mut parameters = Array3::zeros((tracks, 4, 3));
        let mut frame_validity = Array2::from_elem((frames, tracks), false);
        let mut track_confidence = Array1::zeros(tracks);
        for (track, result) in results.into_iter().enumerate() {
            parameters
                .index_axis_mut(Axis(0), track)
                .assign(&result.parameters.to_array());
            frame_validity
                .column_mut(track)
                .assign(&Array1::from_vec(result.mask));
            track_confidence[track] = result.confidence;
        }

        Ok(BatchFit {
            parameters,
            frame_validity,
            track_confidence,
        })
    }

    /// Fit one `(F, C)` track column.
    fn fit_track(
        &self,
        column: ArrayView2<'_, f64>,
        times: &[f64],
        track: usize,
    ) -> Result<TrackFit, Error> {
        let channels = column.ncols();
        let mut mask = Vec::with_capacity(column.nrows());
        let mut boxes = Vec::new();
        let mut present_times = Vec::new();
        let mut confidence = if channels > CONFIDENCE_CHANNEL {
            f64::NEG_INFINITY
        } else {
            1.0
        };

        for (row, &t) in column.outer_iter().zip(times) {
            let bbox = BBox::new(row[0], row[1], row[2], row[3]);
            let exists = channels <= EXISTENCE_CHANNEL || row[EXISTENCE_CHANNEL] > 0.0;
            if channels > CONFIDENCE_CHANNEL {
                confidence = confidence.max(row[CONFIDENCE_CHANNEL]);
            }

            let used = exists && !bbox.is_missing() && bbox.is_finite();
            mask.push(used);
            if used {
                boxes.push(bbox);
                present_times.push(t);
            }
        }
        if !confidence.is_finite() {
            confidence = 0.0;
        }

        let rate = boxes.len() as f64 / times.len() as f64;
        let outcome = if rate < self.config.min_valid_rate {
            Err(Error::Fit(FitError::LowCoverage {
                rate,
                required: self.config.min_valid_rate,
            }))
        } else if boxes.is_empty() {
            Err(Error::Fit(FitError::InsufficientSamples {
                required: self.config.fit.min_samples,
                got: 0,
            }))
        } else {
            fit(&boxes, &present_times, &self.config.fit)
        };

        match outcome {
            Ok(parameters) => Ok(TrackFit {
                parameters,
                mask,
                confidence,
            }),
            Err(err) if err.is_degenerate() => {
                debug!(track, error = %err, "track fit rejected");
                Ok(TrackFit {
                    parameters: MotionParameters::INVALID,
                    mask,
                    confidence: 0.0,
                })
            }
            Err(err) => Err(err),
        }
    }
}

/// Fit a window with default settings and the given coverage threshold.
pub fn get_parameters(
    all_boxes: ArrayView3<'_, f64>,
    times: ArrayView1<'_, f64>,
    min_valid_rate: f64,
) -> Result<BatchFit, Error> {
    BatchFitter::new(BatchConfig::default().with_min_valid_rate(min_valid_rate))
        .fit(all_boxes, times)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn truth(shift: f64) -> MotionParameters {
        MotionParameters::new([
            [5.0 + shift, 0.05, 0.01],
            [4.0, -0.05, 0.02],
            [3.0, 0.0, 0.0],
            [2.5, 0.02, 0.0],
        ])
    }

    /// `(F, T, 6)` window where every track is present in every frame.
    fn window(frames: usize, tracks: usize) -> (Array3<f64>, Array1<f64>) {
        let times = Array1::from_shape_fn(frames, |f| f as f64 * 0.5);
        let mut data = Array3::zeros((frames, tracks, 6));
        for track in 0..tracks {
            let params = truth(track as f64 * 0.1);
            for (frame, &t) in times.iter().enumerate() {
                let ltrb = params.bbox_at(t).to_ltrb();
                data.slice_mut(s![frame, track, ..4]).assign(&Array1::from_vec(ltrb.to_vec()));
                data[[frame, track, EXISTENCE_CHANNEL]] = 1.0;
                data[[frame, track, CONFIDENCE_CHANNEL]] = 0.5 + 0.05 * frame as f64;
            }
        }
        (data, times)
    }

    #[test]
    fn test_fits_every_track() {
        let (data, times) = window(8, 3);
        let result = get_parameters(data.view(), times.view(), 0.5).unwrap();

        assert_eq!(result.parameters.dim(), (3, 4, 3));
        assert_eq!(result.frame_validity.dim(), (8, 3));
        assert!(result.frame_validity.iter().all(|&v| v));
        for track in 0..3 {
            let params = result.track_parameters(track).unwrap();
            assert_relative_eq!(params.rows()[0][0], 5.0 + track as f64 * 0.1, epsilon = 1e-5);
            // Max of the confidence channel.
            assert_relative_eq!(result.track_confidence[track], 0.85, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_failed_track_gets_sentinel() {
        let (mut data, times) = window(6, 2);
        // Track 1 is only seen twice.
        for frame in 2..6 {
            data.slice_mut(s![frame, 1, ..4]).fill(0.0);
        }

        let result = get_parameters(data.view(), times.view(), 0.0).unwrap();
        assert!(result.track_parameters(1).unwrap().is_invalid());
        assert_eq!(result.track_confidence[1], 0.0);
        assert_eq!(
            result.frame_validity.column(1).to_vec(),
            vec![true, true, false, false, false, false]
        );

        assert!(!result.track_parameters(0).unwrap().is_invalid());
        assert!(result.track_confidence[0] > 0.0);
    }

    #[test]
    fn test_existence_flag_masks_frames() {
        let (mut data, times) = window(6, 1);
        data[[3, 0, EXISTENCE_CHANNEL]] = 0.0;

        let result = get_parameters(data.view(), times.view(), 0.0).unwrap();
        assert!(!result.frame_validity[[3, 0]]);
        assert_eq!(result.frame_validity.iter().filter(|&&v| v).count(), 5);
        assert!(!result.track_parameters(0).unwrap().is_invalid());
    }

    #[test]
    fn test_coverage_threshold_is_inclusive() {
        let (mut data, times) = window(8, 2);
        // Track 0: 4 of 8 frames present. Track 1: 3 of 8.
        for frame in [1, 3, 5, 7] {
            data.slice_mut(s![frame, 0, ..4]).fill(0.0);
        }
        for frame in [0, 2, 4, 6, 7] {
            data.slice_mut(s![frame, 1, ..4]).fill(0.0);
        }

        let result = get_parameters(data.view(), times.view(), 0.5).unwrap();
        assert!(!result.track_parameters(0).unwrap().is_invalid());
        assert!(result.track_confidence[0] > 0.0);
        assert!(result.track_parameters(1).unwrap().is_invalid());
        assert_eq!(result.track_confidence[1], 0.0);
    }

    #[test]
    fn test_geometry_only_channels() {
        let (data, times) = window(5, 1);
        let geometry = data.slice(s![.., .., ..4]);

        let result = get_parameters(geometry, times.view(), 0.0).unwrap();
        assert_eq!(result.track_confidence[0], 1.0);
        assert!(!result.track_parameters(0).unwrap().is_invalid());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (mut data, times) = window(10, 6);
        data.slice_mut(s![0..8, 4, ..4]).fill(0.0);
        data[[5, 2, EXISTENCE_CHANNEL]] = 0.0;

        let parallel = BatchFitter::new(BatchConfig::default().with_parallel(true))
            .fit(data.view(), times.view())
            .unwrap();
        let sequential = BatchFitter::new(BatchConfig::default().with_parallel(false))
            .fit(data.view(), times.view())
            .unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_contract_violations() {
        let (data, times) = window(4, 2);

        let short = Array1::from_vec(vec![0.0, 1.0]);
        assert_eq!(
            get_parameters(data.view(), short.view(), 0.0),
            Err(Error::LengthMismatch { boxes: 4, times: 2 })
        );

        let narrow = data.slice(s![.., .., ..3]);
        assert_eq!(
            get_parameters(narrow, times.view(), 0.0),
            Err(Error::MissingChannels(3))
        );

        let none = data.slice(s![.., 0..0, ..]);
        assert_eq!(get_parameters(none, times.view(), 0.0), Err(Error::EmptyBatch));

        let reversed = Array1::from_vec(vec![3.0, 2.0, 1.0, 0.0]);
        assert!(matches!(
            get_parameters(data.view(), reversed.view(), 0.0),
            Err(Error::UnorderedTimes { index: 1, .. })
        ));
    }

    #[test]
    fn test_bridge_gaps_fills_occlusions() {
        let (mut data, times) = window(8, 1);
        let hidden = data.slice(s![4, 0, ..4]).to_owned();
        data.slice_mut(s![4, 0, ..4]).fill(0.0);

        let result = get_parameters(data.view(), times.view(), 0.0).unwrap();
        let bridged = result.bridge_gaps(data.view(), times.view()).unwrap();

        assert_eq!(bridged.dim(), (8, 1, 4));
        for c in 0..4 {
            assert_relative_eq!(bridged[[4, 0, c]], hidden[c], max_relative = 1e-4);
            assert_eq!(bridged[[2, 0, c]], data[[2, 0, c]]);
        }
    }

    #[test]
    fn test_bridge_gaps_rejects_other_windows() {
        let (data, times) = window(6, 2);
        let result = get_parameters(data.view(), times.view(), 0.0).unwrap();

        let (wider, _) = window(6, 3);
        assert_eq!(
            result.bridge_gaps(wider.view(), times.view()),
            Err(Error::WindowMismatch {
                expected: (6, 2),
                got: (6, 3)
            })
        );

        let short = times.slice(s![..4]);
        assert_eq!(
            result.bridge_gaps(data.view(), short),
            Err(Error::LengthMismatch { boxes: 6, times: 4 })
        );
    }

    #[test]
    fn test_solver_timeout_gives_sentinel() {
        let (data, times) = window(8, 2);
        let config =
            BatchConfig::default().with_fit_config(FitConfig::default().with_max_iterations(1));

        let result = BatchFitter::new(config).fit(data.view(), times.view()).unwrap();
        for track in 0..2 {
            assert!(result.track_parameters(track).unwrap().is_invalid());
            assert_eq!(result.track_confidence[track], 0.0);
        }
        // The frames were usable; only the solve failed.
        assert!(result.frame_validity.iter().all(|&v| v));
    }

    #[test]
    fn test_reconstruct_leaves_invalid_tracks_zero() {
        let (mut data, times) = window(6, 2);
        data.slice_mut(s![.., 1, ..4]).fill(0.0);

        let result = get_parameters(data.view(), times.view(), 0.0).unwrap();
        let boxes = result.reconstruct(times.view()).unwrap();
        assert!(boxes.slice(s![.., 1, ..]).iter().all(|&v| v == 0.0));
        assert!(boxes.slice(s![.., 0, ..]).iter().all(|&v| v != 0.0));
    }
}
