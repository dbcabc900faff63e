//! Builder for assembling observation windows from per-frame records.

use std::collections::BTreeMap;

use ndarray::{Array1, Array3};

use super::TrackWindow;
use crate::error::Error;
use crate::motion::{BBox, CONFIDENCE_CHANNEL, EXISTENCE_CHANNEL};

/// Number of channels in an assembled window.
pub const WINDOW_CHANNELS: usize = 6;

/// Frame times in seconds relative to the first selected frame.
pub fn frame_times(frame_indexes: &[u64], fps: f64) -> Array1<f64> {
    let first = frame_indexes.first().copied().unwrap_or(0);
    frame_indexes
        .iter()
        .map(|&idx| (idx as f64 - first as f64) / fps)
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Record {
    bbox: BBox,
    confidence: f64,
}

/// Collects `(frame, track, box, confidence)` records into a `(F, T, 6)` window.
///
/// Tracks become columns in ascending id order. Frames without a record for a track are left
/// all-zero, which the batch fitter reads as missing.
#[derive(Debug, Clone, Default)]
pub struct WindowBuilder {
    frames: Vec<u64>,
    records: BTreeMap<u64, BTreeMap<u64, Record>>,
}

impl WindowBuilder {
    /// Create a builder for the given frame indexes (must be strictly increasing).
    pub fn new(frames: Vec<u64>) -> Self {
        Self {
            frames,
            records: BTreeMap::new(),
        }
    }

    /// Record an observation. Frames outside the window are ignored.
    pub fn observe(mut self, frame: u64, track_id: u64, bbox: BBox, confidence: f64) -> Self {
        if self.frames.contains(&frame) {
            self.records
                .entry(track_id)
                .or_default()
                .insert(frame, Record { bbox, confidence });
        }
        self
    }

    /// Build the window, computing times from `fps`.
    pub fn build(self, fps: f64) -> Result<TrackWindow, Error> {
        if self.frames.is_empty() {
            return Err(Error::Empty);
        }
        if self.records.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let times = frame_times(&self.frames, fps);
        let mut boxes = Array3::zeros((self.frames.len(), self.records.len(), WINDOW_CHANNELS));
        for (column, records) in self.records.values().enumerate() {
            for (row, frame) in self.frames.iter().enumerate() {
                let Some(record) = records.get(frame) else {
                    continue;
                };
                for (c, v) in record.bbox.to_ltrb().into_iter().enumerate() {
                    boxes[[row, column, c]] = v;
                }
                boxes[[row, column, EXISTENCE_CHANNEL]] = 1.0;
                boxes[[row, column, CONFIDENCE_CHANNEL]] = record.confidence;
            }
        }

        Ok(TrackWindow {
            track_ids: self.records.into_keys().collect(),
            boxes,
            times,
        })
    }
}
