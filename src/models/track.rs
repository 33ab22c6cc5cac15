// Time-indexed landmark tracks, raw and smoothed

use crate::models::pose::LandmarkSet;
use serde::{Deserialize, Serialize};

/// Landmarks for one source frame; `landmarks` is None for a gap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    pub frame_index: usize,
    pub timestamp: f64,
    pub landmarks: Option<LandmarkSet>,
}

impl FrameSample {
    pub fn is_gap(&self) -> bool {
        self.landmarks.is_none()
    }
}

/// Raw per-frame landmark track, one sample per source frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub frame_rate: f64,
    /// Source frame width over height
    pub aspect_ratio: f64,
    pub samples: Vec<FrameSample>,
}

impl Track {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.frame_rate
    }

    pub fn detected_frames(&self) -> usize {
        self.samples.iter().filter(|s| !s.is_gap()).count()
    }

    /// Lengths of consecutive gap runs, in track order
    pub fn gap_runs(&self) -> Vec<(usize, usize)> {
        let mut runs = Vec::new();
        let mut start: Option<usize> = None;
        for (i, sample) in self.samples.iter().enumerate() {
            match (sample.is_gap(), start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    runs.push((s, i - s));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push((s, self.samples.len() - s));
        }
        runs
    }

    /// Motion data in the worker's JSON shape: only detected frames are listed
    pub fn to_motion_json(&self) -> serde_json::Value {
        let frames: Vec<serde_json::Value> = self
            .samples
            .iter()
            .filter_map(|sample| {
                sample.landmarks.as_ref().map(|set| {
                    serde_json::json!({
                        "frame": sample.frame_index,
                        "timestamp": sample.timestamp,
                        "landmarks": set.as_slice(),
                    })
                })
            })
            .collect();

        serde_json::json!({
            "fps": self.frame_rate,
            "duration": self.duration_secs(),
            "frameCount": self.samples.len(),
            "frames": frames,
        })
    }
}

/// How a smoothed frame's landmarks were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFill {
    /// Detected in the source frame
    Observed,
    /// Short gap, linearly interpolated between neighbours
    Interpolated,
    /// Long or unbounded gap, repeats the last known pose
    Held,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothedFrame {
    pub frame_index: usize,
    pub timestamp: f64,
    /// None only when the whole track has no detection
    pub landmarks: Option<LandmarkSet>,
    pub fill: FrameFill,
}

/// Output of the temporal smoother; same length as its input track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothedTrack {
    pub frame_rate: f64,
    pub aspect_ratio: f64,
    pub frames: Vec<SmoothedFrame>,
}

impl SmoothedTrack {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn count_fill(&self, fill: FrameFill) -> usize {
        self.frames.iter().filter(|f| f.fill == fill).count()
    }
}
