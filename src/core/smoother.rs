// Temporal smoothing of landmark tracks
// Fills short gaps, holds across long ones, then filters each channel independently

use crate::models::pose::{LandmarkSet, LANDMARK_COUNT};
use crate::models::track::{FrameFill, SmoothedFrame, SmoothedTrack, Track};
use serde::{Deserialize, Serialize};

/// Per-channel low-pass filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingFilter {
    /// Causal exponential moving average, alpha = 2 / (window + 1)
    Exponential,
    /// Centered quadratic least-squares fit (zero lag, not causal)
    SavitzkyGolay,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmootherConfig {
    pub window: usize,
    pub filter: SmoothingFilter,
    pub smooth_confidence: bool,
    pub max_gap_frames: usize,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            window: 3,
            filter: SmoothingFilter::Exponential,
            smooth_confidence: false,
            max_gap_frames: 5,
        }
    }
}

/// x, y, z, visibility for every landmark
type Channels = [f64; LANDMARK_COUNT * 4];

fn to_channels(set: &LandmarkSet) -> Channels {
    let mut out = [0.0; LANDMARK_COUNT * 4];
    for (i, l) in set.as_slice().iter().enumerate() {
        out[i * 4] = l.x as f64;
        out[i * 4 + 1] = l.y as f64;
        out[i * 4 + 2] = l.z as f64;
        out[i * 4 + 3] = l.visibility as f64;
    }
    out
}

/// Write filtered channels back; visibility is only replaced when `with_visibility` is set
fn apply_channels(set: &mut LandmarkSet, channels: &Channels, with_visibility: bool) {
    for (i, l) in set.as_mut_slice().iter_mut().enumerate() {
        l.x = channels[i * 4] as f32;
        l.y = channels[i * 4 + 1] as f32;
        l.z = channels[i * 4 + 2] as f32;
        if with_visibility {
            l.visibility = channels[i * 4 + 3] as f32;
        }
    }
}

pub struct TemporalSmoother {
    config: SmootherConfig,
}

impl TemporalSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    /// Smooth a raw track; output has exactly one frame per input sample
    pub fn smooth(&self, track: &Track) -> SmoothedTrack {
        let (filled, fills) = self.fill_gaps(track);

        let filtered = match self.config.filter {
            SmoothingFilter::Exponential => self.exponential(&filled),
            SmoothingFilter::SavitzkyGolay => self.savitzky_golay(&filled),
        };

        // Held frames repeat the last filtered pose; leading ones the first
        let first = filtered.iter().flatten().next().cloned();
        let mut last: Option<LandmarkSet> = None;
        let frames = track
            .samples
            .iter()
            .zip(fills)
            .zip(filtered)
            .map(|((sample, fill), output)| {
                let landmarks = match output {
                    Some(set) => {
                        last = Some(set.clone());
                        Some(set)
                    }
                    None => last.clone().or_else(|| first.clone()),
                };
                SmoothedFrame {
                    frame_index: sample.frame_index,
                    timestamp: sample.timestamp,
                    landmarks,
                    fill,
                }
            })
            .collect();

        SmoothedTrack {
            frame_rate: track.frame_rate,
            aspect_ratio: track.aspect_ratio,
            frames,
        }
    }

    /// Interpolate bounded interior gaps; everything else stays empty and is tagged Held
    fn fill_gaps(&self, track: &Track) -> (Vec<Option<LandmarkSet>>, Vec<FrameFill>) {
        let mut filled: Vec<Option<LandmarkSet>> =
            track.samples.iter().map(|s| s.landmarks.clone()).collect();
        let mut fills: Vec<FrameFill> = track
            .samples
            .iter()
            .map(|s| if s.is_gap() { FrameFill::Held } else { FrameFill::Observed })
            .collect();

        for (start, len) in track.gap_runs() {
            let end = start + len;
            if start == 0 || end >= track.samples.len() || len > self.config.max_gap_frames {
                continue;
            }
            let (before, after) = match (&track.samples[start - 1].landmarks, &track.samples[end].landmarks) {
                (Some(b), Some(a)) => (b, a),
                _ => continue,
            };
            let span = (len + 1) as f32;
            for i in start..end {
                let t = (i - start + 1) as f32 / span;
                filled[i] = Some(before.lerp(after, t));
                fills[i] = FrameFill::Interpolated;
            }
        }

        (filled, fills)
    }

    /// EMA over the non-held frames; state is frozen across held runs
    fn exponential(&self, input: &[Option<LandmarkSet>]) -> Vec<Option<LandmarkSet>> {
        let alpha = 2.0 / (self.config.window as f64 + 1.0);
        let mut state: Option<Channels> = None;

        input
            .iter()
            .map(|frame| {
                let set = frame.as_ref()?;
                let current = to_channels(set);
                let next = match state {
                    Some(prev) => {
                        let mut out = prev;
                        for (o, c) in out.iter_mut().zip(current.iter()) {
                            *o = alpha * c + (1.0 - alpha) * *o;
                        }
                        out
                    }
                    None => current,
                };
                state = Some(next);

                let mut smoothed = set.clone();
                apply_channels(&mut smoothed, &next, self.config.smooth_confidence);
                Some(smoothed)
            })
            .collect()
    }

    /// Quadratic Savitzky-Golay over each contiguous run of non-held frames
    fn savitzky_golay(&self, input: &[Option<LandmarkSet>]) -> Vec<Option<LandmarkSet>> {
        let half = self.config.window / 2;
        let channels: Vec<Option<Channels>> =
            input.iter().map(|f| f.as_ref().map(to_channels)).collect();
        let mut output: Vec<Option<LandmarkSet>> = vec![None; input.len()];

        let mut i = 0;
        while i < input.len() {
            if input[i].is_none() {
                i += 1;
                continue;
            }
            let start = i;
            while i < input.len() && input[i].is_some() {
                i += 1;
            }
            let end = i;

            for center in start..end {
                // Shrink the window symmetrically near segment ends
                let h = half.min(center - start).min(end - 1 - center);
                let weights = savitzky_golay_weights(h);
                let mut acc = [0.0; LANDMARK_COUNT * 4];
                for (k, w) in weights.iter().enumerate() {
                    if let Some(sample) = &channels[center + k - h] {
                        for (a, v) in acc.iter_mut().zip(sample.iter()) {
                            *a += w * v;
                        }
                    }
                }
                if let Some(set) = &input[center] {
                    let mut smoothed = set.clone();
                    apply_channels(&mut smoothed, &acc, self.config.smooth_confidence);
                    output[center] = Some(smoothed);
                }
            }
        }

        output
    }
}

/// Center-point weights of a quadratic fit over 2h+1 samples
fn savitzky_golay_weights(h: usize) -> Vec<f64> {
    if h == 0 {
        return vec![1.0];
    }
    let hf = h as f64;
    let norm = (2.0 * hf + 1.0) * (4.0 * hf * hf + 4.0 * hf - 3.0);
    (-(h as i64)..=h as i64)
        .map(|j| {
            let j = j as f64;
            (3.0 * (3.0 * hf * hf + 3.0 * hf - 1.0) - 15.0 * j * j) / norm
        })
        .collect()
}
