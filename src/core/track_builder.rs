// Accumulates per-frame estimates into a contiguous landmark track

use crate::models::capture::VideoInfo;
use crate::models::pipeline::{PipelineError, PipelineResult};
use crate::models::pose::LandmarkSet;
use crate::models::track::{FrameSample, Track};

/// Reject zero, negative, non-finite, and variable frame rates
pub fn validate_frame_rate(frame_rate: f64, variable: bool) -> PipelineResult<()> {
    if variable || !frame_rate.is_finite() || frame_rate <= 0.0 {
        return Err(PipelineError::InvalidFrameRate {
            frame_rate,
            variable,
        });
    }
    Ok(())
}

#[derive(Debug)]
pub struct TrackBuilder {
    frame_rate: f64,
    aspect_ratio: f64,
    samples: Vec<FrameSample>,
}

impl TrackBuilder {
    pub fn new(info: &VideoInfo) -> PipelineResult<Self> {
        validate_frame_rate(info.frame_rate, info.variable_frame_rate)?;
        Ok(Self {
            frame_rate: info.frame_rate,
            aspect_ratio: info.aspect_ratio(),
            samples: Vec::with_capacity(info.frame_count),
        })
    }

    pub fn with_frame_rate(frame_rate: f64, aspect_ratio: f64) -> PipelineResult<Self> {
        validate_frame_rate(frame_rate, false)?;
        Ok(Self {
            frame_rate,
            aspect_ratio,
            samples: Vec::new(),
        })
    }

    /// Index the next pushed sample must carry
    pub fn next_index(&self) -> usize {
        self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append one frame's result; `None` records a gap
    pub fn push(&mut self, frame_index: usize, landmarks: Option<LandmarkSet>) -> PipelineResult<()> {
        let expected = self.next_index();
        if frame_index != expected {
            return Err(PipelineError::FrameOrder {
                expected,
                actual: frame_index,
            });
        }

        self.samples.push(FrameSample {
            frame_index,
            timestamp: frame_index as f64 / self.frame_rate,
            landmarks,
        });
        Ok(())
    }

    /// Freeze the track
    pub fn finish(self) -> Track {
        Track {
            frame_rate: self.frame_rate,
            aspect_ratio: self.aspect_ratio,
            samples: self.samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pose::{Landmark, LANDMARK_COUNT};

    fn set() -> LandmarkSet {
        LandmarkSet::new([Landmark::new(0.5, 0.5, 0.0, 1.0); LANDMARK_COUNT])
    }

    #[test]
    fn test_invalid_frame_rates() {
        for rate in [0.0, -30.0, f64::NAN, f64::INFINITY] {
            let info = VideoInfo::new(rate, 10, 640, 480);
            assert!(matches!(
                TrackBuilder::new(&info),
                Err(PipelineError::InvalidFrameRate { .. })
            ));
        }

        let mut variable = VideoInfo::new(30.0, 10, 640, 480);
        variable.variable_frame_rate = true;
        assert!(matches!(
            TrackBuilder::new(&variable),
            Err(PipelineError::InvalidFrameRate { variable: true, .. })
        ));
    }

    #[test]
    fn test_builds_contiguous_track_with_gaps() {
        let mut builder = TrackBuilder::new(&VideoInfo::new(30.0, 4, 640, 480)).unwrap();
        builder.push(0, Some(set())).unwrap();
        builder.push(1, None).unwrap();
        builder.push(2, None).unwrap();
        builder.push(3, Some(set())).unwrap();

        let track = builder.finish();
        assert_eq!(track.len(), 4);
        assert_eq!(track.gap_runs(), vec![(1, 2)]);
        assert!((track.samples[3].timestamp - 0.1).abs() < 1e-12);
        assert!((track.aspect_ratio - 640.0 / 480.0).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_order_samples_are_rejected() {
        let mut builder = TrackBuilder::with_frame_rate(25.0, 1.0).unwrap();
        builder.push(0, None).unwrap();
        match builder.push(2, None) {
            Err(PipelineError::FrameOrder { expected, actual }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(builder.push(0, None).is_err());
        assert_eq!(builder.len(), 1);
    }
}
