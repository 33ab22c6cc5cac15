// Pose estimation stage
// Wraps an estimator backend so every frame yields a landmark set or a gap

use crate::models::capture::VideoFrame;
use crate::models::pipeline::{PipelineError, PipelineResult};
use crate::models::pose::{LandmarkSet, PoseConfig, LANDMARK_COUNT};
use crate::platform::pose::PoseEstimator;
use log::debug;

/// A validated single-frame detection
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub landmarks: LandmarkSet,
    pub score: f32,
}

/// Fail before any frame when the backend cannot produce the canonical topology
pub fn check_topology(estimator: &dyn PoseEstimator) -> PipelineResult<()> {
    let actual = estimator.landmark_count();
    if actual != LANDMARK_COUNT {
        return Err(PipelineError::UnsupportedTopology {
            expected: LANDMARK_COUNT,
            actual,
            frame_index: None,
        });
    }
    Ok(())
}

/// Run the estimator on one frame
///
/// Empty frames, backend failures, and non-finite output all become `Ok(None)`.
/// Only a landmark set of the wrong size is fatal.
pub fn estimate_frame(estimator: &dyn PoseEstimator, frame: &VideoFrame) -> PipelineResult<Option<Detection>> {
    if frame.width() == 0 || frame.height() == 0 {
        debug!("Frame {} is empty, recording a gap", frame.index);
        return Ok(None);
    }

    let estimate = match estimator.estimate(&frame.image) {
        Ok(Some(estimate)) => estimate,
        Ok(None) => return Ok(None),
        Err(e) => {
            debug!("Estimator failed on frame {}: {}", frame.index, e);
            return Ok(None);
        }
    };

    if estimate.landmarks.len() != LANDMARK_COUNT {
        return Err(PipelineError::UnsupportedTopology {
            expected: LANDMARK_COUNT,
            actual: estimate.landmarks.len(),
            frame_index: Some(frame.index),
        });
    }

    if !estimate.score.is_finite() || estimate.landmarks.iter().any(|l| !l.is_finite()) {
        debug!("Non-finite estimate on frame {}, recording a gap", frame.index);
        return Ok(None);
    }

    let mut landmarks = LandmarkSet::from_slice(&estimate.landmarks)?;
    for landmark in landmarks.as_mut_slice() {
        landmark.visibility = landmark.visibility.clamp(0.0, 1.0);
    }

    Ok(Some(Detection {
        landmarks,
        score: estimate.score.clamp(0.0, 1.0),
    }))
}

// ==============================================================================
// Detection / Tracking Gate
// ==============================================================================

/// Applies the detection threshold after a gap and the tracking threshold while tracking
///
/// Frames must be fed in order.
#[derive(Debug, Clone)]
pub struct DetectionGate {
    min_detection_confidence: f32,
    min_tracking_confidence: f32,
    tracking: bool,
}

impl DetectionGate {
    pub fn new(config: &PoseConfig) -> Self {
        Self {
            min_detection_confidence: config.min_detection_confidence,
            min_tracking_confidence: config.min_tracking_confidence,
            tracking: false,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Accept or reject the next frame's detection
    pub fn admit(&mut self, detection: Option<Detection>) -> Option<LandmarkSet> {
        let threshold = if self.tracking {
            self.min_tracking_confidence
        } else {
            self.min_detection_confidence
        };

        let accepted = detection.filter(|d| d.score >= threshold).map(|d| d.landmarks);
        self.tracking = accepted.is_some();
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pose::{Landmark, PoseError, PoseEstimate};
    use crate::platform::pose::ScriptedEstimator;
    use image::RgbImage;

    fn estimate(count: usize, score: f32) -> PoseEstimate {
        PoseEstimate {
            landmarks: vec![Landmark::new(0.5, 0.5, 0.0, 1.5); count],
            score,
            processing_time_ms: 1,
        }
    }

    fn frame(index: usize) -> VideoFrame {
        VideoFrame::new(index, RgbImage::new(8, 8))
    }

    fn detection(score: f32) -> Option<Detection> {
        Some(Detection {
            landmarks: LandmarkSet::from_slice(&estimate(LANDMARK_COUNT, score).landmarks).unwrap(),
            score,
        })
    }

    #[test]
    fn test_topology_check() {
        let ok = ScriptedEstimator::new(|_| Ok(None));
        assert!(check_topology(&ok).is_ok());

        let partial = ScriptedEstimator::with_landmark_count(17, |_| Ok(None));
        assert!(matches!(
            check_topology(&partial),
            Err(PipelineError::UnsupportedTopology {
                expected: 33,
                actual: 17,
                frame_index: None
            })
        ));
    }

    #[test]
    fn test_valid_estimate_clamps_visibility() {
        let estimator = ScriptedEstimator::new(|_| Ok(Some(estimate(LANDMARK_COUNT, 0.9))));
        let detection = estimate_frame(&estimator, &frame(0)).unwrap().unwrap();
        assert_eq!(detection.score, 0.9);
        assert!(detection.landmarks.as_slice().iter().all(|l| l.visibility == 1.0));
    }

    #[test]
    fn test_failures_become_gaps() {
        let failing = ScriptedEstimator::new(|_| Err(PoseError::InferenceFailed("boom".to_string())));
        assert!(estimate_frame(&failing, &frame(3)).unwrap().is_none());

        let detecting = ScriptedEstimator::new(|_| Ok(Some(estimate(LANDMARK_COUNT, 1.0))));
        let empty = VideoFrame::new(4, RgbImage::new(0, 0));
        assert!(estimate_frame(&detecting, &empty).unwrap().is_none());

        let nan = ScriptedEstimator::new(|_| {
            let mut e = estimate(LANDMARK_COUNT, 1.0);
            e.landmarks[5].x = f32::NAN;
            Ok(Some(e))
        });
        assert!(estimate_frame(&nan, &frame(5)).unwrap().is_none());
    }

    #[test]
    fn test_wrong_size_set_reports_frame() {
        let estimator = ScriptedEstimator::new(|_| Ok(Some(estimate(17, 1.0))));
        assert!(matches!(
            estimate_frame(&estimator, &frame(7)),
            Err(PipelineError::UnsupportedTopology {
                actual: 17,
                frame_index: Some(7),
                ..
            })
        ));
    }

    #[test]
    fn test_gate_uses_detection_then_tracking_threshold() {
        let config = PoseConfig {
            min_detection_confidence: 0.8,
            min_tracking_confidence: 0.3,
            ..PoseConfig::default()
        };
        let mut gate = DetectionGate::new(&config);

        // Below detection threshold while not tracking
        assert!(gate.admit(detection(0.5)).is_none());
        assert!(!gate.is_tracking());

        assert!(gate.admit(detection(0.85)).is_some());
        assert!(gate.is_tracking());

        // Tracking threshold now applies
        assert!(gate.admit(detection(0.5)).is_some());
        assert!(gate.admit(detection(0.2)).is_none());

        // Back to the detection threshold after the gap
        assert!(gate.admit(detection(0.5)).is_none());
        assert!(gate.admit(None).is_none());
        assert!(gate.admit(detection(0.9)).is_some());
    }
}
