// Deterministic estimator driven by a closure
// Frames produced by `tagged_frame` carry their index in the first pixel so the
// script can answer per frame even when frames are estimated out of order.

use super::PoseEstimator;
use crate::models::pose::{PoseEstimate, PoseResult, LANDMARK_COUNT};
use image::{Rgb, RgbImage};

type Script = dyn Fn(&RgbImage) -> PoseResult<Option<PoseEstimate>> + Send + Sync;

pub struct ScriptedEstimator {
    landmark_count: usize,
    script: Box<Script>,
}

impl ScriptedEstimator {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&RgbImage) -> PoseResult<Option<PoseEstimate>> + Send + Sync + 'static,
    {
        Self::with_landmark_count(LANDMARK_COUNT, script)
    }

    pub fn with_landmark_count<F>(landmark_count: usize, script: F) -> Self
    where
        F: Fn(&RgbImage) -> PoseResult<Option<PoseEstimate>> + Send + Sync + 'static,
    {
        Self {
            landmark_count,
            script: Box::new(script),
        }
    }

    /// Script keyed by frame index, for frames built with `tagged_frame`
    pub fn by_frame<F>(script: F) -> Self
    where
        F: Fn(usize) -> PoseResult<Option<PoseEstimate>> + Send + Sync + 'static,
    {
        Self::new(move |image| match frame_tag(image) {
            Some(index) => script(index),
            None => Ok(None),
        })
    }
}

impl PoseEstimator for ScriptedEstimator {
    fn estimate(&self, frame: &RgbImage) -> PoseResult<Option<PoseEstimate>> {
        (self.script)(frame)
    }

    fn landmark_count(&self) -> usize {
        self.landmark_count
    }

    fn is_initialized(&self) -> bool {
        true
    }

    fn model_info(&self) -> String {
        format!("Scripted estimator ({} landmarks)", self.landmark_count)
    }
}

/// Small frame whose first pixel encodes `index` (24 bits, big-endian RGB)
pub fn tagged_frame(index: usize, width: u32, height: u32) -> RgbImage {
    let mut image = RgbImage::new(width.max(1), height.max(1));
    let tag = (index as u32) & 0x00ff_ffff;
    image.put_pixel(0, 0, Rgb([(tag >> 16) as u8, (tag >> 8) as u8, tag as u8]));
    image
}

pub fn frame_tag(image: &RgbImage) -> Option<usize> {
    if image.width() == 0 || image.height() == 0 {
        return None;
    }
    let [r, g, b] = image.get_pixel(0, 0).0;
    Some(((r as usize) << 16) | ((g as usize) << 8) | b as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pose::Landmark;

    #[test]
    fn test_frame_tag_round_trip() {
        for index in [0usize, 1, 255, 256, 70_000] {
            assert_eq!(frame_tag(&tagged_frame(index, 4, 3)), Some(index));
        }
        assert_eq!(frame_tag(&RgbImage::new(0, 0)), None);
    }

    #[test]
    fn test_by_frame_script() {
        let estimator = ScriptedEstimator::by_frame(|index| {
            Ok((index % 2 == 0).then(|| PoseEstimate {
                landmarks: vec![Landmark::new(0.5, 0.5, 0.0, 1.0); LANDMARK_COUNT],
                score: 1.0,
                processing_time_ms: 0,
            }))
        });
        assert!(estimator.estimate(&tagged_frame(2, 2, 2)).unwrap().is_some());
        assert!(estimator.estimate(&tagged_frame(3, 2, 2)).unwrap().is_none());
        assert!(estimator.estimate(&RgbImage::new(0, 0)).unwrap().is_none());
        assert_eq!(estimator.landmark_count(), LANDMARK_COUNT);
    }
}
