// Skeletal animation document produced by the mapper

use crate::models::skeleton::Skeleton;
use crate::models::track::FrameFill;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Per-bone channel values for one frame
///
/// `rotation` is relative to the bone's rest orientation, so the identity means "at rest".
/// Only the root carries a translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoneChannel {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Option<Vector3<f64>>,
}

impl BoneChannel {
    pub fn rotation(rotation: UnitQuaternion<f64>) -> Self {
        Self {
            rotation,
            translation: None,
        }
    }

    pub fn root(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation: Some(translation),
        }
    }
}

impl Default for BoneChannel {
    fn default() -> Self {
        Self::rotation(UnitQuaternion::identity())
    }
}

/// All bone channels for one frame, in skeleton (depth-first) order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameChannels {
    pub frame_index: usize,
    pub timestamp: f64,
    pub fill: FrameFill,
    pub channels: Vec<BoneChannel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationDocument {
    pub skeleton: Skeleton,
    pub frame_rate: f64,
    pub frames: Vec<FrameChannels>,
}

impl AnimationDocument {
    pub fn new(skeleton: Skeleton, frame_rate: f64, frames: Vec<FrameChannels>) -> Self {
        Self {
            skeleton,
            frame_rate,
            frames,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Seconds per frame
    pub fn frame_time(&self) -> f64 {
        1.0 / self.frame_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames.len() as f64 / self.frame_rate
    }

    pub fn bone_count(&self) -> usize {
        self.skeleton.len()
    }

    /// JSON rendition with bone hierarchy and raw channel quaternions
    pub fn to_json(&self) -> serde_json::Result<String> {
        let bones: Vec<BoneView<'_>> = self
            .skeleton
            .bones()
            .iter()
            .map(|bone| BoneView {
                name: &bone.name,
                parent: bone.parent,
                offset: [bone.offset.x, bone.offset.y, bone.offset.z],
                orientation: [
                    bone.orientation.i,
                    bone.orientation.j,
                    bone.orientation.k,
                    bone.orientation.w,
                ],
            })
            .collect();

        let view = DocumentView {
            skeleton: &self.skeleton.name,
            frame_rate: self.frame_rate,
            frame_count: self.frame_count(),
            duration: self.duration_secs(),
            bones,
            frames: &self.frames,
        };
        serde_json::to_string_pretty(&view)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentView<'a> {
    skeleton: &'a str,
    frame_rate: f64,
    frame_count: usize,
    duration: f64,
    bones: Vec<BoneView<'a>>,
    frames: &'a [FrameChannels],
}

#[derive(Serialize)]
struct BoneView<'a> {
    name: &'a str,
    parent: Option<usize>,
    offset: [f64; 3],
    orientation: [f64; 4],
}
