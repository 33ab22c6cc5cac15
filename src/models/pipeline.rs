// Pipeline-level errors and the processing report

use crate::models::capture::CaptureError;
use crate::models::pose::PoseError;
use crate::models::skeleton::SkeletonError;
use serde::{Deserialize, Serialize};

/// Summary of one motion capture run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionCaptureReport {
    pub run_id: String,
    pub fps: f64,
    pub duration: f64,
    pub frame_count: usize,
    pub bone_count: usize,
    pub detected_frames: usize,
    pub interpolated_frames: usize,
    pub held_frames: usize,
    pub formats: Vec<String>,
    pub completed_at: i64, // Unix timestamp (ms)
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Recorded as a gap by the estimator stage, never returned from a run
    #[error("No pose detected at frame {frame_index}")]
    NoDetection { frame_index: usize },

    #[error("Invalid frame rate {frame_rate} (variable: {variable})")]
    InvalidFrameRate { frame_rate: f64, variable: bool },

    #[error("Estimator topology has {actual} landmarks, expected {expected} (frame {frame_index:?})")]
    UnsupportedTopology {
        expected: usize,
        actual: usize,
        frame_index: Option<usize>,
    },

    #[error("Root landmark missing in {missing} of {total} frames")]
    MissingRootLandmark { missing: usize, total: usize },

    #[error("Failed to write animation: {0}")]
    SerializationIO(#[from] std::io::Error),

    #[error("Invalid skeleton: {0}")]
    InvalidSkeleton(#[from] SkeletonError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to decode frame {frame_index}: {message}")]
    Decode { frame_index: usize, message: String },

    #[error("Video source error: {0}")]
    Source(CaptureError),

    #[error("Frame {actual} arrived out of order, expected {expected}")]
    FrameOrder { expected: usize, actual: usize },

    #[error("Estimator error: {0}")]
    Estimator(#[from] PoseError),

    #[error("Estimation task failed: {0}")]
    TaskFailed(String),
}

impl From<CaptureError> for PipelineError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::DecodeFailed {
                frame_index,
                message,
            } => PipelineError::Decode {
                frame_index,
                message,
            },
            other => PipelineError::Source(other),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
