// Pose estimation platform integration
// Provides the estimator capability trait, MediaPipe backends, and a scripted test double

pub mod mediapipe_bridge;
pub mod scripted;

use crate::models::pose::{PoseEstimate, PoseResult};
use image::RgbImage;

pub use mediapipe_bridge::{DefaultMediaPipe, NullEstimator};
pub use scripted::ScriptedEstimator;

/// Single-frame pose estimation capability
///
/// Implementations must be callable from several blocking threads at once.
pub trait PoseEstimator: Send + Sync {
    /// Estimate one pose, or Ok(None) when nobody is detected
    fn estimate(&self, frame: &RgbImage) -> PoseResult<Option<PoseEstimate>>;

    /// Number of landmarks every estimate carries
    fn landmark_count(&self) -> usize;

    /// Check if models are loaded
    fn is_initialized(&self) -> bool;

    /// Get model info
    fn model_info(&self) -> String;
}
