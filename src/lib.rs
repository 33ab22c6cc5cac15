pub mod core;
pub mod models;
pub mod platform;

pub use core::config::MocapConfig;
pub use core::pipeline::{MotionCapture, MotionCapturePipeline};
pub use models::animation::AnimationDocument;
pub use models::pipeline::{MotionCaptureReport, PipelineError, PipelineResult};
pub use models::skeleton::Skeleton;
