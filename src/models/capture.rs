// Data structures for decoded video input

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Stream-level properties reported by a video source before decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Source frame rate in frames per second
    pub frame_rate: f64,
    /// Total frame count as reported by the container
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
    /// True when the container reports a variable frame rate
    pub variable_frame_rate: bool,
}

impl VideoInfo {
    pub fn new(frame_rate: f64, frame_count: usize, width: u32, height: u32) -> Self {
        Self {
            frame_rate,
            frame_count,
            width,
            height,
            variable_frame_rate: false,
        }
    }

    /// Width over height, 1.0 when dimensions are unknown
    pub fn aspect_ratio(&self) -> f64 {
        if self.width == 0 || self.height == 0 {
            1.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.frame_rate > 0.0 {
            self.frame_count as f64 / self.frame_rate
        } else {
            0.0
        }
    }
}

/// A decoded RGB frame (3 channels, 8 bits each)
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// 0-based position in the source stream
    pub index: usize,
    pub image: RgbImage,
}

impl VideoFrame {
    pub fn new(index: usize, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Error types for video sources
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Failed to open video: {0}")]
    OpenFailed(String),

    #[error("Decode failed at frame {frame_index}: {message}")]
    DecodeFailed { frame_index: usize, message: String },

    #[error("Unsupported video format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CaptureResult<T> = Result<T, CaptureError>;
