// Video file source backed by the FFmpeg decoder

use super::{FrameSequencer, VideoSource};
use crate::core::ffmpeg_wrapper::{FFmpegDecoder, FFmpegError};
use crate::models::capture::{CaptureError, CaptureResult, VideoFrame, VideoInfo};
use image::RgbImage;
use std::path::Path;

impl From<FFmpegError> for CaptureError {
    fn from(err: FFmpegError) -> Self {
        match err {
            FFmpegError::DecodingError {
                frame_index,
                message,
            } => CaptureError::DecodeFailed {
                frame_index,
                message,
            },
            FFmpegError::NoVideoStream => CaptureError::UnsupportedFormat("No video stream found".to_string()),
            other => CaptureError::OpenFailed(other.to_string()),
        }
    }
}

pub struct FFmpegSource {
    decoder: FFmpegDecoder,
    info: VideoInfo,
    sequencer: FrameSequencer,
}

impl FFmpegSource {
    pub fn open<P: AsRef<Path>>(path: P) -> CaptureResult<Self> {
        let decoder = FFmpegDecoder::open(path.as_ref())?;
        let props = decoder.properties().clone();
        let info = VideoInfo {
            frame_rate: props.frame_rate,
            frame_count: props.frame_count,
            width: props.width,
            height: props.height,
            variable_frame_rate: props.variable_frame_rate,
        };
        log::info!(
            "Opened {:?}: {}x{} at {:.3} fps, ~{} frames",
            path.as_ref(),
            info.width,
            info.height,
            info.frame_rate,
            info.frame_count
        );
        // Only a count stored in the container is trusted for end-of-stream padding
        let expected = if props.frame_count_exact { props.frame_count } else { 0 };
        Ok(Self {
            decoder,
            info,
            sequencer: FrameSequencer::new(expected),
        })
    }
}

impl VideoSource for FFmpegSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> CaptureResult<Option<VideoFrame>> {
        let (width, height) = (self.info.width, self.info.height);
        let decoder = &mut self.decoder;
        self.sequencer.next_frame(|| {
            let picture = match decoder.next_picture()? {
                Some(picture) => picture,
                None => return Ok(None),
            };
            let image = RgbImage::from_raw(width, height, picture.rgb).ok_or_else(|| CaptureError::DecodeFailed {
                frame_index: picture.index,
                message: "Decoded buffer does not match frame size".to_string(),
            })?;
            Ok(Some((picture.index, image)))
        })
    }
}
