// Video sources: the frame-producing side of the pipeline
// Each source reports stream properties up front, then yields decoded RGB frames in order

pub mod image_sequence;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use crate::models::capture::{CaptureResult, VideoFrame, VideoInfo};
use image::RgbImage;
use std::collections::VecDeque;

pub use image_sequence::ImageSequenceSource;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FFmpegSource;

/// A decodable video handle
pub trait VideoSource: Send {
    /// Stream properties, available before the first frame is decoded
    fn info(&self) -> &VideoInfo;

    /// Decode the next frame, or None once the stream is exhausted
    fn next_frame(&mut self) -> CaptureResult<Option<VideoFrame>>;
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
    fn info(&self) -> &VideoInfo {
        (**self).info()
    }

    fn next_frame(&mut self) -> CaptureResult<Option<VideoFrame>> {
        (**self).next_frame()
    }
}

/// Frames held in memory, mostly for tests and fixtures
pub struct InMemorySource {
    info: VideoInfo,
    frames: VecDeque<VideoFrame>,
}

impl InMemorySource {
    /// Frame indices are reassigned in order; `info.frame_count` follows the frame list
    pub fn new(mut info: VideoInfo, frames: Vec<image::RgbImage>) -> Self {
        info.frame_count = frames.len();
        if let Some(first) = frames.first() {
            info.width = first.width();
            info.height = first.height();
        }
        let frames = frames
            .into_iter()
            .enumerate()
            .map(|(index, image)| VideoFrame::new(index, image))
            .collect();
        Self { info, frames }
    }
}

impl VideoSource for InMemorySource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> CaptureResult<Option<VideoFrame>> {
        Ok(self.frames.pop_front())
    }
}

// ==============================================================================
// Frame Sequencing
// ==============================================================================

/// Keeps frame indices contiguous for decoders that can lose pictures
///
/// Pictures carry their presentation index. Skipped indices come out as empty
/// (0x0) frames, which the estimator records as gaps. Once the decoder runs dry,
/// empty frames pad the stream up to `expected` frames.
#[derive(Debug, Default)]
pub struct FrameSequencer {
    next: usize,
    expected: usize,
    pending: Option<VideoFrame>,
    filled: usize,
}

impl FrameSequencer {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            ..Self::default()
        }
    }

    /// Empty frames emitted so far
    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn next_frame<F>(&mut self, mut decode: F) -> CaptureResult<Option<VideoFrame>>
    where
        F: FnMut() -> CaptureResult<Option<(usize, RgbImage)>>,
    {
        if self.pending.is_none() {
            match decode()? {
                // Repeated or out-of-order timestamps take the next free slot
                Some((index, image)) => self.pending = Some(VideoFrame::new(index.max(self.next), image)),
                None if self.next < self.expected => return Ok(Some(self.empty_frame())),
                None => return Ok(None),
            }
        }

        match self.pending.take() {
            Some(frame) if frame.index > self.next => {
                self.pending = Some(frame);
                Ok(Some(self.empty_frame()))
            }
            Some(frame) => {
                self.next = frame.index + 1;
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    fn empty_frame(&mut self) -> VideoFrame {
        log::warn!("Frame {} could not be decoded, recording a gap", self.next);
        let frame = VideoFrame::new(self.next, RgbImage::new(0, 0));
        self.next += 1;
        self.filled += 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sequencer: &mut FrameSequencer, decoded: Vec<usize>) -> Vec<(usize, u32)> {
        let mut pictures = decoded.into_iter();
        let mut out = Vec::new();
        while let Some(frame) = sequencer
            .next_frame(|| Ok(pictures.next().map(|i| (i, RgbImage::new(2, 2)))))
            .unwrap()
        {
            out.push((frame.index, frame.width()));
        }
        out
    }

    #[test]
    fn test_sequencer_fills_lost_pictures() {
        let mut sequencer = FrameSequencer::new(0);
        let frames = drain(&mut sequencer, vec![0, 1, 2, 4, 5]);
        assert_eq!(frames, vec![(0, 2), (1, 2), (2, 2), (3, 0), (4, 2), (5, 2)]);
        assert_eq!(sequencer.filled(), 1);
    }

    #[test]
    fn test_sequencer_pads_to_expected_count() {
        let mut sequencer = FrameSequencer::new(5);
        let frames = drain(&mut sequencer, vec![0, 1, 2]);
        assert_eq!(frames, vec![(0, 2), (1, 2), (2, 2), (3, 0), (4, 0)]);
    }

    #[test]
    fn test_sequencer_renumbers_repeated_timestamps() {
        let mut sequencer = FrameSequencer::new(0);
        let frames = drain(&mut sequencer, vec![0, 0, 1, 3]);
        assert_eq!(frames, vec![(0, 2), (1, 2), (2, 2), (3, 2)]);
        assert_eq!(sequencer.filled(), 0);
    }

    #[test]
    fn test_in_memory_source_yields_frames_in_order() {
        let frames = vec![RgbImage::new(4, 2); 3];
        let mut source: Box<dyn VideoSource> =
            Box::new(InMemorySource::new(VideoInfo::new(24.0, 0, 0, 0), frames));

        assert_eq!(source.info().frame_count, 3);
        assert_eq!(source.info().width, 4);
        assert_eq!(source.info().aspect_ratio(), 2.0);

        for expected in 0..3 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.index, expected);
        }
        assert!(source.next_frame().unwrap().is_none());
    }
}
