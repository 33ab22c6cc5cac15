// Directory of numbered still images treated as a constant-rate video

use super::VideoSource;
use crate::models::capture::{CaptureError, CaptureResult, VideoFrame, VideoInfo};
use image::RgbImage;
use std::path::{Path, PathBuf};

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct ImageSequenceSource {
    info: VideoInfo,
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    /// Collect image files from `dir`, ordered by file name
    pub fn open<P: AsRef<Path>>(dir: P, frame_rate: f64) -> CaptureResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(CaptureError::OpenFailed(format!("{:?} is not a directory", dir)));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map_or(false, |ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(CaptureError::UnsupportedFormat(format!("No image files in {:?}", dir)));
        }

        let (width, height) = image::image_dimensions(&paths[0])
            .map_err(|e| CaptureError::OpenFailed(format!("{:?}: {}", paths[0], e)))?;

        log::info!("Opened image sequence {:?}: {} frames at {} fps", dir, paths.len(), frame_rate);

        Ok(Self {
            info: VideoInfo::new(frame_rate, paths.len(), width, height),
            paths,
            next: 0,
        })
    }
}

impl VideoSource for ImageSequenceSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> CaptureResult<Option<VideoFrame>> {
        let index = self.next;
        let path = match self.paths.get(index) {
            Some(path) => path,
            None => return Ok(None),
        };
        self.next += 1;

        // Unreadable images become empty frames, which estimate as "no pose"
        let image = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                log::warn!("Failed to decode frame {} ({:?}): {}", index, path, e);
                RgbImage::new(0, 0)
            }
        };
        Ok(Some(VideoFrame::new(index, image)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_sorted_frames() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("frame_002.png", 20u8), ("frame_000.png", 0), ("frame_001.png", 10)] {
            RgbImage::from_pixel(8, 6, image::Rgb([shade, shade, shade]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 25.0).unwrap();
        assert_eq!(source.info().frame_count, 3);
        assert_eq!((source.info().width, source.info().height), (8, 6));

        for (expected, shade) in [(0, 0u8), (1, 10), (2, 20)] {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.index, expected);
            assert_eq!(frame.image.get_pixel(0, 0).0, [shade, shade, shade]);
        }
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_image_becomes_empty_frame() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("b.png"), b"not a png").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 30.0).unwrap();
        assert_eq!(source.next_frame().unwrap().unwrap().width(), 4);
        let corrupt = source.next_frame().unwrap().unwrap();
        assert_eq!(corrupt.index, 1);
        assert_eq!(corrupt.width(), 0);
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path(), 30.0),
            Err(CaptureError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            ImageSequenceSource::open(dir.path().join("missing"), 30.0),
            Err(CaptureError::OpenFailed(_))
        ));
    }
}
