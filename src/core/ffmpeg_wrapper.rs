/// FFmpeg wrapper providing a safe Rust interface around the unsafe FFmpeg C bindings
///
/// This module encapsulates all unsafe FFmpeg operations needed to demux a video file,
/// decode its best video stream, and convert each picture to packed RGB24.

use std::ffi::CString;
use std::path::Path;
use std::ptr;
use thiserror::Error;

// Import FFmpeg C bindings
use ffmpeg_sys_next::*;

#[derive(Error, Debug)]
pub enum FFmpegError {
    #[error("Failed to open input: {0}")]
    OpenInput(String),
    #[error("Failed to read stream info")]
    StreamInfo,
    #[error("No video stream found")]
    NoVideoStream,
    #[error("Failed to allocate codec context")]
    CodecContextAllocation,
    #[error("Failed to open codec: {0}")]
    CodecOpenFailed(String),
    #[error("Failed to allocate frame")]
    FrameAllocation,
    #[error("Failed to allocate packet")]
    PacketAllocation,
    #[error("Failed to initialize swscale context")]
    SwscaleInitFailed,
    #[error("Decoding error at frame {frame_index}: {message}")]
    DecodingError { frame_index: usize, message: String },
}

pub type Result<T> = std::result::Result<T, FFmpegError>;

/// Stream properties read from the container
#[derive(Debug, Clone, PartialEq)]
pub struct StreamProperties {
    pub frame_rate: f64,
    pub frame_count: usize,
    /// True when `frame_count` is the container's own count rather than a duration estimate
    pub frame_count_exact: bool,
    pub width: u32,
    pub height: u32,
    pub variable_frame_rate: bool,
}

fn rational(r: AVRational) -> Option<f64> {
    (r.num > 0 && r.den > 0).then(|| r.num as f64 / r.den as f64)
}

/// Frame slot for a presentation timestamp, counted from the stream start
fn presentation_index(pts: i64, start_pts: i64, time_base: f64, frame_rate: f64) -> Option<usize> {
    if pts == AV_NOPTS_VALUE || time_base <= 0.0 || frame_rate <= 0.0 {
        return None;
    }
    let seconds = pts.saturating_sub(start_pts) as f64 * time_base;
    Some((seconds * frame_rate).round().max(0.0) as usize)
}

/// A converted picture and its frame slot in the stream
#[derive(Debug, Clone)]
pub struct DecodedPicture {
    pub index: usize,
    pub rgb: Vec<u8>,
}

/// Safe wrapper around an FFmpeg video decoder
pub struct FFmpegDecoder {
    format_context: *mut AVFormatContext,
    codec_context: *mut AVCodecContext,
    frame: *mut AVFrame,
    packet: *mut AVPacket,
    sws_context: *mut SwsContext,
    stream_index: i32,
    time_base: f64,
    start_pts: i64,
    properties: StreamProperties,
    frames_decoded: usize,
    flushing: bool,
}

unsafe impl Send for FFmpegDecoder {}

impl FFmpegDecoder {
    /// Open a video file and prepare its best video stream for decoding
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| FFmpegError::OpenInput(format!("{:?}", path)))?;
        let path_c = CString::new(path_str).map_err(|_| FFmpegError::OpenInput(path_str.to_string()))?;

        unsafe {
            let mut decoder = Self {
                format_context: ptr::null_mut(),
                codec_context: ptr::null_mut(),
                frame: ptr::null_mut(),
                packet: ptr::null_mut(),
                sws_context: ptr::null_mut(),
                stream_index: -1,
                time_base: 0.0,
                start_pts: 0,
                properties: StreamProperties {
                    frame_rate: 0.0,
                    frame_count: 0,
                    frame_count_exact: false,
                    width: 0,
                    height: 0,
                    variable_frame_rate: false,
                },
                frames_decoded: 0,
                flushing: false,
            };

            // From here on Drop releases whatever has been allocated
            let ret = avformat_open_input(
                &mut decoder.format_context,
                path_c.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
            );
            if ret < 0 {
                decoder.format_context = ptr::null_mut();
                return Err(FFmpegError::OpenInput(format!("{} (error code: {})", path_str, ret)));
            }

            if avformat_find_stream_info(decoder.format_context, ptr::null_mut()) < 0 {
                return Err(FFmpegError::StreamInfo);
            }

            let mut codec: *const AVCodec = ptr::null();
            let stream_index = av_find_best_stream(
                decoder.format_context,
                AVMediaType::AVMEDIA_TYPE_VIDEO,
                -1,
                -1,
                &mut codec,
                0,
            );
            if stream_index < 0 || codec.is_null() {
                return Err(FFmpegError::NoVideoStream);
            }
            decoder.stream_index = stream_index;
            let stream = *(*decoder.format_context).streams.offset(stream_index as isize);
            decoder.time_base = rational((*stream).time_base).unwrap_or(0.0);
            if (*stream).start_time != AV_NOPTS_VALUE {
                decoder.start_pts = (*stream).start_time;
            }

            decoder.codec_context = avcodec_alloc_context3(codec);
            if decoder.codec_context.is_null() {
                return Err(FFmpegError::CodecContextAllocation);
            }
            if avcodec_parameters_to_context(decoder.codec_context, (*stream).codecpar) < 0 {
                return Err(FFmpegError::CodecOpenFailed("Failed to copy codec parameters".to_string()));
            }
            let ret = avcodec_open2(decoder.codec_context, codec, ptr::null_mut());
            if ret < 0 {
                return Err(FFmpegError::CodecOpenFailed(format!("Error code: {}", ret)));
            }

            let width = (*decoder.codec_context).width;
            let height = (*decoder.codec_context).height;

            // Frame rate and variable-rate detection
            let guessed = av_guess_frame_rate(decoder.format_context, stream, ptr::null_mut());
            let frame_rate = rational(guessed).unwrap_or(0.0);
            let variable_frame_rate = match (rational((*stream).avg_frame_rate), rational((*stream).r_frame_rate)) {
                (Some(avg), Some(real)) => ((avg - real) / real).abs() > 0.01,
                _ => false,
            };

            let frame_count_exact = (*stream).nb_frames > 0;
            let frame_count = if frame_count_exact {
                (*stream).nb_frames as usize
            } else if (*decoder.format_context).duration > 0 && frame_rate > 0.0 {
                let seconds = (*decoder.format_context).duration as f64 / AV_TIME_BASE as f64;
                (seconds * frame_rate).round() as usize
            } else {
                0
            };

            decoder.properties = StreamProperties {
                frame_rate,
                frame_count,
                frame_count_exact,
                width: width.max(0) as u32,
                height: height.max(0) as u32,
                variable_frame_rate,
            };

            decoder.frame = av_frame_alloc();
            if decoder.frame.is_null() {
                return Err(FFmpegError::FrameAllocation);
            }

            decoder.packet = av_packet_alloc();
            if decoder.packet.is_null() {
                return Err(FFmpegError::PacketAllocation);
            }

            // Initialize swscale context for native -> RGB24 conversion
            decoder.sws_context = sws_getContext(
                width,
                height,
                (*decoder.codec_context).pix_fmt,
                width,
                height,
                AVPixelFormat::AV_PIX_FMT_RGB24,
                2, // SWS_BILINEAR
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null(),
            );
            if decoder.sws_context.is_null() {
                return Err(FFmpegError::SwscaleInitFailed);
            }

            Ok(decoder)
        }
    }

    pub fn properties(&self) -> &StreamProperties {
        &self.properties
    }

    /// Decode the next picture as packed RGB24, or None at end of stream
    ///
    /// The index comes from the picture's timestamp, so pictures lost to corrupt
    /// packets leave a hole in the numbering. Without a timestamp the decode count is used.
    pub fn next_picture(&mut self) -> Result<Option<DecodedPicture>> {
        unsafe {
            loop {
                let ret = avcodec_receive_frame(self.codec_context, self.frame);
                if ret == 0 {
                    let index = presentation_index(
                        (*self.frame).best_effort_timestamp,
                        self.start_pts,
                        self.time_base,
                        self.properties.frame_rate,
                    )
                    .unwrap_or(self.frames_decoded);
                    let rgb = self.convert_frame()?;
                    av_frame_unref(self.frame);
                    self.frames_decoded += 1;
                    return Ok(Some(DecodedPicture { index, rgb }));
                }
                if ret == AVERROR_EOF {
                    return Ok(None);
                }
                if ret != AVERROR(EAGAIN) {
                    return Err(self.decoding_error(format!("Receive frame failed: {}", ret)));
                }
                if self.flushing {
                    return Ok(None);
                }

                // Decoder wants more input
                let ret = av_read_frame(self.format_context, self.packet);
                if ret < 0 {
                    // End of file: drain buffered pictures
                    self.flushing = true;
                    avcodec_send_packet(self.codec_context, ptr::null());
                    continue;
                }

                if (*self.packet).stream_index == self.stream_index {
                    let ret = avcodec_send_packet(self.codec_context, self.packet);
                    if ret < 0 && ret != AVERROR(EAGAIN) {
                        // Corrupt packet; the picture it carried is simply not produced
                        log::warn!(
                            "Skipping undecodable packet near frame {}: error code {}",
                            self.frames_decoded,
                            ret
                        );
                    }
                }
                av_packet_unref(self.packet);
            }
        }
    }

    unsafe fn convert_frame(&mut self) -> Result<Vec<u8>> {
        let width = self.properties.width as usize;
        let height = self.properties.height as usize;
        if (*self.frame).width as usize != width || (*self.frame).height as usize != height {
            return Err(self.decoding_error(format!(
                "Picture size changed to {}x{}",
                (*self.frame).width,
                (*self.frame).height
            )));
        }

        let mut rgb = vec![0u8; width * height * 3];
        let dst_data = [rgb.as_mut_ptr(), ptr::null_mut(), ptr::null_mut(), ptr::null_mut()];
        let dst_linesize = [(width * 3) as i32, 0, 0, 0];

        let ret = sws_scale(
            self.sws_context,
            (*self.frame).data.as_ptr() as *const *const u8,
            (*self.frame).linesize.as_ptr(),
            0,
            height as i32,
            dst_data.as_ptr(),
            dst_linesize.as_ptr(),
        );
        if ret < 0 {
            return Err(self.decoding_error("Color conversion failed".to_string()));
        }

        Ok(rgb)
    }

    fn decoding_error(&self, message: String) -> FFmpegError {
        FFmpegError::DecodingError {
            frame_index: self.frames_decoded,
            message,
        }
    }
}

impl Drop for FFmpegDecoder {
    fn drop(&mut self) {
        unsafe {
            // Clean up resources in reverse order
            if !self.sws_context.is_null() {
                sws_freeContext(self.sws_context);
            }

            if !self.packet.is_null() {
                av_packet_free(&mut self.packet);
            }

            if !self.frame.is_null() {
                av_frame_free(&mut self.frame);
            }

            if !self.codec_context.is_null() {
                avcodec_free_context(&mut self.codec_context);
            }

            if !self.format_context.is_null() {
                avformat_close_input(&mut self.format_context);
            }
        }
    }
}
