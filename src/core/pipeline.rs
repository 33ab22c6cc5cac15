// Motion capture pipeline
// Video source -> pose estimation -> track -> smoothing -> skeleton mapping -> animation

use crate::core::bvh_writer::save_bvh;
use crate::core::config::MocapConfig;
use crate::core::pose_estimator::{check_topology, estimate_frame, Detection, DetectionGate};
use crate::core::skeleton_mapper::{MapperConfig, SkeletonMapper};
use crate::core::smoother::TemporalSmoother;
use crate::core::track_builder::{validate_frame_rate, TrackBuilder};
use crate::models::animation::AnimationDocument;
use crate::models::capture::VideoInfo;
use crate::models::pipeline::{MotionCaptureReport, PipelineError, PipelineResult};
use crate::models::skeleton::Skeleton;
use crate::models::track::{FrameFill, SmoothedTrack, Track};
use crate::platform::capture::VideoSource;
use crate::platform::pose::PoseEstimator;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Everything one run produces
#[derive(Debug, Clone)]
pub struct MotionCapture {
    pub track: Track,
    pub smoothed: SmoothedTrack,
    pub document: AnimationDocument,
    pub report: MotionCaptureReport,
}

pub struct MotionCapturePipeline {
    config: MocapConfig,
    estimator: Arc<dyn PoseEstimator>,
    smoother: TemporalSmoother,
    mapper: SkeletonMapper,
}

impl MotionCapturePipeline {
    pub fn new(config: MocapConfig, skeleton: Skeleton, estimator: Arc<dyn PoseEstimator>) -> PipelineResult<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;

        let smoother = TemporalSmoother::new(config.smoother_config());
        let mapper = SkeletonMapper::new(
            skeleton,
            MapperConfig {
                unit_scale: config.unit_scale,
                ..MapperConfig::default()
            },
        );

        Ok(Self {
            config,
            estimator,
            smoother,
            mapper,
        })
    }

    /// Use the configured skeleton file, or the bundled reference skeleton
    pub fn from_config(config: MocapConfig, estimator: Arc<dyn PoseEstimator>) -> PipelineResult<Self> {
        let skeleton = match &config.skeleton_path {
            Some(path) => Skeleton::load(path)?,
            None => Skeleton::reference()?,
        };
        Self::new(config, skeleton, estimator)
    }

    pub fn config(&self) -> &MocapConfig {
        &self.config
    }

    pub fn skeleton(&self) -> &Skeleton {
        self.mapper.skeleton()
    }

    /// Process a whole video
    ///
    /// The source is consumed and dropped on every exit path. Nothing partial is returned.
    pub async fn run<S: VideoSource>(&self, mut source: S) -> PipelineResult<MotionCapture> {
        let info = source.info().clone();
        validate_frame_rate(info.frame_rate, info.variable_frame_rate)?;
        check_topology(self.estimator.as_ref())?;

        info!(
            "Starting motion capture: {}x{} at {} fps, {} frames, estimator: {}",
            info.width,
            info.height,
            info.frame_rate,
            info.frame_count,
            self.estimator.model_info()
        );

        let track = self.estimate_track(&mut source, &info).await?;
        drop(source);

        if track.len() != info.frame_count {
            warn!(
                "Source announced {} frames but yielded {}",
                info.frame_count,
                track.len()
            );
        }

        let gaps = track.gap_runs();
        info!(
            "Detected a pose in {} of {} frames ({} gap runs, longest {})",
            track.detected_frames(),
            track.len(),
            gaps.len(),
            gaps.iter().map(|(_, len)| *len).max().unwrap_or(0)
        );

        let smoothed = self.smoother.smooth(&track);
        let document = self.mapper.map(&smoothed)?;
        let report = Self::report(&track, &smoothed, &document);

        debug!(
            "Run {}: {} interpolated, {} held",
            report.run_id, report.interpolated_frames, report.held_frames
        );

        Ok(MotionCapture {
            track,
            smoothed,
            document,
            report,
        })
    }

    /// Process a video and write the animation as BVH
    pub async fn run_to_bvh<S, P>(&self, source: S, path: P) -> PipelineResult<MotionCapture>
    where
        S: VideoSource,
        P: AsRef<Path>,
    {
        let capture = self.run(source).await?;
        save_bvh(&capture.document, path.as_ref())?;
        info!(
            "Wrote {} frames of {} bones to {:?}",
            capture.document.frame_count(),
            capture.document.bone_count(),
            path.as_ref()
        );
        Ok(capture)
    }

    /// Estimate every frame on the blocking pool, keeping at most
    /// `max_frames_in_flight` outstanding and consuming results in frame order
    async fn estimate_track<S: VideoSource>(&self, source: &mut S, info: &VideoInfo) -> PipelineResult<Track> {
        let mut builder = TrackBuilder::new(info)?;
        let mut gate = DetectionGate::new(&self.config.pose_config());
        let limit = self.config.max_frames_in_flight.max(1);
        let mut in_flight: VecDeque<(usize, JoinHandle<PipelineResult<Option<Detection>>>)> =
            VecDeque::with_capacity(limit);
        let mut exhausted = false;

        loop {
            while !exhausted && in_flight.len() < limit {
                match source.next_frame()? {
                    Some(frame) => {
                        let estimator = self.estimator.clone();
                        let index = frame.index;
                        let handle =
                            tokio::task::spawn_blocking(move || estimate_frame(estimator.as_ref(), &frame));
                        in_flight.push_back((index, handle));
                    }
                    None => exhausted = true,
                }
            }

            let (index, handle) = match in_flight.pop_front() {
                Some(next) => next,
                None => break,
            };
            let detection = handle
                .await
                .map_err(|e| PipelineError::TaskFailed(e.to_string()))??;
            builder.push(index, gate.admit(detection))?;
        }

        Ok(builder.finish())
    }

    fn report(track: &Track, smoothed: &SmoothedTrack, document: &AnimationDocument) -> MotionCaptureReport {
        MotionCaptureReport {
            run_id: Uuid::new_v4().to_string(),
            fps: document.frame_rate,
            duration: document.duration_secs(),
            frame_count: document.frame_count(),
            bone_count: document.bone_count(),
            detected_frames: track.detected_frames(),
            interpolated_frames: smoothed.count_fill(FrameFill::Interpolated),
            held_frames: smoothed.count_fill(FrameFill::Held),
            formats: vec!["bvh".to_string()],
            completed_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
