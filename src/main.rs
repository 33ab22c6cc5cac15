/// Motion capture command line driver
///
/// Turns a video (with the `ffmpeg` feature) or a directory of frames into a BVH file.
///
/// Run with: mocap <input> <output.bvh> [--fps N] [--config FILE] [--model FILE] [--report FILE] [--motion-json FILE] [--json FILE]
///          mocap --reset-config [--config FILE]

use mocap_lib::core::config::MocapConfig;
use mocap_lib::core::ml_models::{create_default_estimator, EstimatorRuntime};
use mocap_lib::core::pipeline::{MotionCapture, MotionCapturePipeline};
use mocap_lib::platform::capture::{ImageSequenceSource, VideoSource};
use std::path::{Path, PathBuf};

const USAGE: &str = "usage: mocap <input> <output.bvh> [--fps N] [--config FILE] [--model FILE] [--report FILE] \
[--motion-json FILE] [--json FILE]\n       mocap --reset-config [--config FILE]";

#[derive(Debug, Default)]
struct Args {
    input: PathBuf,
    output: PathBuf,
    fps: Option<f64>,
    config: Option<PathBuf>,
    model: Option<PathBuf>,
    report: Option<PathBuf>,
    motion_json: Option<PathBuf>,
    json: Option<PathBuf>,
    reset_config: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(argv: I) -> Result<Args, Box<dyn std::error::Error>> {
    let mut positional = Vec::new();
    let mut args = Args::default();
    let mut iter = argv.into_iter();

    while let Some(arg) = iter.next() {
        let mut value = || iter.next().ok_or_else(|| format!("{} needs a value\n{}", arg, USAGE));
        match arg.as_str() {
            "--fps" => args.fps = Some(value()?.parse()?),
            "--config" => args.config = Some(PathBuf::from(value()?)),
            "--model" => args.model = Some(PathBuf::from(value()?)),
            "--report" => args.report = Some(PathBuf::from(value()?)),
            "--motion-json" => args.motion_json = Some(PathBuf::from(value()?)),
            "--json" => args.json = Some(PathBuf::from(value()?)),
            "--reset-config" => args.reset_config = true,
            "-h" | "--help" => return Err(USAGE.into()),
            _ => positional.push(PathBuf::from(&arg)),
        }
    }

    match positional.len() {
        0 if args.reset_config => Ok(args),
        2 if !args.reset_config => {
            args.output = positional.pop().ok_or(USAGE)?;
            args.input = positional.pop().ok_or(USAGE)?;
            Ok(args)
        }
        _ => Err(USAGE.into()),
    }
}

fn open_source(input: &Path, fps: Option<f64>) -> Result<Box<dyn VideoSource>, Box<dyn std::error::Error>> {
    if input.is_dir() {
        let fps = fps.unwrap_or(30.0);
        return Ok(Box::new(ImageSequenceSource::open(input, fps)?));
    }

    #[cfg(feature = "ffmpeg")]
    {
        Ok(Box::new(mocap_lib::platform::capture::FFmpegSource::open(input)?))
    }

    #[cfg(not(feature = "ffmpeg"))]
    {
        Err(format!("{:?} is not a frame directory; rebuild with the 'ffmpeg' feature to read video files", input).into())
    }
}

#[cfg(feature = "ml-onnx")]
async fn resolve_model(config: &MocapConfig, model: Option<PathBuf>) -> Result<Option<PathBuf>, Box<dyn std::error::Error>> {
    use mocap_lib::core::ml_models::{mediapipe, ModelManager};

    if model.is_some() {
        return Ok(model);
    }
    let manager = ModelManager::new(config.model_cache_dir.clone()).map_err(|e| e.to_string())?;
    let path = manager
        .ensure_model(&mediapipe::pose_landmark_onnx())
        .await
        .map_err(|e| e.to_string())?;
    Ok(Some(path))
}

#[cfg(not(feature = "ml-onnx"))]
async fn resolve_model(_config: &MocapConfig, model: Option<PathBuf>) -> Result<Option<PathBuf>, Box<dyn std::error::Error>> {
    Ok(model)
}

/// Write the optional side outputs requested on the command line
fn write_outputs(capture: &MotionCapture, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&capture.report)?)?;
        log::info!("Report written to {:?}", path);
    }

    if let Some(path) = &args.motion_json {
        std::fs::write(path, serde_json::to_string_pretty(&capture.track.to_motion_json())?)?;
        log::info!("Motion data written to {:?}", path);
    }

    if let Some(path) = &args.json {
        std::fs::write(path, capture.document.to_json()?)?;
        log::info!("Animation document written to {:?}", path);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args(std::env::args().skip(1))?;

    if args.reset_config {
        match &args.config {
            Some(path) => MocapConfig::reset_at(path)?,
            None => MocapConfig::reset()?,
        };
        println!("Configuration reset to defaults");
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => MocapConfig::load_from(path)?,
        None => MocapConfig::load()?,
    };
    config.validate()?;

    let model = resolve_model(&config, args.model.clone()).await?;
    let pose_config = config.pose_config();
    let estimator = EstimatorRuntime::initialize(|| create_default_estimator(&pose_config, model.as_deref()))?;

    let source = open_source(&args.input, args.fps)?;
    let pipeline = MotionCapturePipeline::from_config(config, estimator)?;
    let result = pipeline.run_to_bvh(source, &args.output).await;
    EstimatorRuntime::shutdown();
    let capture = result?;
    write_outputs(&capture, &args)?;

    println!(
        "{} frames at {} fps ({:.2}s): {} detected, {} interpolated, {} held",
        capture.report.frame_count,
        capture.report.fps,
        capture.report.duration,
        capture.report.detected_frames,
        capture.report.interpolated_frames,
        capture.report.held_frames
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mocap_lib::models::capture::VideoInfo;
    use mocap_lib::platform::capture::InMemorySource;
    use mocap_lib::platform::pose::ScriptedEstimator;
    use std::sync::Arc;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_parse_output_options() {
        let args = parse_args(argv(&["take.mp4", "take.bvh", "--json", "doc.json", "--fps", "25"])).unwrap();
        assert_eq!(args.input, PathBuf::from("take.mp4"));
        assert_eq!(args.output, PathBuf::from("take.bvh"));
        assert_eq!(args.json, Some(PathBuf::from("doc.json")));
        assert_eq!(args.fps, Some(25.0));

        assert!(parse_args(argv(&["take.mp4", "take.bvh", "--json"])).is_err());
        assert!(parse_args(argv(&["take.mp4"])).is_err());
    }

    #[test]
    fn test_parse_reset_config() {
        let args = parse_args(argv(&["--reset-config", "--config", "settings.json"])).unwrap();
        assert!(args.reset_config);
        assert_eq!(args.config, Some(PathBuf::from("settings.json")));

        assert!(parse_args(argv(&["--reset-config", "take.mp4", "take.bvh"])).is_err());
    }

    #[tokio::test]
    async fn test_json_output_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let estimator = Arc::new(ScriptedEstimator::new(|_| Ok(None)));
        let pipeline = MotionCapturePipeline::from_config(MocapConfig::default(), estimator).unwrap();
        let source = InMemorySource::new(VideoInfo::new(30.0, 0, 64, 48), Vec::new());
        let capture = pipeline.run(source).await.unwrap();

        let args = Args {
            json: Some(dir.path().join("doc.json")),
            ..Args::default()
        };
        write_outputs(&capture, &args).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("doc.json")).unwrap()).unwrap();
        assert_eq!(written["frameCount"], 0);
        assert_eq!(written["skeleton"], capture.document.skeleton.name.as_str());
        assert!(!dir.path().join("report.json").exists());
    }
}
