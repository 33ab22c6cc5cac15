// MediaPipe integration bridge
// Provides MediaPipe Pose (33 landmarks) behind the PoseEstimator capability
// Can be implemented using PyO3 (Python) or ONNX Runtime (Rust native)

use super::PoseEstimator;
use crate::models::pose::{PoseConfig, PoseEstimate, PoseResult, LANDMARK_COUNT};
use image::RgbImage;
use std::path::Path;

/// Constructor shared by the MediaPipe backends
pub trait MediaPipeBridge: PoseEstimator {
    /// Initialize the MediaPipe model; `model_path` is required by native backends
    fn new(config: &PoseConfig, model_path: Option<&Path>) -> PoseResult<Self>
    where
        Self: Sized;
}

// ==============================================================================
// PyO3 Implementation (Python MediaPipe)
// ==============================================================================

#[cfg(feature = "ml-pyo3")]
pub mod pyo3_backend {
    use super::*;
    use crate::models::pose::{Landmark, ModelComplexity, PoseError};
    use pyo3::prelude::*;
    use pyo3::types::{PyBytes, PyDict, PyModule};
    use serde_json::Value;

    /// Directory holding `mocap_inference.py`, overridable with MOCAP_PYTHON_DIR
    fn python_dir() -> std::path::PathBuf {
        std::env::var("MOCAP_PYTHON_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("python"))
    }

    pub struct PyO3MediaPipe {
        // Python inference module
        inference_module: Py<PyModule>,
        config: PoseConfig,
    }

    impl MediaPipeBridge for PyO3MediaPipe {
        fn new(config: &PoseConfig, _model_path: Option<&Path>) -> PoseResult<Self> {
            Python::with_gil(|py| {
                let sys = py
                    .import_bound("sys")
                    .map_err(|e| PoseError::ModelLoadFailed(format!("Failed to import sys: {}", e)))?;

                let path_list = sys
                    .getattr("path")
                    .map_err(|e| PoseError::ModelLoadFailed(format!("Failed to get sys.path: {}", e)))?;

                let dir = python_dir();
                path_list
                    .call_method1("insert", (0, dir.to_string_lossy().to_string()))
                    .map_err(|e| PoseError::ModelLoadFailed(format!("Failed to add python dir to path: {}", e)))?;

                let inference_module = py.import_bound("mocap_inference").map_err(|e| {
                    PoseError::ModelLoadFailed(format!(
                        "Failed to import mocap_inference: {}. Make sure mediapipe is installed (pip install mediapipe numpy)",
                        e
                    ))
                })?;

                log::info!(
                    "PyO3MediaPipe initialized: complexity={:?}, detection={}, tracking={}",
                    config.model_complexity,
                    config.min_detection_confidence,
                    config.min_tracking_confidence
                );

                Ok(Self {
                    inference_module: inference_module.unbind(),
                    config: config.clone(),
                })
            })
        }
    }

    impl PoseEstimator for PyO3MediaPipe {
        fn estimate(&self, frame: &RgbImage) -> PoseResult<Option<PoseEstimate>> {
            let start_time = std::time::Instant::now();

            Python::with_gil(|py| {
                let module = self.inference_module.bind(py);

                let process_fn = module
                    .getattr("process_image_bytes")
                    .map_err(|e| PoseError::InferenceFailed(format!("Failed to get process_image_bytes: {}", e)))?;

                let complexity = match self.config.model_complexity {
                    ModelComplexity::Lite => 0,
                    ModelComplexity::Full => 1,
                    ModelComplexity::Heavy => 2,
                };

                let kwargs = PyDict::new_bound(py);
                let set = |key: &str, value: PyObject| {
                    kwargs
                        .set_item(key, value)
                        .map_err(|e| PoseError::InferenceFailed(format!("Failed to set {}: {}", key, e)))
                };
                set("image_bytes", PyBytes::new_bound(py, frame.as_raw()).into_py(py))?;
                set("width", frame.width().into_py(py))?;
                set("height", frame.height().into_py(py))?;
                set("model_complexity", complexity.into_py(py))?;
                set("min_detection_confidence", self.config.min_detection_confidence.into_py(py))?;
                set("min_tracking_confidence", self.config.min_tracking_confidence.into_py(py))?;

                let result_json = process_fn
                    .call((), Some(&kwargs))
                    .map_err(|e| PoseError::InferenceFailed(format!("MediaPipe inference failed: {}", e)))?;

                let json_str: String = result_json
                    .extract()
                    .map_err(|e| PoseError::InferenceFailed(format!("Failed to extract JSON: {}", e)))?;

                let result: Value = serde_json::from_str(&json_str)
                    .map_err(|e| PoseError::InferenceFailed(format!("Failed to parse JSON: {}", e)))?;

                let landmarks = match result.get("landmarks").and_then(|l| l.as_array()) {
                    Some(list) => Self::parse_landmarks(list),
                    None => return Ok(None),
                };
                let score = result.get("score").and_then(|s| s.as_f64()).unwrap_or(1.0) as f32;

                Ok(Some(PoseEstimate {
                    landmarks,
                    score,
                    processing_time_ms: start_time.elapsed().as_millis() as u64,
                }))
            })
        }

        fn landmark_count(&self) -> usize {
            LANDMARK_COUNT
        }

        fn is_initialized(&self) -> bool {
            true
        }

        fn model_info(&self) -> String {
            format!(
                "PyO3 MediaPipe Bridge (Python backend) - complexity {:?}",
                self.config.model_complexity
            )
        }
    }

    impl PyO3MediaPipe {
        fn parse_landmarks(list: &[Value]) -> Vec<Landmark> {
            list.iter()
                .map(|kp| {
                    let field = |name: &str| kp.get(name).and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
                    Landmark::new(field("x"), field("y"), field("z"), field("visibility"))
                })
                .collect()
        }
    }
}

// ==============================================================================
// ONNX Runtime Implementation (Pure Rust)
// ==============================================================================

#[cfg(feature = "ml-onnx")]
pub mod onnx_backend {
    use super::*;
    use crate::models::pose::{Landmark, PoseError};
    use image::imageops::{self, FilterType};
    use ndarray::Array4;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use std::sync::Mutex;

    /// BlazePose landmark model input side
    const INPUT_SIZE: u32 = 256;
    /// Values per landmark in the model output: x, y, z, visibility, presence
    const VALUES_PER_LANDMARK: usize = 5;

    fn sigmoid(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    /// Square-pad and resize a frame, returning the tensor and the padded side length
    fn preprocess(frame: &RgbImage) -> (Array4<f32>, u32, u32, u32) {
        let side = frame.width().max(frame.height());
        let pad_x = (side - frame.width()) / 2;
        let pad_y = (side - frame.height()) / 2;

        let mut square = RgbImage::new(side, side);
        imageops::replace(&mut square, frame, pad_x as i64, pad_y as i64);
        let resized = imageops::resize(&square, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

        let n = INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, n, n, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
            }
        }
        (input, side, pad_x, pad_y)
    }

    pub struct OnnxMediaPipe {
        // run() needs exclusive access to the session
        session: Mutex<Session>,
        input_name: String,
        landmarks_output: String,
        score_output: Option<String>,
    }

    impl MediaPipeBridge for OnnxMediaPipe {
        fn new(_config: &PoseConfig, model_path: Option<&Path>) -> PoseResult<Self> {
            let model_path = model_path
                .ok_or_else(|| PoseError::ModelLoadFailed("ONNX backend requires a model path".to_string()))?;

            let session = Session::builder()
                .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
                .and_then(|b| b.commit_from_file(model_path))
                .map_err(|e| PoseError::ModelLoadFailed(format!("{:?}: {}", model_path, e)))?;

            let input_name = session
                .inputs
                .first()
                .map(|i| i.name.clone())
                .ok_or_else(|| PoseError::ModelLoadFailed("Model has no inputs".to_string()))?;
            let landmarks_output = session
                .outputs
                .first()
                .map(|o| o.name.clone())
                .ok_or_else(|| PoseError::ModelLoadFailed("Model has no outputs".to_string()))?;
            let score_output = session.outputs.get(1).map(|o| o.name.clone());

            log::info!("OnnxMediaPipe loaded {:?}", model_path);
            Ok(Self {
                session: Mutex::new(session),
                input_name,
                landmarks_output,
                score_output,
            })
        }
    }

    impl PoseEstimator for OnnxMediaPipe {
        fn estimate(&self, frame: &RgbImage) -> PoseResult<Option<PoseEstimate>> {
            if frame.width() == 0 || frame.height() == 0 {
                return Err(PoseError::InvalidFrame("Empty frame".to_string()));
            }
            let start_time = std::time::Instant::now();
            let (input, side, pad_x, pad_y) = preprocess(frame);

            let (raw, score) = {
                let mut session = self
                    .session
                    .lock()
                    .map_err(|_| PoseError::InferenceFailed("Session lock poisoned".to_string()))?;
                let tensor = Tensor::from_array(input).map_err(|e| PoseError::InferenceFailed(e.to_string()))?;
                let outputs = session
                    .run(ort::inputs![self.input_name.as_str() => tensor])
                    .map_err(|e| PoseError::InferenceFailed(e.to_string()))?;

                let raw: Vec<f32> = outputs[self.landmarks_output.as_str()]
                    .try_extract_array::<f32>()
                    .map_err(|e| PoseError::InferenceFailed(e.to_string()))?
                    .iter()
                    .copied()
                    .collect();
                let score = match &self.score_output {
                    Some(name) => outputs[name.as_str()]
                        .try_extract_array::<f32>()
                        .map_err(|e| PoseError::InferenceFailed(e.to_string()))?
                        .iter()
                        .next()
                        .copied()
                        .unwrap_or(0.0),
                    None => 1.0,
                };
                (raw, score)
            };

            if raw.len() < LANDMARK_COUNT * VALUES_PER_LANDMARK {
                return Err(PoseError::InferenceFailed(format!(
                    "Landmark output has {} values",
                    raw.len()
                )));
            }

            // Model space (pixels of the padded square at INPUT_SIZE) back to frame space
            let to_frame = side as f32 / INPUT_SIZE as f32;
            let (w, h) = (frame.width() as f32, frame.height() as f32);
            let landmarks = raw
                .chunks(VALUES_PER_LANDMARK)
                .take(LANDMARK_COUNT)
                .map(|v| {
                    Landmark::new(
                        (v[0] * to_frame - pad_x as f32) / w,
                        (v[1] * to_frame - pad_y as f32) / h,
                        v[2] * to_frame / w,
                        sigmoid(v[3]),
                    )
                })
                .collect();

            let score = if (0.0..=1.0).contains(&score) { score } else { sigmoid(score) };

            Ok(Some(PoseEstimate {
                landmarks,
                score,
                processing_time_ms: start_time.elapsed().as_millis() as u64,
            }))
        }

        fn landmark_count(&self) -> usize {
            LANDMARK_COUNT
        }

        fn is_initialized(&self) -> bool {
            true
        }

        fn model_info(&self) -> String {
            "ONNX Runtime MediaPipe Bridge (Rust native)".to_string()
        }
    }
}

// ==============================================================================
// Null Implementation (for builds without ML features)
// ==============================================================================

/// Never detects anyone; every frame becomes a gap
pub struct NullEstimator;

impl MediaPipeBridge for NullEstimator {
    fn new(_config: &PoseConfig, _model_path: Option<&Path>) -> PoseResult<Self> {
        log::warn!("Using null pose estimator (no inference)");
        log::warn!("Enable 'ml-pyo3' or 'ml-onnx' feature for actual ML inference");
        Ok(Self)
    }
}

impl PoseEstimator for NullEstimator {
    fn estimate(&self, _frame: &RgbImage) -> PoseResult<Option<PoseEstimate>> {
        Ok(None)
    }

    fn landmark_count(&self) -> usize {
        LANDMARK_COUNT
    }

    fn is_initialized(&self) -> bool {
        false
    }

    fn model_info(&self) -> String {
        "Null estimator (no ML inference - enable 'ml-pyo3' or 'ml-onnx' feature)".to_string()
    }
}

// ==============================================================================
// Default Backend Selection
// ==============================================================================

#[cfg(feature = "ml-pyo3")]
pub type DefaultMediaPipe = pyo3_backend::PyO3MediaPipe;

#[cfg(all(feature = "ml-onnx", not(feature = "ml-pyo3")))]
pub type DefaultMediaPipe = onnx_backend::OnnxMediaPipe;

#[cfg(not(any(feature = "ml-pyo3", feature = "ml-onnx")))]
pub type DefaultMediaPipe = NullEstimator;
