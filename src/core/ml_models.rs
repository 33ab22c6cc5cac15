// ML Model loader and manager utilities
// Handles model downloading, caching, and the process-wide estimator runtime

use crate::models::pose::{PoseConfig, PoseResult};
use crate::platform::pose::mediapipe_bridge::MediaPipeBridge;
use crate::platform::pose::{DefaultMediaPipe, PoseEstimator};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub type ModelResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Model source configuration
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Local file path
    LocalFile(PathBuf),
    /// Hugging Face model hub
    HuggingFace { repo: String, filename: String },
    /// Direct URL
    Url(String),
}

impl ModelSource {
    /// Download URL for remote sources
    pub fn url(&self) -> Option<String> {
        match self {
            ModelSource::LocalFile(_) => None,
            ModelSource::HuggingFace { repo, filename } => {
                Some(format!("https://huggingface.co/{}/resolve/main/{}", repo, filename))
            }
            ModelSource::Url(url) => Some(url.clone()),
        }
    }
}

/// ML model metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub source: ModelSource,
    pub size_bytes: Option<u64>,
}

/// Model manager for caching and loading ML models
pub struct ModelManager {
    cache_dir: PathBuf,
}

impl ModelManager {
    /// Create a new model manager with cache directory
    pub fn new(cache_dir: PathBuf) -> ModelResult<Self> {
        fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Check if a model is cached
    pub fn is_cached(&self, model: &ModelInfo) -> bool {
        self.get_model_path(&model.name).exists()
    }

    /// Get the local path for a model
    pub fn get_model_path(&self, model_name: &str) -> PathBuf {
        self.cache_dir.join(model_name)
    }

    /// Fetch a model into the cache unless it is already there
    pub async fn ensure_model(&self, model: &ModelInfo) -> ModelResult<PathBuf> {
        let model_path = self.get_model_path(&model.name);

        if self.is_cached(model) {
            log::debug!("Model {} already cached at {:?}", model.name, model_path);
            return Ok(model_path);
        }

        match &model.source {
            ModelSource::LocalFile(path) => {
                log::info!("Copying model {} from {:?}", model.name, path);
                tokio::fs::copy(path, &model_path).await?;
            }
            remote => {
                let url = remote.url().ok_or("Remote source without URL")?;
                log::info!("Downloading model {} from {}", model.name, url);
                let dest = model_path.clone();
                tokio::task::spawn_blocking(move || download(&url, &dest)).await??;
            }
        }

        Ok(model_path)
    }
}

/// Download to a sibling temp file, then rename so a partial file is never cached
fn download(url: &str, dest: &Path) -> ModelResult<()> {
    let response = reqwest::blocking::get(url)?.error_for_status()?;
    let bytes = response.bytes()?;

    let partial = dest.with_extension("part");
    fs::write(&partial, &bytes)?;
    fs::rename(&partial, dest)?;

    log::info!("Downloaded {} bytes to {:?}", bytes.len(), dest);
    Ok(())
}

// ==============================================================================
// Predefined Model Configurations
// ==============================================================================

/// MediaPipe pose model configurations
pub mod mediapipe {
    use super::*;

    /// BlazePose landmark model used by the ONNX backend (256x256 NHWC input)
    pub fn pose_landmark_onnx() -> ModelInfo {
        ModelInfo {
            name: "pose_estimation_mediapipe_2023mar.onnx".to_string(),
            version: "2023mar".to_string(),
            source: ModelSource::HuggingFace {
                repo: "opencv/pose_estimation_mediapipe".to_string(),
                filename: "pose_estimation_mediapipe_2023mar.onnx".to_string(),
            },
            size_bytes: Some(5_600_000), // ~5.6 MB
        }
    }
}

// ==============================================================================
// Estimator Runtime
// ==============================================================================

static ESTIMATOR: Mutex<Option<Arc<dyn PoseEstimator>>> = Mutex::new(None);

/// Process-wide estimator, created explicitly and torn down explicitly
pub struct EstimatorRuntime;

impl EstimatorRuntime {
    /// Create the estimator with `factory` unless one is already running
    pub fn initialize<F>(factory: F) -> PoseResult<Arc<dyn PoseEstimator>>
    where
        F: FnOnce() -> PoseResult<Arc<dyn PoseEstimator>>,
    {
        let mut slot = ESTIMATOR.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(estimator) = slot.as_ref() {
            return Ok(estimator.clone());
        }

        let estimator = factory()?;
        log::info!("Estimator runtime initialized: {}", estimator.model_info());
        *slot = Some(estimator.clone());
        Ok(estimator)
    }

    pub fn get() -> Option<Arc<dyn PoseEstimator>> {
        ESTIMATOR.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_initialized() -> bool {
        Self::get().is_some()
    }

    /// Drop the runtime's handle; returns false when nothing was running
    pub fn shutdown() -> bool {
        let previous = ESTIMATOR.lock().unwrap_or_else(|e| e.into_inner()).take();
        if previous.is_some() {
            log::info!("Estimator runtime shut down");
        }
        previous.is_some()
    }
}

/// Build the backend selected by the enabled features
pub fn create_default_estimator(config: &PoseConfig, model_path: Option<&Path>) -> PoseResult<Arc<dyn PoseEstimator>> {
    Ok(Arc::new(DefaultMediaPipe::new(config, model_path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pose::ScriptedEstimator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_model_manager_creation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = temp_dir.path().join("models");
        let manager = ModelManager::new(cache.clone()).unwrap();
        assert_eq!(manager.cache_dir(), cache.as_path());
        assert!(cache.is_dir());
    }

    #[test]
    fn test_huggingface_url() {
        let model = mediapipe::pose_landmark_onnx();
        assert_eq!(
            model.source.url().unwrap(),
            "https://huggingface.co/opencv/pose_estimation_mediapipe/resolve/main/pose_estimation_mediapipe_2023mar.onnx"
        );
        assert!(ModelSource::LocalFile(PathBuf::from("a.onnx")).url().is_none());
    }

    #[tokio::test]
    async fn test_local_model_is_copied_into_cache() {
        let temp_dir = tempfile::tempdir().unwrap();
        let source = temp_dir.path().join("pose.onnx");
        fs::write(&source, b"weights").unwrap();

        let manager = ModelManager::new(temp_dir.path().join("cache")).unwrap();
        let model = ModelInfo {
            name: "pose.onnx".to_string(),
            version: "test".to_string(),
            source: ModelSource::LocalFile(source),
            size_bytes: None,
        };

        assert!(!manager.is_cached(&model));
        let path = manager.ensure_model(&model).await.unwrap();
        assert!(manager.is_cached(&model));
        assert_eq!(fs::read(&path).unwrap(), b"weights");

        // A cached model is not fetched again
        fs::remove_file(temp_dir.path().join("pose.onnx")).unwrap();
        assert_eq!(manager.ensure_model(&model).await.unwrap(), path);
    }

    #[test]
    fn test_runtime_initialize_is_idempotent() {
        EstimatorRuntime::shutdown();
        let created = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = created.clone();
            EstimatorRuntime::initialize(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(ScriptedEstimator::new(|_| Ok(None))) as Arc<dyn PoseEstimator>)
            })
            .unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(EstimatorRuntime::is_initialized());

        assert!(EstimatorRuntime::shutdown());
        assert!(EstimatorRuntime::get().is_none());
        assert!(!EstimatorRuntime::shutdown());
    }
}
