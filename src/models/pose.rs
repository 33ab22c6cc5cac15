// Data models for body pose estimation (MediaPipe 33-landmark topology)

use serde::{Deserialize, Serialize};

/// Number of landmarks in the canonical body topology.
pub const LANDMARK_COUNT: usize = 33;

// ==============================================================================
// Body Landmarks (33 keypoints)
// ==============================================================================

/// MediaPipe Pose Landmark indices (33 total)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BodyLandmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl BodyLandmark {
    /// All landmarks in index order
    pub const ALL: [BodyLandmark; LANDMARK_COUNT] = [
        BodyLandmark::Nose,
        BodyLandmark::LeftEyeInner,
        BodyLandmark::LeftEye,
        BodyLandmark::LeftEyeOuter,
        BodyLandmark::RightEyeInner,
        BodyLandmark::RightEye,
        BodyLandmark::RightEyeOuter,
        BodyLandmark::LeftEar,
        BodyLandmark::RightEar,
        BodyLandmark::MouthLeft,
        BodyLandmark::MouthRight,
        BodyLandmark::LeftShoulder,
        BodyLandmark::RightShoulder,
        BodyLandmark::LeftElbow,
        BodyLandmark::RightElbow,
        BodyLandmark::LeftWrist,
        BodyLandmark::RightWrist,
        BodyLandmark::LeftPinky,
        BodyLandmark::RightPinky,
        BodyLandmark::LeftIndex,
        BodyLandmark::RightIndex,
        BodyLandmark::LeftThumb,
        BodyLandmark::RightThumb,
        BodyLandmark::LeftHip,
        BodyLandmark::RightHip,
        BodyLandmark::LeftKnee,
        BodyLandmark::RightKnee,
        BodyLandmark::LeftAnkle,
        BodyLandmark::RightAnkle,
        BodyLandmark::LeftHeel,
        BodyLandmark::RightHeel,
        BodyLandmark::LeftFootIndex,
        BodyLandmark::RightFootIndex,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

// ==============================================================================
// Landmark
// ==============================================================================

/// A single estimated body joint for one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,          // Normalized [0, 1] for image coordinates
    pub y: f32,          // Normalized [0, 1] for image coordinates
    pub z: f32,          // Depth relative to the hip midpoint, roughly the scale of x
    pub visibility: f32, // Detection confidence [0, 1]
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self { x, y, z, visibility }
    }

    pub fn is_visible(&self, threshold: f32) -> bool {
        self.visibility >= threshold
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.visibility.is_finite()
    }

    pub fn lerp(&self, other: &Landmark, t: f32) -> Landmark {
        Landmark {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
            visibility: self.visibility + (other.visibility - self.visibility) * t,
        }
    }

    pub fn midpoint(&self, other: &Landmark) -> Landmark {
        Landmark {
            x: (self.x + other.x) * 0.5,
            y: (self.y + other.y) * 0.5,
            z: (self.z + other.z) * 0.5,
            visibility: self.visibility.min(other.visibility),
        }
    }
}

impl Default for Landmark {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// A complete set of the 33 canonical landmarks for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Landmark>", into = "Vec<Landmark>")]
pub struct LandmarkSet {
    landmarks: [Landmark; LANDMARK_COUNT],
}

impl LandmarkSet {
    pub fn new(landmarks: [Landmark; LANDMARK_COUNT]) -> Self {
        Self { landmarks }
    }

    /// Build a set from a backend's landmark list, which must be in canonical order
    pub fn from_slice(landmarks: &[Landmark]) -> PoseResult<Self> {
        let landmarks: [Landmark; LANDMARK_COUNT] = landmarks
            .try_into()
            .map_err(|_| PoseError::TopologyMismatch {
                expected: LANDMARK_COUNT,
                actual: landmarks.len(),
            })?;
        Ok(Self { landmarks })
    }

    pub fn get(&self, landmark: BodyLandmark) -> &Landmark {
        &self.landmarks[landmark.index()]
    }

    pub fn set(&mut self, landmark: BodyLandmark, value: Landmark) {
        self.landmarks[landmark.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (BodyLandmark, &Landmark)> {
        BodyLandmark::ALL.iter().copied().zip(self.landmarks.iter())
    }

    pub fn as_slice(&self) -> &[Landmark] {
        &self.landmarks
    }

    pub fn as_mut_slice(&mut self) -> &mut [Landmark] {
        &mut self.landmarks
    }

    /// Mean visibility over all landmarks
    pub fn mean_visibility(&self) -> f32 {
        self.landmarks.iter().map(|l| l.visibility).sum::<f32>() / LANDMARK_COUNT as f32
    }

    pub fn lerp(&self, other: &LandmarkSet, t: f32) -> LandmarkSet {
        let mut landmarks = self.landmarks;
        for (out, target) in landmarks.iter_mut().zip(other.landmarks.iter()) {
            *out = out.lerp(target, t);
        }
        LandmarkSet { landmarks }
    }
}

impl TryFrom<Vec<Landmark>> for LandmarkSet {
    type Error = PoseError;

    fn try_from(value: Vec<Landmark>) -> Result<Self, Self::Error> {
        Self::from_slice(&value)
    }
}

impl From<LandmarkSet> for Vec<Landmark> {
    fn from(value: LandmarkSet) -> Self {
        value.landmarks.to_vec()
    }
}

/// Raw output of an estimator backend for one frame
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    pub landmarks: Vec<Landmark>,
    /// Overall pose presence score [0, 1]
    pub score: f32,
    pub processing_time_ms: u64,
}

// ==============================================================================
// Configuration
// ==============================================================================

/// Estimator-facing subset of the pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoseConfig {
    pub min_detection_confidence: f32, // Minimum confidence for a fresh detection (default: 0.5)
    pub min_tracking_confidence: f32,  // Minimum confidence while tracking (default: 0.5)
    pub model_complexity: ModelComplexity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelComplexity {
    Lite = 0,  // Fastest, less accurate
    Full = 1,  // Balanced
    Heavy = 2, // Slowest, most accurate
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            model_complexity: ModelComplexity::Heavy,
        }
    }
}

// ==============================================================================
// Error Types
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("Model loading failed: {0}")]
    ModelLoadFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Estimator returned {actual} landmarks, expected {expected}")]
    TopologyMismatch { expected: usize, actual: usize },
}

pub type PoseResult<T> = Result<T, PoseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_visibility() {
        let landmark = Landmark::new(0.5, 0.5, 0.0, 0.8);
        assert!(landmark.is_visible(0.5));
        assert!(landmark.is_visible(0.7));
        assert!(!landmark.is_visible(0.9));
    }

    #[test]
    fn test_landmark_indices_are_canonical() {
        for (i, landmark) in BodyLandmark::ALL.iter().enumerate() {
            assert_eq!(landmark.index(), i);
            assert_eq!(BodyLandmark::from_index(i), Some(*landmark));
        }
        assert_eq!(BodyLandmark::LeftHip.index(), 23);
        assert_eq!(BodyLandmark::from_index(LANDMARK_COUNT), None);
    }

    #[test]
    fn test_landmark_set_rejects_wrong_topology() {
        let seventeen = vec![Landmark::default(); 17];
        match LandmarkSet::from_slice(&seventeen) {
            Err(PoseError::TopologyMismatch { expected, actual }) => {
                assert_eq!(expected, 33);
                assert_eq!(actual, 17);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_landmark_set_lerp_and_midpoint() {
        let a = LandmarkSet::new([Landmark::new(0.0, 0.0, 0.0, 1.0); LANDMARK_COUNT]);
        let b = LandmarkSet::new([Landmark::new(1.0, 0.5, -1.0, 0.5); LANDMARK_COUNT]);
        let mid = a.lerp(&b, 0.5);
        let nose = mid.get(BodyLandmark::Nose);
        assert_eq!(nose.x, 0.5);
        assert_eq!(nose.y, 0.25);
        assert_eq!(nose.z, -0.5);
        assert_eq!(nose.visibility, 0.75);

        let m = a.get(BodyLandmark::LeftHip).midpoint(b.get(BodyLandmark::RightHip));
        assert_eq!(m.x, 0.5);
        assert_eq!(m.visibility, 0.5);
    }

    #[test]
    fn test_landmark_set_json_is_a_list() {
        let set = LandmarkSet::new([Landmark::new(0.1, 0.2, 0.3, 0.9); LANDMARK_COUNT]);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json.as_array().map(|a| a.len()), Some(LANDMARK_COUNT));
        let back: LandmarkSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_pose_config_default() {
        let config = PoseConfig::default();
        assert_eq!(config.min_detection_confidence, 0.5);
        assert_eq!(config.min_tracking_confidence, 0.5);
        assert_eq!(config.model_complexity, ModelComplexity::Heavy);
    }
}
