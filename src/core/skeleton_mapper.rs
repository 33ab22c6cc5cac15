// Retargets smoothed landmarks onto the skeleton as per-frame bone rotations
//
// Every driven bone gets a world-space delta D that turns its rest aim direction into the
// observed one, either by aligning a two-landmark frame or by the minimal swing on top of
// the nearest driven ancestor's delta. Undriven bones blend between the nearest driven
// ancestor and descendant.
// World rotations W = D * rest_world are then made local to the parent and expressed
// relative to the bone's rest orientation, so the rest pose maps to identity channels.

use crate::models::animation::{AnimationDocument, BoneChannel, FrameChannels};
use crate::models::pipeline::{PipelineError, PipelineResult};
use crate::models::pose::{Landmark, LandmarkSet};
use crate::models::skeleton::{AimTarget, JointAnchor, Skeleton};
use crate::models::track::{FrameFill, SmoothedTrack};
use log::{debug, warn};
use nalgebra::{Rotation3, Unit, UnitQuaternion, Vector3};

const DEGENERATE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct MapperConfig {
    /// Multiplier from landmark space to skeleton units for the root translation
    ///
    /// The hip center is first converted to aspect-corrected, y-up space as
    /// `(x * aspect, -y, -z * aspect)` and only then scaled.
    pub unit_scale: f64,
    /// Root anchor visibility below this counts as a missing root
    pub min_root_visibility: f32,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            unit_scale: 1.0,
            min_root_visibility: 0.5,
        }
    }
}

/// Landmark to skeleton space: x right, y up, z toward the camera
pub fn landmark_to_world(landmark: &Landmark, aspect_ratio: f64) -> Vector3<f64> {
    Vector3::new(
        landmark.x as f64 * aspect_ratio,
        -(landmark.y as f64),
        -(landmark.z as f64) * aspect_ratio,
    )
}

/// Minimal rotation taking `from` onto `to`; half turn about a perpendicular axis when opposite
pub fn swing_rotation(from: &Vector3<f64>, to: &Vector3<f64>) -> UnitQuaternion<f64> {
    if let Some(rotation) = UnitQuaternion::rotation_between(from, to) {
        return rotation;
    }
    let mut axis = from.cross(&Vector3::x());
    if axis.norm() < 1e-6 {
        axis = from.cross(&Vector3::y());
    }
    UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis), std::f64::consts::PI)
}

/// Orthonormal frame with `aim` as Y and `across` projected onto X
fn aligned_frame(aim: &Vector3<f64>, across: &Vector3<f64>) -> Option<Rotation3<f64>> {
    let y = aim.try_normalize(DEGENERATE_EPSILON)?;
    let x = (across - y * across.dot(&y)).try_normalize(DEGENERATE_EPSILON)?;
    let z = x.cross(&y);
    Some(Rotation3::from_basis_unchecked(&[x, y, z]))
}

#[derive(Debug, Clone)]
enum Drive {
    Aim {
        anchor: JointAnchor,
        target: JointAnchor,
        rest_dir: Vector3<f64>,
        rest_frame: Option<Rotation3<f64>>,
        /// Nearest driven ancestor; single-landmark swings inherit its twist
        reference: Option<usize>,
    },
    Blend {
        ancestor: Option<usize>,
        descendant: Option<usize>,
        weight: f64,
    },
}

pub struct SkeletonMapper {
    skeleton: Skeleton,
    config: MapperConfig,
    rest_world: Vec<UnitQuaternion<f64>>,
    drives: Vec<Drive>,
}

impl SkeletonMapper {
    pub fn new(skeleton: Skeleton, config: MapperConfig) -> Self {
        let rest_world = skeleton.rest_world_rotations();
        let drives = Self::plan(&skeleton);
        Self {
            skeleton,
            config,
            rest_world,
            drives,
        }
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    /// Decide per bone whether it aims at landmarks or blends between neighbours
    fn plan(skeleton: &Skeleton) -> Vec<Drive> {
        let landmarks = skeleton.rest_landmark_positions();
        let positions = skeleton.rest_world_positions();
        let rotations = skeleton.rest_world_rotations();
        let bones = skeleton.bones();

        let mut drives: Vec<Option<Drive>> = vec![None; bones.len()];
        for (i, bone) in bones.iter().enumerate() {
            let anchor = match bone.anchor {
                Some(anchor) => anchor,
                None => continue,
            };
            let (target, target_point) = match skeleton.aim_target(i) {
                Some(AimTarget::Bone(j)) => match bones[j].anchor {
                    Some(t) => (t, skeleton.rest_anchor_position(t, &landmarks, positions[j])),
                    None => continue,
                },
                Some(AimTarget::EndSite(j)) => {
                    let site = match &bones[j].end_site {
                        Some(site) => site,
                        None => continue,
                    };
                    let t = match site.anchor {
                        Some(t) => t,
                        None => continue,
                    };
                    let offset = Vector3::new(site.offset[0], site.offset[1], site.offset[2]);
                    let fallback = positions[j] + rotations[j] * offset;
                    (t, skeleton.rest_anchor_position(t, &landmarks, fallback))
                }
                None => continue,
            };

            let anchor_point = skeleton.rest_anchor_position(anchor, &landmarks, positions[i]);
            let rest_dir = match (target_point - anchor_point).try_normalize(DEGENERATE_EPSILON) {
                Some(dir) => dir,
                None => continue,
            };
            let rest_frame = match anchor {
                JointAnchor::Midpoint(a, b) => match (landmarks.get(&a), landmarks.get(&b)) {
                    (Some(pa), Some(pb)) => aligned_frame(&rest_dir, &(pb - pa)),
                    _ => None,
                },
                JointAnchor::Landmark(_) => None,
            };

            drives[i] = Some(Drive::Aim {
                anchor,
                target,
                rest_dir,
                rest_frame,
                reference: None,
            });
        }

        let driven: Vec<bool> = drives.iter().map(|d| d.is_some()).collect();
        drives
            .into_iter()
            .enumerate()
            .map(|(i, drive)| match drive {
                Some(Drive::Aim {
                    anchor,
                    target,
                    rest_dir,
                    rest_frame,
                    ..
                }) => {
                    let mut reference = bones[i].parent;
                    while let Some(p) = reference {
                        if driven[p] {
                            break;
                        }
                        reference = bones[p].parent;
                    }
                    Drive::Aim {
                        anchor,
                        target,
                        rest_dir,
                        rest_frame,
                        reference,
                    }
                }
                Some(blend) => blend,
                None => {
                    let mut up = 0usize;
                    let mut ancestor = bones[i].parent;
                    while let Some(p) = ancestor {
                        up += 1;
                        if driven[p] {
                            break;
                        }
                        ancestor = bones[p].parent;
                    }

                    let mut down = 0usize;
                    let mut descendant = skeleton.children(i).first().copied();
                    while let Some(c) = descendant {
                        down += 1;
                        if driven[c] {
                            break;
                        }
                        descendant = skeleton.children(c).first().copied();
                    }

                    let weight = bones[i]
                        .blend
                        .unwrap_or_else(|| up as f64 / (up + down).max(1) as f64);
                    Drive::Blend {
                        ancestor,
                        descendant,
                        weight,
                    }
                }
            })
            .collect()
    }

    /// Frames whose root anchor is a gap or below the visibility threshold
    pub fn count_missing_root(&self, track: &SmoothedTrack) -> usize {
        let anchor = match self.skeleton.root().anchor {
            Some(anchor) => anchor,
            None => return 0,
        };
        track
            .frames
            .iter()
            .filter(|frame| match (&frame.landmarks, frame.fill) {
                (Some(set), FrameFill::Observed) => {
                    !anchor.resolve(set).is_visible(self.config.min_root_visibility)
                }
                _ => true,
            })
            .count()
    }

    /// Map a smoothed track onto the skeleton
    pub fn map(&self, track: &SmoothedTrack) -> PipelineResult<AnimationDocument> {
        let total = track.len();
        let missing = self.count_missing_root(track);
        if missing * 2 > total {
            warn!("Root landmark missing in {} of {} frames", missing, total);
            return Err(PipelineError::MissingRootLandmark { missing, total });
        }

        let bone_count = self.skeleton.len();
        let mut previous = vec![UnitQuaternion::identity(); bone_count];
        let mut previous_translation = Vector3::zeros();
        let mut degenerate = 0usize;
        let mut frames = Vec::with_capacity(total);

        for frame in &track.frames {
            let deltas = match &frame.landmarks {
                Some(set) => self.frame_deltas(set, track.aspect_ratio, &previous, &mut degenerate),
                None => previous.clone(),
            };

            let translation = frame
                .landmarks
                .as_ref()
                .and_then(|set| self.root_translation(set, track.aspect_ratio))
                .unwrap_or(previous_translation);

            frames.push(FrameChannels {
                frame_index: frame.frame_index,
                timestamp: frame.timestamp,
                fill: frame.fill,
                channels: self.channels(&deltas, translation),
            });
            previous = deltas;
            previous_translation = translation;
        }

        if degenerate > 0 {
            debug!("Reused previous rotation for {} degenerate bone directions", degenerate);
        }

        Ok(AnimationDocument::new(self.skeleton.clone(), track.frame_rate, frames))
    }

    fn root_translation(&self, set: &LandmarkSet, aspect_ratio: f64) -> Option<Vector3<f64>> {
        let anchor = self.skeleton.root().anchor?;
        let position = landmark_to_world(&anchor.resolve(set), aspect_ratio) * self.config.unit_scale;
        position.iter().all(|v| v.is_finite()).then_some(position)
    }

    /// World-space rotation deltas from rest for one frame
    fn frame_deltas(
        &self,
        set: &LandmarkSet,
        aspect_ratio: f64,
        previous: &[UnitQuaternion<f64>],
        degenerate: &mut usize,
    ) -> Vec<UnitQuaternion<f64>> {
        let mut deltas = previous.to_vec();

        for (i, drive) in self.drives.iter().enumerate() {
            if let Drive::Aim {
                anchor,
                target,
                rest_dir,
                rest_frame,
                reference,
            } = drive
            {
                let from = landmark_to_world(&anchor.resolve(set), aspect_ratio);
                let to = landmark_to_world(&target.resolve(set), aspect_ratio);
                let dir = match (to - from).try_normalize(DEGENERATE_EPSILON) {
                    Some(dir) if dir.iter().all(|v| v.is_finite()) => dir,
                    _ => {
                        *degenerate += 1;
                        continue;
                    }
                };

                let aligned = match (rest_frame, anchor) {
                    (Some(rest), JointAnchor::Midpoint(a, b)) => {
                        let across = landmark_to_world(set.get(*b), aspect_ratio)
                            - landmark_to_world(set.get(*a), aspect_ratio);
                        aligned_frame(&dir, &across)
                            .map(|current| UnitQuaternion::from_rotation_matrix(&(current * rest.inverse())))
                    }
                    _ => None,
                };
                let delta = match aligned {
                    Some(delta) => delta,
                    None => {
                        // Ancestors precede descendants, so the reference is already final
                        let parent = reference.map_or_else(UnitQuaternion::identity, |r| deltas[r]);
                        swing_rotation(&(parent * rest_dir), &dir) * parent
                    }
                };
                deltas[i] = delta;
            }
        }

        for (i, drive) in self.drives.iter().enumerate() {
            if let Drive::Blend {
                ancestor,
                descendant,
                weight,
            } = drive
            {
                deltas[i] = match (ancestor, descendant) {
                    (Some(a), Some(d)) => {
                        let (qa, qd) = (deltas[*a], deltas[*d]);
                        qa.try_slerp(&qd, *weight, 1e-9).unwrap_or(qa)
                    }
                    (Some(a), None) => deltas[*a],
                    (None, Some(d)) => deltas[*d],
                    (None, None) => UnitQuaternion::identity(),
                };
            }
        }

        deltas
    }

    /// Local channel values relative to rest orientation
    fn channels(&self, deltas: &[UnitQuaternion<f64>], translation: Vector3<f64>) -> Vec<BoneChannel> {
        let world: Vec<UnitQuaternion<f64>> = deltas
            .iter()
            .zip(self.rest_world.iter())
            .map(|(d, rest)| d * rest)
            .collect();

        self.skeleton
            .bones()
            .iter()
            .enumerate()
            .map(|(i, bone)| {
                let local = match bone.parent {
                    Some(p) => world[p].inverse() * world[i],
                    None => world[i],
                };
                let rotation = bone.orientation.inverse() * local;
                match bone.parent {
                    None => BoneChannel::root(rotation, translation),
                    Some(_) => BoneChannel::rotation(rotation),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pose::{BodyLandmark, LANDMARK_COUNT};
    use crate::models::track::SmoothedFrame;
    use approx::assert_abs_diff_eq;
    use std::collections::HashMap;

    const SCALE: f64 = 0.005;

    fn smoothed(sets: Vec<Option<LandmarkSet>>, aspect_ratio: f64) -> SmoothedTrack {
        SmoothedTrack {
            frame_rate: 30.0,
            aspect_ratio,
            frames: sets
                .into_iter()
                .enumerate()
                .map(|(i, landmarks)| SmoothedFrame {
                    frame_index: i,
                    timestamp: i as f64 / 30.0,
                    fill: if landmarks.is_some() {
                        FrameFill::Observed
                    } else {
                        FrameFill::Held
                    },
                    landmarks,
                })
                .collect(),
        }
    }

    /// Place skeleton-space points into normalized landmark space around `origin`
    fn landmarks_from_world(points: &HashMap<BodyLandmark, Vector3<f64>>, origin: [f32; 3], aspect: f64) -> LandmarkSet {
        let mut set = LandmarkSet::new([Landmark::new(origin[0], origin[1], origin[2], 1.0); LANDMARK_COUNT]);
        for (landmark, p) in points {
            let rel = p * SCALE;
            set.set(
                *landmark,
                Landmark::new(
                    origin[0] + (rel.x / aspect) as f32,
                    origin[1] - rel.y as f32,
                    origin[2] - (rel.z / aspect) as f32,
                    1.0,
                ),
            );
        }
        set
    }

    fn mapper() -> SkeletonMapper {
        SkeletonMapper::new(Skeleton::reference().unwrap(), MapperConfig::default())
    }

    fn assert_identity(q: &UnitQuaternion<f64>) {
        assert!(q.angle() < 1e-4, "expected identity, got angle {}", q.angle());
    }

    #[test]
    fn test_blend_weights_follow_hop_fraction() {
        let mapper = mapper();
        let spine = mapper.skeleton.find("Spine").unwrap();
        let chest = mapper.skeleton.find("Chest").unwrap();
        match (&mapper.drives[spine], &mapper.drives[chest]) {
            (Drive::Blend { weight: ws, .. }, Drive::Blend { weight: wc, .. }) => {
                assert_abs_diff_eq!(*ws, 1.0 / 3.0, epsilon = 1e-12);
                assert_abs_diff_eq!(*wc, 2.0 / 3.0, epsilon = 1e-12);
            }
            other => panic!("unexpected drives: {:?}", other),
        }
        let head = mapper.skeleton.find("Head").unwrap();
        assert!(matches!(mapper.drives[head], Drive::Blend { descendant: None, .. }));
    }

    #[test]
    fn test_rest_pose_gives_identity_rotations() {
        let skeleton = Skeleton::reference().unwrap();
        let aspect = 16.0 / 9.0;
        let rest = skeleton.rest_landmarks([0.5, 0.6, 0.0], SCALE, aspect);
        let track = smoothed(vec![Some(rest.clone()), Some(rest.clone()), Some(rest)], aspect);

        let doc = mapper().map(&track).unwrap();
        assert_eq!(doc.frame_count(), 3);
        let first = doc.frames[0].channels[0].translation.unwrap();
        for frame in &doc.frames {
            for channel in &frame.channels {
                assert_identity(&channel.rotation);
            }
            let t = frame.channels[0].translation.unwrap();
            assert_abs_diff_eq!(t, first, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_root_translation_is_scaled_hip_center() {
        let skeleton = Skeleton::reference().unwrap();
        let aspect = 2.0;
        let rest = skeleton.rest_landmarks([0.4, 0.7, 0.1], SCALE, aspect);
        let track = smoothed(vec![Some(rest)], aspect);

        let mapper = SkeletonMapper::new(
            skeleton,
            MapperConfig {
                unit_scale: 100.0,
                ..MapperConfig::default()
            },
        );
        let doc = mapper.map(&track).unwrap();
        let t = doc.frames[0].channels[0].translation.unwrap();
        assert_abs_diff_eq!(t.x, 0.4 * 2.0 * 100.0, epsilon = 1e-3);
        assert_abs_diff_eq!(t.y, -0.7 * 100.0, epsilon = 1e-3);
        assert_abs_diff_eq!(t.z, -0.1 * 2.0 * 100.0, epsilon = 1e-3);
        assert!(doc.frames[0].channels[1..].iter().all(|c| c.translation.is_none()));
    }

    #[test]
    fn test_root_translation_follows_image_motion() {
        let skeleton = Skeleton::reference().unwrap();
        let aspect = 16.0 / 9.0;
        let start = skeleton.rest_landmarks([0.5, 0.5, 0.0], SCALE, aspect);
        // Subject moves image-right and image-down
        let moved = skeleton.rest_landmarks([0.6, 0.7, 0.0], SCALE, aspect);
        let doc = mapper().map(&smoothed(vec![Some(start), Some(moved)], aspect)).unwrap();

        let delta = doc.frames[1].channels[0].translation.unwrap() - doc.frames[0].channels[0].translation.unwrap();
        assert_abs_diff_eq!(delta.x, 0.1 * aspect, epsilon = 1e-5);
        assert_abs_diff_eq!(delta.y, -0.2, epsilon = 1e-5);
        assert_abs_diff_eq!(delta.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_whole_body_yaw_lands_on_root() {
        let skeleton = Skeleton::reference().unwrap();
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.6);
        let rotated: HashMap<BodyLandmark, Vector3<f64>> = skeleton
            .rest_landmark_positions()
            .into_iter()
            .map(|(l, p)| (l, yaw * p))
            .collect();
        let set = landmarks_from_world(&rotated, [0.5, 0.5, 0.0], 1.0);
        let doc = mapper().map(&smoothed(vec![Some(set)], 1.0)).unwrap();

        let root = doc.frames[0].channels[0].rotation;
        assert!(root.angle_to(&yaw) < 1e-4, "root {:?}", root.euler_angles());
        for channel in &doc.frames[0].channels[1..] {
            assert_identity(&channel.rotation);
        }
    }

    #[test]
    fn test_bent_elbow_rotates_forearm_only() {
        let skeleton = Skeleton::reference().unwrap();
        let mut points = skeleton.rest_landmark_positions();
        let elbow = points[&BodyLandmark::LeftElbow];
        points.insert(BodyLandmark::LeftWrist, elbow + Vector3::new(0.0, -25.0, 0.0));
        points.insert(BodyLandmark::LeftIndex, elbow + Vector3::new(0.0, -33.0, 0.0));
        let set = landmarks_from_world(&points, [0.5, 0.5, 0.0], 1.0);

        let mapper = mapper();
        let doc = mapper.map(&smoothed(vec![Some(set)], 1.0)).unwrap();
        let channels = &doc.frames[0].channels;
        let arm = mapper.skeleton.find("LeftArm").unwrap();
        let forearm = mapper.skeleton.find("LeftForeArm").unwrap();
        let hand = mapper.skeleton.find("LeftHand").unwrap();

        assert_identity(&channels[arm].rotation);
        assert_identity(&channels[hand].rotation);
        let (roll, pitch, yaw) = channels[forearm].rotation.euler_angles();
        assert_abs_diff_eq!(roll, 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(pitch, 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(yaw, -std::f64::consts::FRAC_PI_2, epsilon = 1e-4);
    }

    #[test]
    fn test_opposite_direction_is_half_turn() {
        let q = swing_rotation(&Vector3::x(), &(-Vector3::x()));
        assert_abs_diff_eq!(q.angle(), std::f64::consts::PI, epsilon = 1e-9);
        assert_abs_diff_eq!(q * Vector3::x(), -Vector3::x(), epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_direction_reuses_previous_frame() {
        let skeleton = Skeleton::reference().unwrap();
        let mut points = skeleton.rest_landmark_positions();
        let elbow = points[&BodyLandmark::LeftElbow];
        points.insert(BodyLandmark::LeftWrist, elbow + Vector3::new(0.0, -25.0, 0.0));
        let bent = landmarks_from_world(&points, [0.5, 0.5, 0.0], 1.0);
        points.insert(BodyLandmark::LeftWrist, elbow);
        let collapsed = landmarks_from_world(&points, [0.5, 0.5, 0.0], 1.0);

        let mapper = mapper();
        let doc = mapper.map(&smoothed(vec![Some(bent), Some(collapsed)], 1.0)).unwrap();
        let forearm = mapper.skeleton.find("LeftForeArm").unwrap();
        let a = doc.frames[0].channels[forearm].rotation;
        let b = doc.frames[1].channels[forearm].rotation;
        assert!(a.angle_to(&b) < 1e-9);
        assert!(a.angle() > 1.0);
    }

    #[test]
    fn test_missing_root_over_half_fails() {
        let skeleton = Skeleton::reference().unwrap();
        let rest = skeleton.rest_landmarks([0.5, 0.5, 0.0], SCALE, 1.0);
        let mapper = mapper();

        let mostly_gaps = smoothed(vec![Some(rest.clone()), None, None], 1.0);
        match mapper.map(&mostly_gaps) {
            Err(PipelineError::MissingRootLandmark { missing, total }) => {
                assert_eq!(missing, 2);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected result: {:?}", other.map(|d| d.frame_count())),
        }

        let half = smoothed(vec![Some(rest.clone()), None], 1.0);
        assert!(mapper.map(&half).is_ok());

        let mut faint = rest.clone();
        for hip in [BodyLandmark::LeftHip, BodyLandmark::RightHip] {
            let mut l = *faint.get(hip);
            l.visibility = 0.2;
            faint.set(hip, l);
        }
        let low_visibility = smoothed(vec![Some(faint.clone()), Some(faint), Some(rest)], 1.0);
        assert!(matches!(
            mapper.map(&low_visibility),
            Err(PipelineError::MissingRootLandmark { missing: 2, total: 3 })
        ));
    }

    #[test]
    fn test_all_gap_track_fails_with_missing_root() {
        let track = smoothed(vec![None, None], 1.0);
        assert!(matches!(
            mapper().map(&track),
            Err(PipelineError::MissingRootLandmark { missing: 2, total: 2 })
        ));
    }
}
