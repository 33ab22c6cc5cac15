// Reference skeleton: bone hierarchy, rest pose, and landmark anchors

use crate::models::pose::{BodyLandmark, Landmark, LandmarkSet, LANDMARK_COUNT};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const REFERENCE_SKELETON: &str = include_str!("../../assets/reference_skeleton.json");

// ==============================================================================
// Definition (external configuration format)
// ==============================================================================

/// The landmark (or pair of landmarks) that drives a bone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointAnchor {
    Landmark(BodyLandmark),
    /// Midpoint of two landmarks; the second minus the first gives the across axis
    Midpoint(BodyLandmark, BodyLandmark),
}

impl JointAnchor {
    pub fn resolve(&self, set: &LandmarkSet) -> Landmark {
        match *self {
            JointAnchor::Landmark(l) => *set.get(l),
            JointAnchor::Midpoint(a, b) => set.get(a).midpoint(set.get(b)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndSite {
    pub offset: [f64; 3],
    #[serde(default)]
    pub anchor: Option<JointAnchor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoneDefinition {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    pub offset: [f64; 3],
    /// Rest local orientation as [x, y, z, w]
    #[serde(default = "identity_orientation")]
    pub orientation: [f64; 4],
    #[serde(default)]
    pub anchor: Option<JointAnchor>,
    /// Blend weight toward the nearest driven descendant, for undriven bones
    #[serde(default)]
    pub blend: Option<f64>,
    #[serde(default)]
    pub end_site: Option<EndSite>,
}

fn identity_orientation() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonDefinition {
    pub name: String,
    pub bones: Vec<BoneDefinition>,
}

// ==============================================================================
// Skeleton
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    /// Always smaller than the bone's own index
    pub parent: Option<usize>,
    pub offset: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub anchor: Option<JointAnchor>,
    pub blend: Option<f64>,
    pub end_site: Option<EndSite>,
}

/// Where a driven bone points to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AimTarget {
    /// The anchor of a driven descendant bone
    Bone(usize),
    /// The end-site anchor of the given bone
    EndSite(usize),
}

/// Bone tree stored in depth-first order (children in declaration order)
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    pub name: String,
    bones: Vec<Bone>,
    children: Vec<Vec<usize>>,
}

impl Skeleton {
    /// Bundled 17-bone T-pose skeleton
    pub fn reference() -> SkeletonResult<Self> {
        Self::from_json(REFERENCE_SKELETON)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> SkeletonResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> SkeletonResult<Self> {
        let definition: SkeletonDefinition = serde_json::from_str(json)?;
        Self::from_definition(&definition)
    }

    /// Resolve parent names, reject cycles, and lay bones out depth-first
    pub fn from_definition(definition: &SkeletonDefinition) -> SkeletonResult<Self> {
        if definition.bones.is_empty() {
            return Err(SkeletonError::Empty);
        }

        let mut by_name: HashMap<&str, usize> = HashMap::new();
        for (i, bone) in definition.bones.iter().enumerate() {
            check_bone_name(&bone.name)?;
            if by_name.insert(bone.name.as_str(), i).is_some() {
                return Err(SkeletonError::DuplicateBone(bone.name.clone()));
            }
        }

        let mut parents: Vec<Option<usize>> = Vec::with_capacity(definition.bones.len());
        for bone in &definition.bones {
            let parent = match &bone.parent {
                Some(name) => Some(*by_name.get(name.as_str()).ok_or_else(|| {
                    SkeletonError::UnknownParent {
                        bone: bone.name.clone(),
                        parent: name.clone(),
                    }
                })?),
                None => None,
            };
            parents.push(parent);
        }

        // Walking up from any bone must terminate within bone-count steps
        for start in 0..parents.len() {
            let mut current = parents[start];
            let mut steps = 0;
            while let Some(p) = current {
                steps += 1;
                if p == start || steps > parents.len() {
                    return Err(SkeletonError::Cycle(definition.bones[start].name.clone()));
                }
                current = parents[p];
            }
        }

        let bones = definition
            .bones
            .iter()
            .zip(parents.iter())
            .map(|(def, parent)| Self::bone_from_definition(def, *parent))
            .collect::<SkeletonResult<Vec<_>>>()?;

        Self::assemble(definition.name.clone(), bones)
    }

    /// Build from bones whose parent indices are strictly smaller than their own index
    pub fn from_bones(name: impl Into<String>, bones: Vec<Bone>) -> SkeletonResult<Self> {
        if bones.is_empty() {
            return Err(SkeletonError::Empty);
        }
        for (i, bone) in bones.iter().enumerate() {
            if let Some(p) = bone.parent {
                if p >= i {
                    return Err(SkeletonError::ParentOrder {
                        bone: bone.name.clone(),
                        parent_index: p,
                        index: i,
                    });
                }
            }
        }
        let mut seen = std::collections::HashSet::new();
        for bone in &bones {
            check_bone_name(&bone.name)?;
            if !seen.insert(bone.name.as_str()) {
                return Err(SkeletonError::DuplicateBone(bone.name.clone()));
            }
        }
        Self::assemble(name.into(), bones)
    }

    fn bone_from_definition(def: &BoneDefinition, parent: Option<usize>) -> SkeletonResult<Bone> {
        let offset = Vector3::new(def.offset[0], def.offset[1], def.offset[2]);
        if !offset.iter().all(|v| v.is_finite()) {
            return Err(SkeletonError::InvalidOffset(def.name.clone()));
        }
        if let Some(site) = &def.end_site {
            if !site.offset.iter().all(|v| v.is_finite()) {
                return Err(SkeletonError::InvalidOffset(def.name.clone()));
            }
        }

        let [x, y, z, w] = def.orientation;
        let q = Quaternion::new(w, x, y, z);
        if !(q.norm() > 1e-9) || !q.coords.iter().all(|v| v.is_finite()) {
            return Err(SkeletonError::InvalidOrientation(def.name.clone()));
        }

        if let Some(blend) = def.blend {
            if !(0.0..=1.0).contains(&blend) {
                return Err(SkeletonError::InvalidBlend {
                    bone: def.name.clone(),
                    value: blend,
                });
            }
        }

        Ok(Bone {
            name: def.name.clone(),
            parent,
            offset,
            orientation: UnitQuaternion::from_quaternion(q),
            anchor: def.anchor,
            blend: def.blend,
            end_site: def.end_site.clone(),
        })
    }

    /// Reorder acyclic bones depth-first from the single root
    fn assemble(name: String, bones: Vec<Bone>) -> SkeletonResult<Self> {
        let roots: Vec<usize> = bones
            .iter()
            .enumerate()
            .filter(|(_, b)| b.parent.is_none())
            .map(|(i, _)| i)
            .collect();
        let root = match roots.as_slice() {
            [] => return Err(SkeletonError::NoRoot),
            [root] => *root,
            _ => {
                return Err(SkeletonError::MultipleRoots(
                    roots.iter().map(|&i| bones[i].name.clone()).collect(),
                ))
            }
        };

        let mut declared_children: Vec<Vec<usize>> = vec![Vec::new(); bones.len()];
        for (i, bone) in bones.iter().enumerate() {
            if let Some(p) = bone.parent {
                declared_children[p].push(i);
            }
        }

        let mut order = Vec::with_capacity(bones.len());
        let mut stack = vec![root];
        while let Some(i) = stack.pop() {
            order.push(i);
            for &child in declared_children[i].iter().rev() {
                stack.push(child);
            }
        }
        if order.len() != bones.len() {
            // Unreachable bones can only come from a parent loop detached from the root
            let reached: std::collections::HashSet<usize> = order.iter().copied().collect();
            let orphan = (0..bones.len()).find(|i| !reached.contains(i)).unwrap_or(0);
            return Err(SkeletonError::Cycle(bones[orphan].name.clone()));
        }

        let mut new_index = vec![0usize; bones.len()];
        for (new, &old) in order.iter().enumerate() {
            new_index[old] = new;
        }

        let mut slots: Vec<Option<Bone>> = bones.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(order.len());
        for &old in &order {
            if let Some(mut bone) = slots[old].take() {
                bone.parent = bone.parent.map(|p| new_index[p]);
                ordered.push(bone);
            }
        }

        let mut children = vec![Vec::new(); ordered.len()];
        for (i, bone) in ordered.iter().enumerate() {
            if let Some(p) = bone.parent {
                children[p].push(i);
            }
        }

        Ok(Self {
            name,
            bones: ordered,
            children,
        })
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn root(&self) -> &Bone {
        &self.bones[0]
    }

    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    // --------------------------------------------------------------------------
    // Rest pose geometry
    // --------------------------------------------------------------------------

    /// World-space rest rotations (parents before children)
    pub fn rest_world_rotations(&self) -> Vec<UnitQuaternion<f64>> {
        let mut out: Vec<UnitQuaternion<f64>> = Vec::with_capacity(self.bones.len());
        for bone in &self.bones {
            let rotation = match bone.parent {
                Some(p) => out[p] * bone.orientation,
                None => bone.orientation,
            };
            out.push(rotation);
        }
        out
    }

    /// World-space rest positions of each bone's joint
    pub fn rest_world_positions(&self) -> Vec<Vector3<f64>> {
        let rotations = self.rest_world_rotations();
        let mut out: Vec<Vector3<f64>> = Vec::with_capacity(self.bones.len());
        for bone in &self.bones {
            let position = match bone.parent {
                Some(p) => out[p] + rotations[p] * bone.offset,
                None => bone.offset,
            };
            out.push(position);
        }
        out
    }

    /// Rest position of every landmark named by a single-landmark anchor or end site
    pub fn rest_landmark_positions(&self) -> HashMap<BodyLandmark, Vector3<f64>> {
        let rotations = self.rest_world_rotations();
        let positions = self.rest_world_positions();
        let mut out = HashMap::new();
        for (i, bone) in self.bones.iter().enumerate() {
            if let Some(JointAnchor::Landmark(l)) = bone.anchor {
                out.insert(l, positions[i]);
            }
            if let Some(site) = &bone.end_site {
                if let Some(JointAnchor::Landmark(l)) = site.anchor {
                    let offset = Vector3::new(site.offset[0], site.offset[1], site.offset[2]);
                    out.insert(l, positions[i] + rotations[i] * offset);
                }
            }
        }
        out
    }

    /// Rest position of an anchor, falling back to the given bone's joint
    pub fn rest_anchor_position(
        &self,
        anchor: JointAnchor,
        landmarks: &HashMap<BodyLandmark, Vector3<f64>>,
        fallback: Vector3<f64>,
    ) -> Vector3<f64> {
        match anchor {
            JointAnchor::Landmark(l) => landmarks.get(&l).copied().unwrap_or(fallback),
            JointAnchor::Midpoint(a, b) => match (landmarks.get(&a), landmarks.get(&b)) {
                (Some(pa), Some(pb)) => (pa + pb) * 0.5,
                _ => fallback,
            },
        }
    }

    /// Follow the first-child chain to the nearest driven bone or end-site anchor
    pub fn aim_target(&self, index: usize) -> Option<AimTarget> {
        let mut current = index;
        loop {
            match self.children[current].first() {
                Some(&child) => {
                    if self.bones[child].anchor.is_some() {
                        return Some(AimTarget::Bone(child));
                    }
                    current = child;
                }
                None => {
                    let has_site_anchor = self.bones[current]
                        .end_site
                        .as_ref()
                        .map_or(false, |s| s.anchor.is_some());
                    return has_site_anchor.then_some(AimTarget::EndSite(current));
                }
            }
        }
    }

    /// Landmark layout matching the rest pose exactly
    ///
    /// `origin` is the normalized position the root anchor lands on, `scale` converts
    /// skeleton units to normalized units and `aspect_ratio` is the frame's width over height.
    /// Landmarks the skeleton does not reference are placed on the root anchor.
    pub fn rest_landmarks(&self, origin: [f32; 3], scale: f64, aspect_ratio: f64) -> LandmarkSet {
        let known = self.rest_landmark_positions();
        let positions = self.rest_world_positions();
        let root_point = match self.root().anchor {
            Some(anchor) => self.rest_anchor_position(anchor, &known, positions[0]),
            None => positions[0],
        };

        let mut set = LandmarkSet::new(
            [Landmark::new(origin[0], origin[1], origin[2], 1.0); LANDMARK_COUNT],
        );
        for (landmark, world) in &known {
            let rel = (world - root_point) * scale;
            set.set(
                *landmark,
                Landmark::new(
                    origin[0] + (rel.x / aspect_ratio) as f32,
                    origin[1] - rel.y as f32,
                    origin[2] - (rel.z / aspect_ratio) as f32,
                    1.0,
                ),
            );
        }
        set
    }
}

// ==============================================================================
// Error Types
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SkeletonError {
    #[error("Failed to read skeleton: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse skeleton: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Skeleton has no bones")]
    Empty,

    #[error("Duplicate bone name: {0}")]
    DuplicateBone(String),

    #[error("Invalid bone name {0:?}: names must be non-empty printable ASCII without whitespace")]
    InvalidBoneName(String),

    #[error("Bone {bone} references unknown parent {parent}")]
    UnknownParent { bone: String, parent: String },

    #[error("Skeleton has no root bone")]
    NoRoot,

    #[error("Skeleton has several root bones: {0:?}")]
    MultipleRoots(Vec<String>),

    #[error("Cyclic parent reference involving bone {0}")]
    Cycle(String),

    #[error("Bone {bone} at index {index} has parent index {parent_index}, parents must come first")]
    ParentOrder {
        bone: String,
        parent_index: usize,
        index: usize,
    },

    #[error("Invalid rest orientation for bone {0}")]
    InvalidOrientation(String),

    #[error("Invalid rest offset for bone {0}")]
    InvalidOffset(String),

    #[error("Blend weight {value} for bone {bone} must be within [0, 1]")]
    InvalidBlend { bone: String, value: f64 },
}

pub type SkeletonResult<T> = Result<T, SkeletonError>;

/// BVH separates tokens with whitespace and is read as ASCII
fn check_bone_name(name: &str) -> SkeletonResult<()> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic()) || name.contains(['{', '}']) {
        return Err(SkeletonError::InvalidBoneName(name.to_string()));
    }
    Ok(())
}
