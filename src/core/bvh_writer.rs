// BVH (Biovision Hierarchy) serialization of animation documents
// Output is deterministic: fixed precision, no timestamps, bones in depth-first order

use crate::models::animation::AnimationDocument;
use crate::models::pipeline::PipelineResult;
use crate::models::skeleton::Skeleton;
use nalgebra::{UnitQuaternion, Vector3};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

const ROOT_CHANNELS: &str = "CHANNELS 6 Xposition Yposition Zposition Zrotation Yrotation Xrotation";
const JOINT_CHANNELS: &str = "CHANNELS 3 Zrotation Yrotation Xrotation";

/// Fixed 6-decimal formatting with negative zero folded to zero
fn fmt(value: f64) -> String {
    let value = if value.abs() < 5e-7 { 0.0 } else { value };
    format!("{:.6}", value)
}

fn fmt_vec(v: &Vector3<f64>) -> String {
    format!("{} {} {}", fmt(v.x), fmt(v.y), fmt(v.z))
}

/// Z, Y, X angles in degrees for R = Rz * Ry * Rx
fn zyx_degrees(rotation: &UnitQuaternion<f64>) -> [f64; 3] {
    let (roll, pitch, yaw) = rotation.euler_angles();
    [yaw.to_degrees(), pitch.to_degrees(), roll.to_degrees()]
}

pub fn write_bvh<W: Write>(document: &AnimationDocument, out: &mut W) -> PipelineResult<()> {
    let skeleton = &document.skeleton;

    writeln!(out, "HIERARCHY")?;
    write_joint(skeleton, 0, 0, out)?;

    writeln!(out, "MOTION")?;
    writeln!(out, "Frames: {}", document.frame_count())?;
    // Shortest round-trip form: frames * frame time must reproduce the duration
    writeln!(out, "Frame Time: {}", document.frame_time())?;

    let mut line = String::new();
    for frame in &document.frames {
        line.clear();
        for (bone, channel) in skeleton.bones().iter().zip(frame.channels.iter()) {
            if bone.parent.is_none() {
                let translation = channel.translation.unwrap_or_else(Vector3::zeros);
                for v in translation.iter() {
                    push_value(&mut line, *v);
                }
            }
            let local = bone.orientation * channel.rotation;
            for v in zyx_degrees(&local) {
                push_value(&mut line, v);
            }
        }
        writeln!(out, "{}", line)?;
    }

    out.flush()?;
    Ok(())
}

fn push_value(line: &mut String, value: f64) {
    if !line.is_empty() {
        line.push(' ');
    }
    line.push_str(&fmt(value));
}

fn write_joint<W: Write>(skeleton: &Skeleton, index: usize, depth: usize, out: &mut W) -> PipelineResult<()> {
    let bone = &skeleton.bones()[index];
    let indent = "\t".repeat(depth);

    let keyword = if bone.parent.is_none() { "ROOT" } else { "JOINT" };
    writeln!(out, "{}{} {}", indent, keyword, bone.name)?;
    writeln!(out, "{}{{", indent)?;
    writeln!(out, "{}\tOFFSET {}", indent, fmt_vec(&bone.offset))?;
    let channels = if bone.parent.is_none() { ROOT_CHANNELS } else { JOINT_CHANNELS };
    writeln!(out, "{}\t{}", indent, channels)?;

    let children = skeleton.children(index);
    if children.is_empty() {
        let offset = bone
            .end_site
            .as_ref()
            .map(|site| Vector3::new(site.offset[0], site.offset[1], site.offset[2]))
            .unwrap_or_else(Vector3::zeros);
        writeln!(out, "{}\tEnd Site", indent)?;
        writeln!(out, "{}\t{{", indent)?;
        writeln!(out, "{}\t\tOFFSET {}", indent, fmt_vec(&offset))?;
        writeln!(out, "{}\t}}", indent)?;
    } else {
        for &child in children {
            write_joint(skeleton, child, depth + 1, out)?;
        }
    }

    writeln!(out, "{}}}", indent)?;
    Ok(())
}

pub fn to_bvh_string(document: &AnimationDocument) -> PipelineResult<String> {
    let mut buffer = Vec::new();
    write_bvh(document, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
}

pub fn save_bvh<P: AsRef<Path>>(document: &AnimationDocument, path: P) -> PipelineResult<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    write_bvh(document, &mut writer)?;
    log::info!("Wrote BVH with {} frames to {:?}", document.frame_count(), path.as_ref());
    Ok(())
}
