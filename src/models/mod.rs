// Data models for pose tracks, skeletons, and animation output

pub mod capture;
pub mod pose;
pub mod track;
pub mod skeleton;
pub mod animation;
pub mod pipeline;
