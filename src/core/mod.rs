pub mod config;

// Estimation and track assembly
pub mod ml_models;
pub mod pose_estimator;
pub mod track_builder;

// Motion processing
pub mod smoother;
pub mod skeleton_mapper;
pub mod bvh_writer;
pub mod pipeline;

// Video decoding
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_wrapper;
