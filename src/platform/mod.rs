// Platform integration: video decoding sources and pose estimator backends

pub mod capture;
pub mod pose;
