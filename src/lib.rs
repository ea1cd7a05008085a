pub mod artifacts;
pub mod config;
pub mod dataset;
pub mod db;
pub mod features;
pub mod graph;
pub mod matrix;
pub mod model;
pub mod pipeline;
pub mod recommend;

/// Application name for XDG paths
pub const APP_NAME: &str = "tunegraph";
