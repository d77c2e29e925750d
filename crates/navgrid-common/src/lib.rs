//! Common types shared by the navgrid voxel pipeline crates.

mod geometry;

pub use geometry::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    #[error("navigation grid generation failed: {0}")]
    Generation(String),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;
