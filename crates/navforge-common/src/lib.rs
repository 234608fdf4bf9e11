//! Common utilities and data structures shared by the navforge crates

mod geometry;
mod math;
mod status;

pub use geometry::*;
pub use math::*;
pub use status::Status;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("navigation mesh generation failed: {0}")]
    NavMeshGeneration(String),

    #[error("out of memory while building {0}")]
    OutOfMemory(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("detour error: {0}")]
    Detour(Status),

    #[error("tile cache error: {0}")]
    TileCache(String),
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Detour(status)
    }
}

/// Result type for navforge operations
pub type Result<T> = std::result::Result<T, Error>;
