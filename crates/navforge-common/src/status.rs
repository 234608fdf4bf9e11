//! Status codes for navigation mesh operations

/// Status enum for Detour and tile cache operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Operation failed due to an unknown reason
    Failure,
    /// Provided parameter was invalid
    InvalidParam,
    /// Operation ran out of memory
    OutOfMemory,
    /// A fixed-size buffer was too small for the result
    BufferTooSmall,
    /// Pathfinding failed; no valid path found
    PathInvalid,
    /// Value already exists
    AlreadyExists,
    /// Value does not exist or is not found
    NotFound,
    /// Input data is corrupted or invalid
    DataCorrupted,
    /// Data has wrong magic number
    WrongMagic,
    /// Data has wrong version
    WrongVersion,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Status::Failure => "operation failed",
            Status::InvalidParam => "invalid parameter",
            Status::OutOfMemory => "out of memory",
            Status::BufferTooSmall => "buffer too small",
            Status::PathInvalid => "path invalid",
            Status::AlreadyExists => "already exists",
            Status::NotFound => "not found",
            Status::DataCorrupted => "data corrupted",
            Status::WrongMagic => "wrong magic number",
            Status::WrongVersion => "wrong version",
        };
        f.write_str(text)
    }
}
