use std::io;

use thiserror::Error;

/// Errors that can occur while aligning, merging, or storing datasets.
///
#[derive(Error, Debug)]
pub enum Error {
    /// Sources carry different kinds of values for the same axis.
    #[error("axis {axis:?}: sources carry different kinds of values")]
    InconsistentAxisKind { axis: String },

    /// Axis values cannot be arranged into a single monotonic sequence.
    #[error("axis {axis:?}: values cannot be arranged into a monotonic sequence")]
    InconsistentOrdering { axis: String },

    /// Axis value ranges from two sources overlap.
    #[error("axis {axis:?}: value ranges overlap between sources")]
    OverlappingRanges { axis: String },

    /// A cube cannot be placed into the merged block grid.
    #[error("cube {name:?}: {reason}")]
    ShapeMismatch { name: String, reason: String },

    /// Sources declare conflicting chunk offsets for the same axis.
    #[error("axis {axis:?}: conflicting chunk offsets {left} and {right}")]
    ChunkOffsetConflict {
        axis: String,
        left: usize,
        right: usize,
    },

    /// A length doesn't match what the operation requires.
    #[error("{name:?}: expected length {expected}, got {got}")]
    SizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// A named axis or cube doesn't exist.
    #[error("no such axis or cube: {0:?}")]
    BadName(String),

    /// A name is already in use.
    #[error("already exists: {0:?}")]
    AlreadyExists(String),

    /// Stored data is damaged or has an unrecognized format.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Corrupt(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
