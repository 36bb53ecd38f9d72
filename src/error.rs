use thiserror::Error;

pub type Result<T> = std::result::Result<T, SiltError>;

#[derive(Error, Debug)]
pub enum SiltError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("resource at path {path:?} not found")]
    BlobNotFound { path: String },

    #[error("upload id {id:?} not found")]
    UploadNotFound { id: String },

    #[error("upload id {id:?} already exists")]
    UploadExists { id: String },

    #[error("hash mismatch")]
    HashMismatch,

    #[error("cannot upload part {name:?}: hash mismatch")]
    PartHashMismatch { name: String },

    #[error("hash mismatch for already uploaded part")]
    CompletedPartHashMismatch,

    #[error("hash mismatch on part {index} (got {got:?} want {want:?})")]
    FinishHashMismatch {
        index: u32,
        got: String,
        want: String,
    },

    #[error("part number {number} too big (maximum {maximum})")]
    PartNumberTooBig { number: u32, maximum: u32 },

    #[error("non-positive part {number} size {size}")]
    PartSizeNonPositive { number: u32, size: u64 },

    #[error("part {number} too big (maximum {maximum})")]
    PartTooBig { number: u32, maximum: u64 },

    #[error("part too small (need at least {need} bytes, got {got})")]
    PartTooSmall { need: u64, got: u64 },

    #[error("part {number} was too small (need at least {need} bytes, got {got})")]
    ExistingPartTooSmall { number: u32, need: u64, got: u64 },

    #[error("part count mismatch (got {got} but {uploaded} uploaded)")]
    PartCountMismatch { got: usize, uploaded: usize },

    #[error("part {number} not uploaded yet")]
    PartNotUploaded { number: u32 },

    #[error("upload expired or removed")]
    UploadRemoved,

    /// Sentinel returned by the registry when a conditional slot update
    /// no longer matches its precondition; callers re-read and retry.
    #[error("upload slot precondition failed")]
    SlotConflict,

    #[error("too much contention updating upload {id:?}")]
    UploadContention { id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SiltError {
    /// True for lookups of a blob name or upload id that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SiltError::BlobNotFound { .. } | SiltError::UploadNotFound { .. }
        )
    }
}
