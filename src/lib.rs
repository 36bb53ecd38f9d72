//! Siltblob - content-addressed blob store with resumable multipart uploads
//!
//! Large immutable blobs are streamed in parts (out of order, from many
//! workers), each part hash-verified on the way in, then finalized into a
//! logical blob addressable by a stable name:
//! - SHA-384 content addressing
//! - local filesystem chunk storage with atomic visibility
//! - SQLite upload registry with conditional slot updates

pub mod config;
pub mod error;
pub mod hash;
pub mod operations;
pub mod registry;
pub mod storage;
pub mod store;

pub use config::{StoreConfig, UploadLimits};
pub use error::{Result, SiltError};
pub use hash::{hash_of, new_hash, HASH_HEX_LEN};
pub use operations::{FinishUploadOperation, Part, PutPartOperation, RemoveUploadOperation};
pub use registry::{PartRecord, SlotPrecondition, SqliteUploadRegistry, UploadDoc, UploadRegistry};
pub use storage::{ChunkReader, ChunkStore, FsChunkStore, MultipartIndex};
pub use store::Store;
