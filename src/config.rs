use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Size and count ceilings for multipart uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadLimits {
    /// Minimum size in bytes of every part except the last.
    pub min_part_size: u64,
    /// Maximum size in bytes of any single part.
    pub max_part_size: u64,
    /// Exclusive ceiling on part numbers.
    pub max_parts: u32,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            min_part_size: 5 * 1024 * 1024,
            max_part_size: 50 * 1024 * 1024,
            max_parts: 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding chunk files and the upload registry database.
    pub data_dir: PathBuf,
    #[serde(default)]
    pub limits: UploadLimits,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            limits: UploadLimits::default(),
        }
    }

    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SILTBLOB"))
            .build()
            .map_err(|e| crate::error::SiltError::Config(e.to_string()))?;

        let config: StoreConfig = settings
            .try_deserialize()
            .map_err(|e| crate::error::SiltError::Config(e.to_string()))?;

        Ok(config)
    }
}
