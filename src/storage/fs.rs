use crate::error::{Result, SiltError};
use crate::hash::{hex_digest, new_hash};
use crate::storage::{ChunkReader, ChunkStore};
use async_trait::async_trait;
use sha2::Digest;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const COPY_BUF_SIZE: usize = 64 * 1024;

/// ChunkStore over a local directory. Chunks live as `chunks/<name>`
/// files; slash-separated names map to subdirectories, so the parts of
/// an upload sit together under `chunks/<upload-id>/`.
pub struct FsChunkStore {
    base_path: PathBuf,
}

impl FsChunkStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn chunk_path(&self, name: &str) -> Result<PathBuf> {
        let mut path = self.base_path.join("chunks");
        for component in normalize_chunk_name(name)?.split('/') {
            path.push(component);
        }
        Ok(path)
    }
}

#[async_trait]
impl ChunkStore for FsChunkStore {
    async fn put_chunk(
        &self,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        hash: &str,
    ) -> Result<()> {
        let chunk_path = self.chunk_path(name)?;
        if let Some(parent) = chunk_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Bytes land in a temp file first; the rename below is what makes
        // the chunk visible, so a failed write never leaves one behind.
        let tmp_path = chunk_path.with_extension(format!("{}.tmp", ulid::Ulid::new()));
        match write_verified(&tmp_path, reader, size, hash).await {
            Ok(()) => {
                fs::rename(&tmp_path, &chunk_path).await?;
                tracing::debug!("stored chunk: name={} size={}", name, size);
                Ok(())
            }
            Err(error) => {
                if let Err(remove_error) = fs::remove_file(&tmp_path).await {
                    if remove_error.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            "failed to remove partial chunk {}: {}",
                            tmp_path.display(),
                            remove_error
                        );
                    }
                }
                Err(error)
            }
        }
    }

    async fn open_chunk(&self, name: &str) -> Result<(ChunkReader, u64)> {
        let chunk_path = self.chunk_path(name)?;
        let file = match fs::File::open(&chunk_path).await {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(SiltError::BlobNotFound {
                    path: name.to_string(),
                });
            }
            Err(error) => return Err(error.into()),
        };
        let length = file.metadata().await?.len();
        Ok((Box::new(file), length))
    }

    async fn remove_chunk(&self, name: &str) -> Result<()> {
        let chunk_path = self.chunk_path(name)?;
        match fs::remove_file(&chunk_path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(SiltError::BlobNotFound {
                    path: name.to_string(),
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn chunk_exists(&self, name: &str) -> Result<bool> {
        let chunk_path = self.chunk_path(name)?;
        Ok(fs::try_exists(&chunk_path).await?)
    }
}

async fn write_verified(
    path: &Path,
    reader: &mut (dyn AsyncRead + Send + Unpin),
    size: u64,
    hash: &str,
) -> Result<()> {
    let mut file = fs::File::create(path).await?;
    let mut hasher = new_hash();
    let mut written = 0u64;
    let mut buf = vec![0u8; COPY_BUF_SIZE];

    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        file.write_all(&buf[..read]).await?;
        written += read as u64;
    }

    file.sync_all().await?;
    drop(file);

    if written != size || hex_digest(hasher) != hash {
        return Err(SiltError::HashMismatch);
    }
    Ok(())
}

fn normalize_chunk_name(input: &str) -> Result<String> {
    let trimmed = input.trim_matches('/');
    if trimmed.is_empty() {
        return Err(SiltError::InvalidRequest(
            "chunk name cannot be empty".to_string(),
        ));
    }

    let mut parts = Vec::new();
    for part in trimmed.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            return Err(SiltError::InvalidRequest(format!(
                "invalid chunk name component: {}",
                part
            )));
        }
        parts.push(part);
    }

    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_of;

    #[tokio::test]
    async fn test_chunk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChunkStore::new(dir.path().to_path_buf()).unwrap();

        let body = b"hello-world";
        let sha = hash_of(body);

        store
            .put_chunk("a/b/c", &mut &body[..], body.len() as u64, &sha)
            .await
            .unwrap();
        assert!(store.chunk_exists("a/b/c").await.unwrap());

        let (mut reader, length) = store.open_chunk("a/b/c").await.unwrap();
        assert_eq!(length, body.len() as u64);
        let mut read = Vec::new();
        reader.read_to_end(&mut read).await.unwrap();
        assert_eq!(read, body);

        store.remove_chunk("a/b/c").await.unwrap();
        assert!(!store.chunk_exists("a/b/c").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_hash_mismatch_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChunkStore::new(dir.path().to_path_buf()).unwrap();

        let body = b"some data";
        let err = store
            .put_chunk("x", &mut &body[..], body.len() as u64, &hash_of(b"other"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "hash mismatch");
        assert!(!store.chunk_exists("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_length_mismatch_is_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChunkStore::new(dir.path().to_path_buf()).unwrap();

        let body = b"short";
        let err = store
            .put_chunk("x", &mut &body[..], 100, &hash_of(body))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "hash mismatch");
        assert!(!store.chunk_exists("x").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChunkStore::new(dir.path().to_path_buf()).unwrap();

        let first = b"some data";
        store
            .put_chunk("x", &mut &first[..], first.len() as u64, &hash_of(first))
            .await
            .unwrap();

        let second = b"some different data";
        store
            .put_chunk("x", &mut &second[..], second.len() as u64, &hash_of(second))
            .await
            .unwrap();

        let (mut reader, length) = store.open_chunk("x").await.unwrap();
        assert_eq!(length, second.len() as u64);
        let mut read = Vec::new();
        reader.read_to_end(&mut read).await.unwrap();
        assert_eq!(read, second);
    }

    #[tokio::test]
    async fn test_open_missing_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChunkStore::new(dir.path().to_path_buf()).unwrap();

        let err = match store.open_chunk("nope").await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), r#"resource at path "nope" not found"#);
    }

    #[test]
    fn test_normalize_chunk_name() {
        assert_eq!(normalize_chunk_name("a/b").unwrap(), "a/b");
        assert_eq!(normalize_chunk_name("/a/b/").unwrap(), "a/b");
        assert!(normalize_chunk_name("").is_err());
        assert!(normalize_chunk_name("a//b").is_err());
        assert!(normalize_chunk_name("a/../b").is_err());
    }
}
