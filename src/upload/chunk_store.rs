//! Chunk Store
//!
//! On-disk staging for partial uploads. Each session owns one sparse staging
//! file under `<upload_dir>/.staging`; chunks are written at their offset and
//! a complete file is committed with a single rename into the upload
//! directory. Staging shares the upload directory's volume, so the rename is
//! atomic and readers never see a half-written destination.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use super::ranges::{ByteRange, RangeSet};
use super::types::{FinalizedFile, UploadError, STAGING_DIR_NAME};

const STAGING_EXTENSION: &str = "part";
const HASH_BUFFER_SIZE: usize = 64 * 1024;

// ============================================================================
// Staging Handle
// ============================================================================

/// Open staging file for one session, closed on drop
#[derive(Debug)]
pub struct StagingFile {
    session_id: Uuid,
    path: PathBuf,
    file: File,
}

impl StagingFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ============================================================================
// Chunk Store
// ============================================================================

/// Local filesystem chunk staging
#[derive(Clone)]
pub struct ChunkStore {
    inner: Arc<ChunkStoreInner>,
}

struct ChunkStoreInner {
    upload_dir: PathBuf,
    staging_dir: PathBuf,
}

impl ChunkStore {
    /// Open a store rooted at `upload_dir`, creating directories as needed
    pub async fn open(upload_dir: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let upload_dir = upload_dir.into();
        let staging_dir = upload_dir.join(STAGING_DIR_NAME);

        tokio::fs::create_dir_all(&staging_dir).await?;

        Ok(Self {
            inner: Arc::new(ChunkStoreInner {
                upload_dir,
                staging_dir,
            }),
        })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.inner.staging_dir
    }

    fn staging_path(&self, session_id: Uuid) -> PathBuf {
        self.inner
            .staging_dir
            .join(format!("{}.{}", session_id, STAGING_EXTENSION))
    }

    /// Open (creating if absent) the staging file for a session
    pub async fn open_staging(&self, session_id: Uuid) -> Result<StagingFile, UploadError> {
        let path = self.staging_path(session_id);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;

        Ok(StagingFile {
            session_id,
            path,
            file,
        })
    }

    /// Write a chunk at `offset` and flush it to disk.
    ///
    /// `received` is the session's recorded ranges; the write is refused if
    /// it would overlap any of them.
    pub async fn write_chunk(
        &self,
        staging: &mut StagingFile,
        received: &RangeSet,
        offset: u64,
        data: &[u8],
    ) -> Result<(), UploadError> {
        let length = data.len() as u64;
        let range = ByteRange::from_offset(offset, length).ok_or(UploadError::ChunkOutOfBounds {
            offset,
            length,
            total_size: None,
        })?;

        if received.find_overlap(range).is_some() {
            return Err(UploadError::ChunkConflict { offset, length });
        }

        staging.file.seek(SeekFrom::Start(offset)).await?;
        staging.file.write_all(data).await?;
        staging.file.flush().await?;
        staging.file.sync_data().await?;

        tracing::trace!(
            session_id = %staging.session_id,
            offset = offset,
            length = length,
            "Chunk flushed to staging"
        );

        Ok(())
    }

    /// Commit a fully received staging file into the upload directory
    pub async fn finalize(
        &self,
        session_id: Uuid,
        filename: &str,
        received_bytes: u64,
        declared_size: u64,
        expected_sha256: Option<&str>,
    ) -> Result<FinalizedFile, UploadError> {
        if received_bytes != declared_size {
            return Err(UploadError::IncompleteTransfer {
                received: received_bytes,
                expected: Some(declared_size),
            });
        }

        // Zero-byte uploads never wrote a chunk, so the file may not exist yet
        let staging = self.open_staging(session_id).await?;
        let staged_len = staging.file.metadata().await?.len();
        if staged_len > declared_size {
            // Tail left by a write that failed part way; never recorded
            tracing::warn!(
                session_id = %session_id,
                staged = staged_len,
                declared = declared_size,
                "Trimming unrecorded staging tail"
            );
            staging.file.set_len(declared_size).await?;
        } else if staged_len < declared_size {
            return Err(UploadError::IncompleteTransfer {
                received: staged_len,
                expected: Some(declared_size),
            });
        }
        staging.file.sync_all().await?;
        let staging_path = staging.path.clone();
        drop(staging);

        let sha256 = match expected_sha256 {
            Some(expected) => {
                let actual = hash_file(&staging_path).await?;
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(UploadError::ChecksumMismatch {
                        expected: expected.to_string(),
                        actual,
                    });
                }
                Some(actual)
            }
            None => None,
        };

        let destination = self.inner.upload_dir.join(filename);
        tokio::fs::rename(&staging_path, &destination).await?;

        tracing::info!(
            session_id = %session_id,
            filename = %filename,
            size = declared_size,
            "Staged upload committed"
        );

        Ok(FinalizedFile {
            filename: filename.to_string(),
            size: declared_size,
            sha256,
        })
    }

    /// Remove a session's staging data. Returns whether anything was removed.
    pub async fn discard(&self, session_id: Uuid) -> Result<bool, UploadError> {
        match tokio::fs::remove_file(self.staging_path(session_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every staging file. Sessions live in memory only, so staging
    /// left behind by a previous process can never be resumed.
    pub async fn purge_staging(&self) -> Result<usize, UploadError> {
        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&self.inner.staging_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_staging = path
                .extension()
                .map(|ext| ext == STAGING_EXTENSION)
                .unwrap_or(false);

            if is_staging && entry.file_type().await?.is_file() {
                tokio::fs::remove_file(&path).await?;
                count += 1;
            }
        }

        if count > 0 {
            tracing::info!(count = count, "Purged stale staging files");
        }

        Ok(count)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Stream a file through SHA-256
pub async fn hash_file(path: &Path) -> Result<String, UploadError> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

// ============================================================================
// Tests
// ============================================================================
