//! Transfer Protocol Handler
//!
//! The resumable-upload state machine behind the HTTP routes. Every
//! operation that touches a session holds that session's lock for its whole
//! duration, so writes to one staging file are serialized while unrelated
//! sessions proceed in parallel.

use std::sync::Arc;

use uuid::Uuid;

use super::chunk_store::{compute_hash, ChunkStore};
use super::sanitize::sanitize_filename;
use super::session::{SessionEntry, SessionRegistry};
use super::types::{
    ChunkDisposition, ChunkOrdering, ChunkResponse, FinalizedFile, SessionState, StartRequest,
    StartResponse, StatusResponse, UploadError, UploadSession, DEFAULT_CHUNK_SIZE,
    STAGING_DIR_NAME,
};

/// Upload behaviour knobs, taken from configuration
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Chunk size advertised to clients
    pub chunk_size: u64,

    /// Largest declared file size (0 = unlimited)
    pub max_file_size: u64,

    pub ordering: ChunkOrdering,

    /// Commit a session as soon as its last byte arrives
    pub auto_finalize: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: 0,
            ordering: ChunkOrdering::Any,
            auto_finalize: true,
        }
    }
}

/// Resumable transfer service
#[derive(Clone)]
pub struct TransferService {
    inner: Arc<TransferInner>,
}

struct TransferInner {
    registry: SessionRegistry,
    chunk_store: ChunkStore,
    settings: TransferSettings,
}

impl TransferService {
    pub fn new(registry: SessionRegistry, chunk_store: ChunkStore, settings: TransferSettings) -> Self {
        Self {
            inner: Arc::new(TransferInner {
                registry,
                chunk_store,
                settings,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.inner.settings
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start a new upload, or resume the ACTIVE one for the same file
    pub async fn start(&self, request: StartRequest) -> Result<StartResponse, UploadError> {
        let filename = self.target_filename(&request.filename)?;

        if let Some(size) = request.total_size {
            self.check_size(size)?;
        }

        let resume_token = request
            .resume_token
            .as_deref()
            .map(|token| {
                Uuid::parse_str(token.trim())
                    .map_err(|_| UploadError::BadRequest(format!("invalid resume token: {}", token)))
            })
            .transpose()?;

        let sha256 = request.sha256.as_deref().map(parse_sha256).transpose()?;

        let (entry, resumed) =
            self.inner
                .registry
                .start_or_resume(filename, request.total_size, sha256, resume_token)?;

        let mut session = entry.lock().await;
        session.touch();

        if session.state == SessionState::Complete
            && session.finalized.is_none()
            && self.inner.settings.auto_finalize
        {
            // Zero-byte uploads are complete on arrival
            self.commit(&entry, &mut session).await?;
        }

        Ok(StartResponse {
            session_id: session.id.to_string(),
            filename: session.filename.clone(),
            received_ranges: session.received.ranges().to_vec(),
            received_bytes: session.received_bytes(),
            total_size: session.total_size,
            chunk_size: self.inner.settings.chunk_size,
            resumed,
        })
    }

    // ========================================================================
    // Chunks
    // ========================================================================

    /// Accept the bytes `[offset, offset + data.len())` for a session
    pub async fn upload_chunk(
        &self,
        session_id: &str,
        offset: u64,
        data: &[u8],
    ) -> Result<ChunkResponse, UploadError> {
        let entry = self.inner.registry.get_by_str(session_id)?;
        let mut session = entry.lock().await;

        let disposition = self.write_chunk(&mut session, offset, data).await?;

        tracing::debug!(
            session_id = %session.id,
            offset = offset,
            length = data.len(),
            duplicate = disposition == ChunkDisposition::Duplicate,
            received = session.received_bytes(),
            progress = format!("{:.1}%", session.progress()),
            "Chunk uploaded"
        );

        if session.state == SessionState::Complete
            && session.finalized.is_none()
            && self.inner.settings.auto_finalize
        {
            self.commit(&entry, &mut session).await?;
        }

        Ok(ChunkResponse {
            session_id: session.id.to_string(),
            received_bytes: session.received_bytes(),
            total_size: session.total_size,
            complete: session.is_complete(),
            progress: session.progress(),
        })
    }

    /// Validate, write and record one chunk. Caller holds the session lock.
    async fn write_chunk(
        &self,
        session: &mut UploadSession,
        offset: u64,
        data: &[u8],
    ) -> Result<ChunkDisposition, UploadError> {
        let length = data.len() as u64;
        let digest = compute_hash(data);

        let disposition =
            session.classify_chunk(offset, length, &digest, self.inner.settings.ordering)?;

        match disposition {
            ChunkDisposition::Duplicate => session.touch(),
            ChunkDisposition::Accept => {
                let mut staging = self.inner.chunk_store.open_staging(session.id).await?;
                self.inner
                    .chunk_store
                    .write_chunk(&mut staging, &session.received, offset, data)
                    .await?;
                session.record_chunk(offset, length, digest)?;
            }
        }

        Ok(disposition)
    }

    // ========================================================================
    // Status / Finalize / Abort
    // ========================================================================

    /// Received ranges and state of a session
    pub async fn status(&self, session_id: &str) -> Result<StatusResponse, UploadError> {
        let entry = self.inner.registry.get_by_str(session_id)?;
        let session = entry.lock().await;
        Ok(session.status())
    }

    /// Commit a session's staged data into the catalog.
    ///
    /// Repeating the call on a committed session returns the same result.
    pub async fn finalize(&self, session_id: &str) -> Result<FinalizedFile, UploadError> {
        let entry = self.inner.registry.get_by_str(session_id)?;
        let mut session = entry.lock().await;

        if let Some(done) = &session.finalized {
            return Ok(done.clone());
        }

        let sealed = session.state == SessionState::Active && session.total_size.is_none();
        match session.state {
            SessionState::Active => {
                if sealed {
                    session.seal_size()?;
                }
                if !session.is_complete() {
                    return Err(UploadError::IncompleteTransfer {
                        received: session.received_bytes(),
                        expected: session.total_size,
                    });
                }
            }
            SessionState::Complete => {}
            SessionState::Aborted | SessionState::Expired => {
                return Err(UploadError::SessionClosed {
                    session_id: session.id.to_string(),
                    state: session.state,
                });
            }
        }

        let result = self.commit(&entry, &mut session).await;
        if sealed && result.is_err() {
            // Size was only fixed for this attempt; let the client carry on
            session.unseal();
            tracing::debug!(session_id = %session.id, "Reopened session after failed commit");
        }
        result
    }

    /// Abort a session and drop its staged data
    pub async fn abort(&self, session_id: &str) -> Result<StatusResponse, UploadError> {
        let entry = self.inner.registry.get_by_str(session_id)?;
        let mut session = entry.lock().await;
        self.inner
            .registry
            .close(&entry, &mut session, SessionState::Aborted)
            .await?;
        Ok(session.status())
    }

    /// Move a COMPLETE session's staging file into place. Caller holds the lock.
    async fn commit(
        &self,
        entry: &SessionEntry,
        session: &mut UploadSession,
    ) -> Result<FinalizedFile, UploadError> {
        let size = session.total_size.unwrap_or_default();
        let result = self
            .inner
            .chunk_store
            .finalize(
                session.id,
                &session.filename,
                session.received_bytes(),
                size,
                session.sha256.as_deref(),
            )
            .await;

        match result {
            Ok(file) => {
                session.finalized = Some(file.clone());
                session.touch();
                self.inner.registry.release_claim(entry);

                tracing::info!(
                    session_id = %session.id,
                    filename = %file.filename,
                    size = file.size,
                    "Upload finalized"
                );

                Ok(file)
            }
            Err(err @ UploadError::ChecksumMismatch { .. }) => {
                // Every byte is recorded, so a retry cannot repair the data
                tracing::warn!(session_id = %session.id, error = %err, "Discarding corrupt upload");
                self.inner
                    .registry
                    .close(entry, session, SessionState::Aborted)
                    .await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    // ========================================================================
    // Whole-file Upload
    // ========================================================================

    /// Store a whole file in one request.
    ///
    /// Runs as a single-chunk session so it honours the one-writer-per-name
    /// rule like any resumable upload.
    pub async fn put_file(&self, raw_name: &str, data: &[u8]) -> Result<FinalizedFile, UploadError> {
        let filename = self.target_filename(raw_name)?;
        let size = data.len() as u64;
        self.check_size(size)?;

        let entry = self.inner.registry.create(filename, Some(size), None)?;
        let mut session = entry.lock().await;

        if !data.is_empty() {
            if let Err(err) = self.write_chunk(&mut session, 0, data).await {
                self.inner
                    .registry
                    .close(&entry, &mut session, SessionState::Aborted)
                    .await?;
                return Err(err);
            }
        }

        match self.commit(&entry, &mut session).await {
            Ok(file) => Ok(file),
            Err(err) => {
                // No client can resume a whole-file PUT, so free the name
                if session.state == SessionState::Complete && session.finalized.is_none() {
                    self.inner
                        .registry
                        .close(&entry, &mut session, SessionState::Aborted)
                        .await?;
                }
                Err(err)
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn target_filename(&self, raw: &str) -> Result<String, UploadError> {
        let filename = sanitize_filename(raw)?;
        if filename == STAGING_DIR_NAME {
            return Err(UploadError::InvalidFilename(raw.to_string()));
        }
        Ok(filename)
    }

    fn check_size(&self, size: u64) -> Result<(), UploadError> {
        let max = self.inner.settings.max_file_size;
        if max > 0 && size > max {
            return Err(UploadError::FileTooLarge { size, max });
        }
        Ok(())
    }
}

/// Validate a client-declared hex SHA-256
fn parse_sha256(raw: &str) -> Result<String, UploadError> {
    let hash = raw.trim().to_ascii_lowercase();
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(UploadError::BadRequest(format!("invalid sha256: {}", raw)));
    }
    Ok(hash)
}

// ============================================================================
// Tests
// ============================================================================
