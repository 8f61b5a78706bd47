//! Upload types for the resumable transfer protocol

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ranges::{ByteRange, RangeSet};

// ============================================================================
// Constants
// ============================================================================

/// Default chunk size advertised to clients: 5MB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default largest accepted chunk body: 64MB
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Smallest chunk size a server may advertise
pub const MIN_CHUNK_SIZE: u64 = 1024;

/// Name of the staging directory inside the upload directory
pub const STAGING_DIR_NAME: &str = ".staging";

// ============================================================================
// Start Types
// ============================================================================

/// Request to start (or resume) a chunked upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    /// Client-supplied file name, sanitized before use
    pub filename: String,

    /// Declared total size in bytes; `None` when unknown up front
    #[serde(default)]
    pub total_size: Option<u64>,

    /// Session id from an earlier start, when the client wants to resume it
    #[serde(default)]
    pub resume_token: Option<String>,

    /// Optional hex SHA-256 of the complete file, verified on finalize
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Response to a start request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    pub filename: String,
    pub received_ranges: Vec<ByteRange>,
    pub received_bytes: u64,
    pub total_size: Option<u64>,

    /// Chunk size the server prefers
    pub chunk_size: u64,

    /// True when an existing session was picked up instead of created
    pub resumed: bool,
}

// ============================================================================
// Chunk Upload Types
// ============================================================================

/// Response after uploading a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub session_id: String,
    pub received_bytes: u64,
    pub total_size: Option<u64>,

    /// Whether every declared byte has been received
    pub complete: bool,

    /// Completion percentage (0-100)
    pub progress: f64,
}

// ============================================================================
// Status / Finalize Types
// ============================================================================

/// Snapshot of a session, as reported by the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_id: String,
    pub filename: String,
    pub received_ranges: Vec<ByteRange>,
    pub received_bytes: u64,
    pub total_size: Option<u64>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Request to finalize an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub session_id: String,
}

/// A file committed to the upload directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedFile {
    pub filename: String,
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

// ============================================================================
// Session Types
// ============================================================================

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Receiving chunks
    Active,
    /// Every byte received
    Complete,
    /// Idle past the timeout
    Expired,
    /// Cancelled by the client
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Active)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionState::Active => "ACTIVE",
            SessionState::Complete => "COMPLETE",
            SessionState::Expired => "EXPIRED",
            SessionState::Aborted => "ABORTED",
        };
        f.write_str(label)
    }
}

/// How chunk offsets relate to already-received data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkOrdering {
    /// Each chunk must start at the contiguous-received boundary
    Sequential,
    /// Any non-overlapping chunk is written at its offset
    #[default]
    Any,
}

/// An accepted chunk, kept to recognise exact resends
#[derive(Debug, Clone, PartialEq, Eq)]
struct AcceptedChunk {
    length: u64,
    digest: String,
}

/// What to do with an incoming chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDisposition {
    /// New bytes, write and record them
    Accept,
    /// Exact resend of an accepted chunk, nothing to do
    Duplicate,
}

/// Upload session state
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: Uuid,

    /// Sanitized target file name
    pub filename: String,

    /// Declared total size; `None` until sealed on finalize
    pub total_size: Option<u64>,

    /// Expected hex SHA-256 of the complete file
    pub sha256: Option<String>,

    pub received: RangeSet,
    chunks: BTreeMap<u64, AcceptedChunk>,

    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub state: SessionState,

    /// Set once the staged data has been moved into the catalog
    pub finalized: Option<FinalizedFile>,
}

impl UploadSession {
    /// Create a new, empty session
    pub fn new(filename: String, total_size: Option<u64>, sha256: Option<String>) -> Self {
        let now = Utc::now();
        let mut session = Self {
            id: Uuid::new_v4(),
            filename,
            total_size,
            sha256: sha256.map(|h| h.to_ascii_lowercase()),
            received: RangeSet::new(),
            chunks: BTreeMap::new(),
            created_at: now,
            last_activity: now,
            state: SessionState::Active,
            finalized: None,
        };
        // A declared size of zero has nothing left to receive
        session.refresh_completion();
        session
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Error unless the session can still receive data
    pub fn ensure_active(&self) -> Result<(), UploadError> {
        if self.state != SessionState::Active {
            return Err(UploadError::SessionClosed {
                session_id: self.id.to_string(),
                state: self.state,
            });
        }
        Ok(())
    }

    pub fn received_bytes(&self) -> u64 {
        self.received.total_len()
    }

    /// Check if every declared byte is present
    pub fn is_complete(&self) -> bool {
        self.total_size
            .map(|total| self.received.covers(total))
            .unwrap_or(false)
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        match self.total_size {
            Some(0) => 100.0,
            Some(total) => (self.received_bytes() as f64 / total as f64) * 100.0,
            None => 0.0,
        }
    }

    /// Whether the session has been idle longer than `timeout`
    pub fn is_idle(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now - self.last_activity > timeout
    }

    /// Decide whether a chunk is new, an exact resend, or a conflict.
    ///
    /// Never mutates the session.
    pub fn classify_chunk(
        &self,
        offset: u64,
        length: u64,
        digest: &str,
        ordering: ChunkOrdering,
    ) -> Result<ChunkDisposition, UploadError> {
        self.ensure_active()?;

        if length == 0 {
            return Err(UploadError::BadRequest("empty chunk".to_string()));
        }

        let range = ByteRange::from_offset(offset, length).ok_or(UploadError::ChunkOutOfBounds {
            offset,
            length,
            total_size: self.total_size,
        })?;

        if let Some(total) = self.total_size {
            if range.end > total {
                return Err(UploadError::ChunkOutOfBounds {
                    offset,
                    length,
                    total_size: Some(total),
                });
            }
        }

        if let Some(accepted) = self.chunks.get(&offset) {
            if accepted.length == length {
                if accepted.digest == digest {
                    return Ok(ChunkDisposition::Duplicate);
                }
                return Err(UploadError::ChunkConflict { offset, length });
            }
        }

        if self.received.find_overlap(range).is_some() {
            return Err(UploadError::ChunkConflict { offset, length });
        }

        if ordering == ChunkOrdering::Sequential {
            let expected = self.received.contiguous_end();
            if offset != expected {
                return Err(UploadError::OutOfOrder { expected, offset });
            }
        }

        Ok(ChunkDisposition::Accept)
    }

    /// Record a flushed chunk and move to COMPLETE once every byte is present
    pub fn record_chunk(&mut self, offset: u64, length: u64, digest: String) -> Result<(), UploadError> {
        self.ensure_active()?;

        let range = ByteRange::from_offset(offset, length).ok_or(UploadError::ChunkOutOfBounds {
            offset,
            length,
            total_size: self.total_size,
        })?;

        self.received
            .insert(range)
            .map_err(|_| UploadError::ChunkConflict { offset, length })?;
        self.chunks.insert(offset, AcceptedChunk { length, digest });
        self.touch();
        self.refresh_completion();

        Ok(())
    }

    /// Fix an unknown total size to the bytes received so far.
    ///
    /// Only valid when the received data is one contiguous run from byte 0.
    pub fn seal_size(&mut self) -> Result<u64, UploadError> {
        if let Some(total) = self.total_size {
            return Ok(total);
        }

        let received = self.received_bytes();
        if self.received.contiguous_end() != received {
            return Err(UploadError::IncompleteTransfer {
                received,
                expected: None,
            });
        }

        self.total_size = Some(received);
        self.refresh_completion();
        Ok(received)
    }

    /// Undo [`seal_size`](Self::seal_size) after a failed commit, so the
    /// client can keep sending chunks or retry the finalize.
    pub fn unseal(&mut self) {
        if self.state == SessionState::Complete && self.finalized.is_none() {
            self.total_size = None;
            self.state = SessionState::Active;
        }
    }

    /// Status snapshot for the wire
    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            session_id: self.id.to_string(),
            filename: self.filename.clone(),
            received_ranges: self.received.ranges().to_vec(),
            received_bytes: self.received_bytes(),
            total_size: self.total_size,
            state: self.state,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }

    fn refresh_completion(&mut self) {
        if self.state == SessionState::Active && self.is_complete() {
            self.state = SessionState::Complete;
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("Another upload is active for {0}")]
    ConflictingUpload(String),

    #[error("Chunk [{offset}, +{length}) conflicts with received data")]
    ChunkConflict { offset: u64, length: u64 },

    #[error("Chunk at offset {offset} is out of order (expected {expected})")]
    OutOfOrder { expected: u64, offset: u64 },

    #[error("Chunk [{offset}, +{length}) outside declared size {total_size:?}")]
    ChunkOutOfBounds {
        offset: u64,
        length: u64,
        total_size: Option<u64>,
    },

    #[error("Session {session_id} is closed ({state})")]
    SessionClosed {
        session_id: String,
        state: SessionState,
    },

    #[error("Incomplete transfer: received {received} of {expected:?} bytes")]
    IncompleteTransfer { received: u64, expected: Option<u64> },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Range not satisfiable for {0} bytes")]
    RangeNotSatisfiable(u64),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] std::io::Error),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::InvalidFilename(_) => StatusCode::BAD_REQUEST,
            Self::ConflictingUpload(_) => StatusCode::CONFLICT,
            Self::ChunkConflict { .. } => StatusCode::CONFLICT,
            Self::OutOfOrder { .. } => StatusCode::CONFLICT,
            Self::ChunkOutOfBounds { .. } => StatusCode::BAD_REQUEST,
            Self::SessionClosed { .. } => StatusCode::CONFLICT,
            Self::IncompleteTransfer { .. } => StatusCode::CONFLICT,
            Self::ChecksumMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFilename(_) => "INVALID_FILENAME",
            Self::ConflictingUpload(_) => "CONFLICTING_UPLOAD",
            Self::ChunkConflict { .. } => "CHUNK_CONFLICT",
            Self::OutOfOrder { .. } => "OUT_OF_ORDER",
            Self::ChunkOutOfBounds { .. } => "CHUNK_OUT_OF_BOUNDS",
            Self::SessionClosed { .. } => "SESSION_CLOSED",
            Self::IncompleteTransfer { .. } => "INCOMPLETE_TRANSFER",
            Self::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::RangeNotSatisfiable(_) => "RANGE_NOT_SATISFIABLE",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::StorageFailure(_) => "STORAGE_FAILURE",
        }
    }
}
