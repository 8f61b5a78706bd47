//! Resumable Chunked Upload Module
//!
//! Large files arrive as independently retried chunks:
//! - Byte-range bookkeeping per session, so a client can resume after a crash
//! - Sparse staging files flushed per chunk, committed by atomic rename
//! - One ACTIVE session per target filename
//! - Background expiry of idle sessions
//!
//! Protocol Flow:
//! 1. Client starts (or resumes) a session and learns which ranges are present
//! 2. Client sends the missing chunks, in any order
//! 3. Server commits the file once every byte has arrived

pub mod chunk_store;
pub mod protocol;
pub mod ranges;
pub mod sanitize;
pub mod session;
pub mod types;

pub use chunk_store::{compute_hash, hash_file, ChunkStore, StagingFile};
pub use protocol::{TransferService, TransferSettings};
pub use ranges::{ByteRange, RangeSet};
pub use sanitize::sanitize_filename;
pub use session::{SessionHandle, SessionRegistry, SweepReport, SweeperHandle};
pub use types::*;
