//! Upload Session Registry
//!
//! Owns every upload session for the lifetime of the server:
//! - Per-session async lock, held for the duration of a chunk write
//! - Short-lived index lock for the id and filename maps
//! - One ACTIVE session per target filename (the filename claim)
//! - Periodic idle expiry on a background task

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Mutex as AsyncMutex, MutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::chunk_store::ChunkStore;
use super::types::{SessionState, StatusResponse, UploadError, UploadSession};

// ============================================================================
// Session Entry
// ============================================================================

/// Shared handle to one registered session
pub type SessionHandle = Arc<SessionEntry>;

/// A registered session plus the values fixed at creation
#[derive(Debug)]
pub struct SessionEntry {
    pub id: Uuid,
    pub filename: String,
    declared_size: Option<u64>,
    declared_sha256: Option<String>,
    session: AsyncMutex<UploadSession>,
}

impl SessionEntry {
    /// Acquire the session's exclusive lock
    pub async fn lock(&self) -> MutexGuard<'_, UploadSession> {
        self.session.lock().await
    }

    fn try_lock(&self) -> Option<MutexGuard<'_, UploadSession>> {
        self.session.try_lock().ok()
    }
}

/// Counts from one expiry sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// ACTIVE sessions moved to EXPIRED
    pub expired: usize,
    /// Terminal sessions dropped from the registry
    pub purged: usize,
}

// ============================================================================
// Session Registry
// ============================================================================

/// Registry of upload sessions
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    index: Mutex<SessionIndex>,
    chunk_store: ChunkStore,

    /// ACTIVE sessions idle longer than this are expired
    idle_timeout: chrono::Duration,

    /// Terminal sessions are kept this long for status and repeat finalize
    retention: chrono::Duration,
}

#[derive(Default)]
struct SessionIndex {
    sessions: HashMap<Uuid, SessionHandle>,
    by_filename: HashMap<String, Uuid>,
}

impl SessionIndex {
    fn insert(
        &mut self,
        filename: String,
        total_size: Option<u64>,
        sha256: Option<String>,
    ) -> SessionHandle {
        let session = UploadSession::new(filename.clone(), total_size, sha256.clone());
        let entry = Arc::new(SessionEntry {
            id: session.id,
            filename: filename.clone(),
            declared_size: total_size,
            declared_sha256: session.sha256.clone(),
            session: AsyncMutex::new(session),
        });

        self.by_filename.insert(filename, entry.id);
        self.sessions.insert(entry.id, entry.clone());
        entry
    }

    fn claimant(&self, filename: &str) -> Option<SessionHandle> {
        self.by_filename
            .get(filename)
            .and_then(|id| self.sessions.get(id))
            .cloned()
    }
}

impl SessionRegistry {
    /// Create a registry backed by `chunk_store`
    pub fn new(chunk_store: ChunkStore, idle_timeout: Duration, retention: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                index: Mutex::new(SessionIndex::default()),
                chunk_store,
                idle_timeout: to_chrono(idle_timeout),
                retention: to_chrono(retention),
            }),
        }
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Create a new session for `filename`.
    ///
    /// Fails with `ConflictingUpload` when another session holds the claim.
    pub fn create(
        &self,
        filename: String,
        total_size: Option<u64>,
        sha256: Option<String>,
    ) -> Result<SessionHandle, UploadError> {
        let mut index = self.inner.index.lock();

        if index.claimant(&filename).is_some() {
            return Err(UploadError::ConflictingUpload(filename));
        }

        let entry = index.insert(filename, total_size, sha256);

        tracing::info!(
            session_id = %entry.id,
            filename = %entry.filename,
            total_size = ?total_size,
            "Created upload session"
        );

        Ok(entry)
    }

    /// Resume the session claiming `filename`, or create a new one.
    ///
    /// Returns the handle and whether it was resumed. The claim check and the
    /// insert happen under one index lock, so concurrent starts for a name
    /// can never produce two ACTIVE sessions.
    pub fn start_or_resume(
        &self,
        filename: String,
        total_size: Option<u64>,
        sha256: Option<String>,
        resume_token: Option<Uuid>,
    ) -> Result<(SessionHandle, bool), UploadError> {
        let mut index = self.inner.index.lock();

        if let Some(existing) = index.claimant(&filename) {
            let token_matches = resume_token.map(|t| t == existing.id).unwrap_or(true);
            let sha_matches = match (&sha256, &existing.declared_sha256) {
                (Some(requested), Some(declared)) => requested.eq_ignore_ascii_case(declared),
                _ => true,
            };

            if !token_matches || existing.declared_size != total_size || !sha_matches {
                return Err(UploadError::ConflictingUpload(filename));
            }

            tracing::info!(
                session_id = %existing.id,
                filename = %existing.filename,
                "Resuming upload session"
            );
            return Ok((existing, true));
        }

        let entry = index.insert(filename, total_size, sha256);

        tracing::info!(
            session_id = %entry.id,
            filename = %entry.filename,
            total_size = ?total_size,
            "Created upload session"
        );

        Ok((entry, false))
    }

    /// Get a session by ID
    pub fn get(&self, id: Uuid) -> Result<SessionHandle, UploadError> {
        self.inner
            .index
            .lock()
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| UploadError::NotFound(format!("session {}", id)))
    }

    /// Get a session by string ID
    pub fn get_by_str(&self, id: &str) -> Result<SessionHandle, UploadError> {
        let uuid = Uuid::parse_str(id.trim())
            .map_err(|_| UploadError::NotFound(format!("session {}", id)))?;
        self.get(uuid)
    }

    /// Record an already flushed chunk against a session
    pub async fn record_chunk(
        &self,
        id: Uuid,
        offset: u64,
        length: u64,
        digest: String,
    ) -> Result<StatusResponse, UploadError> {
        let entry = self.get(id)?;
        let mut session = entry.lock().await;
        session.record_chunk(offset, length, digest)?;
        Ok(session.status())
    }

    /// Abort a session at the client's request
    pub async fn abort(&self, id: Uuid) -> Result<StatusResponse, UploadError> {
        let entry = self.get(id)?;
        let mut session = entry.lock().await;
        self.close(&entry, &mut session, SessionState::Aborted).await?;
        Ok(session.status())
    }

    /// Expire a session regardless of its idle time
    pub async fn expire(&self, id: Uuid) -> Result<StatusResponse, UploadError> {
        let entry = self.get(id)?;
        let mut session = entry.lock().await;
        self.close(&entry, &mut session, SessionState::Expired).await?;
        Ok(session.status())
    }

    /// Move a session that has not been committed to a closed state,
    /// releasing its claim and its staging data.
    ///
    /// COMPLETE sessions whose data never reached the catalog may still be
    /// aborted; committed ones are closed for good.
    pub(crate) async fn close(
        &self,
        entry: &SessionEntry,
        session: &mut UploadSession,
        state: SessionState,
    ) -> Result<(), UploadError> {
        let closable = match session.state {
            SessionState::Active => true,
            SessionState::Complete => session.finalized.is_none(),
            SessionState::Aborted | SessionState::Expired => false,
        };
        if !closable {
            return Err(UploadError::SessionClosed {
                session_id: session.id.to_string(),
                state: session.state,
            });
        }

        session.state = state;
        session.touch();
        self.release_claim(entry);

        let removed = self.inner.chunk_store.discard(entry.id).await?;

        tracing::info!(
            session_id = %entry.id,
            filename = %entry.filename,
            state = %state,
            staging_removed = removed,
            "Upload session closed"
        );

        Ok(())
    }

    /// Drop `entry`'s claim on its filename, if it still holds it
    pub(crate) fn release_claim(&self, entry: &SessionEntry) {
        let mut index = self.inner.index.lock();
        if index.by_filename.get(&entry.filename) == Some(&entry.id) {
            index.by_filename.remove(&entry.filename);
        }
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    /// Whether some session currently claims `filename`
    pub fn is_claimed(&self, filename: &str) -> bool {
        self.inner.index.lock().claimant(filename).is_some()
    }

    /// Get session count
    pub fn session_count(&self) -> usize {
        self.inner.index.lock().sessions.len()
    }

    /// Number of sessions holding a filename claim
    pub fn active_session_count(&self) -> usize {
        self.inner.index.lock().by_filename.len()
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Expire idle ACTIVE sessions and purge stale terminal ones.
    ///
    /// Sessions whose lock is held are busy, hence not idle, and are skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let entries: Vec<SessionHandle> =
            self.inner.index.lock().sessions.values().cloned().collect();
        let mut report = SweepReport::default();

        for entry in entries {
            let Some(mut session) = entry.try_lock() else {
                continue;
            };

            if !session.state.is_terminal() {
                if session.is_idle(now, self.inner.idle_timeout) {
                    match self.close(&entry, &mut session, SessionState::Expired).await {
                        Ok(()) => report.expired += 1,
                        Err(e) => tracing::warn!(
                            session_id = %entry.id,
                            error = %e,
                            "Failed to expire idle session"
                        ),
                    }
                }
                continue;
            }

            if session.is_idle(now, self.inner.retention) {
                if session.finalized.is_none() {
                    if let Err(e) = self.inner.chunk_store.discard(entry.id).await {
                        tracing::warn!(
                            session_id = %entry.id,
                            error = %e,
                            "Failed to discard staging for purged session"
                        );
                    }
                }
                self.release_claim(&entry);
                self.inner.index.lock().sessions.remove(&entry.id);
                report.purged += 1;
            }
        }

        if report.expired > 0 || report.purged > 0 {
            tracing::info!(
                expired = report.expired,
                purged = report.purged,
                "Swept upload sessions"
            );
        }

        report
    }

    /// Start the periodic expiry sweep
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let registry = self.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.sweep(Utc::now()).await;
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Session sweeper stopping");
                        break;
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }

    /// Drop every session and its staging data. Used on server shutdown.
    pub async fn teardown(&self) -> usize {
        let entries: Vec<SessionHandle> = {
            let mut index = self.inner.index.lock();
            index.by_filename.clear();
            index.sessions.drain().map(|(_, entry)| entry).collect()
        };

        let count = entries.len();
        for entry in entries {
            let session = entry.lock().await;
            if session.finalized.is_none() {
                if let Err(e) = self.inner.chunk_store.discard(entry.id).await {
                    tracing::warn!(session_id = %entry.id, error = %e, "Failed to discard staging");
                }
            }
        }

        tracing::info!(count = count, "Upload session registry torn down");
        count
    }
}

/// Handle to the background sweep task
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "Session sweeper task failed");
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

// ============================================================================
// Tests
// ============================================================================
