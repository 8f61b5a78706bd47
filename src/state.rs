//! Application state management

use std::sync::Arc;

use crate::catalog::FileCatalog;
use crate::config::Config;
use crate::upload::{ChunkStore, SessionRegistry, TransferService, TransferSettings, UploadError};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    registry: SessionRegistry,
    catalog: FileCatalog,
    transfer: TransferService,
}

impl AppState {
    /// Create the application state
    ///
    /// Creates the upload and staging directories and purges staging left
    /// over from a previous run, since sessions are not persisted.
    pub async fn new(config: Config) -> Result<Self, UploadError> {
        let chunk_store = ChunkStore::open(config.storage.upload_dir.clone()).await?;
        chunk_store.purge_staging().await?;

        let registry = SessionRegistry::new(
            chunk_store.clone(),
            config.upload.idle_timeout(),
            config.upload.retention(),
        );

        let settings = TransferSettings {
            chunk_size: config.upload.chunk_size,
            max_file_size: config.upload.max_file_size,
            ordering: config.upload.ordering,
            auto_finalize: config.upload.auto_finalize,
        };
        let transfer = TransferService::new(registry.clone(), chunk_store, settings);
        let catalog = FileCatalog::new(config.storage.upload_dir.clone());

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                registry,
                catalog,
                transfer,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the session registry
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Get the file catalog
    pub fn catalog(&self) -> &FileCatalog {
        &self.inner.catalog
    }

    /// Get the transfer service
    pub fn transfer(&self) -> &TransferService {
        &self.inner.transfer
    }

    /// Drop all sessions and their staging data
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down application state...");
        let dropped = self.inner.registry.teardown().await;
        tracing::debug!(sessions = dropped, "Sessions released");
    }
}
