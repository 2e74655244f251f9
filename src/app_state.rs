//! Application State Management
//!
//! This module provides the application state that contains all services
//! and their dependencies, following the dependency injection pattern.

use std::sync::Arc;

use log::info;

use crate::catalog::{mock_store::MockMediaCatalog, sqlite_store::SQLiteMediaCatalog, MediaCatalog};
use crate::config::{AppConfig, CatalogBackend, StorageBackend};
use crate::error::MediaResult;
use crate::service::chunk_receiver::ChunkReceiver;
use crate::service::merge_coordinator::MergeCoordinator;
use crate::service::range_server::RangeServer;
use crate::service::session_lock::SessionLocks;
use crate::storage::{local_store::LocalMediaStore, mock_store::MockMediaStore, MediaStorage};

/// Application state containing all services and their dependencies
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn MediaStorage>,
    pub catalog: Arc<dyn MediaCatalog>,
    pub locks: SessionLocks,
    pub chunk_receiver: Arc<ChunkReceiver>,
    pub merge_coordinator: Arc<MergeCoordinator>,
    pub range_server: Arc<RangeServer>,
    pub config: AppConfig,
}

impl AppState {
    /// Create application state from configuration
    pub fn from_config(config: AppConfig) -> MediaResult<Self> {
        info!("Initializing application state with configuration");

        let storage: Arc<dyn MediaStorage> = match config.storage.backend {
            StorageBackend::Local => {
                info!(
                    "Using local storage backend with base_path: {}, temp_path: {}",
                    config.storage.base_path, config.storage.temp_path
                );
                Arc::new(LocalMediaStore::new(&config.storage)?)
            }
            StorageBackend::Mock => {
                info!("Using mock storage backend");
                Arc::new(MockMediaStore::new())
            }
        };

        let catalog: Arc<dyn MediaCatalog> = match config.catalog.backend {
            CatalogBackend::SQLite => {
                info!(
                    "Using SQLite catalog backend with db_path: {}, wal_mode: {}",
                    config.catalog.db_path, config.catalog.wal_mode
                );
                Arc::new(SQLiteMediaCatalog::open(&config.catalog)?)
            }
            CatalogBackend::Mock => {
                info!("Using mock catalog backend");
                Arc::new(MockMediaCatalog::new())
            }
        };

        let state = Self::with_backends(config, storage, catalog);
        info!("Application state initialized successfully");
        Ok(state)
    }

    /// Wire the services around already constructed backends
    pub fn with_backends(config: AppConfig, storage: Arc<dyn MediaStorage>, catalog: Arc<dyn MediaCatalog>) -> Self {
        let locks = SessionLocks::new();
        let chunk_receiver = Arc::new(ChunkReceiver::new(Arc::clone(&storage), &config.upload));
        let merge_coordinator = Arc::new(MergeCoordinator::new(
            Arc::clone(&storage),
            Arc::clone(&catalog),
            locks.clone(),
            config.storage.default_folder.clone(),
        ));
        let range_server = Arc::new(RangeServer::new(Arc::clone(&storage)));

        Self {
            storage,
            catalog,
            locks,
            chunk_receiver,
            merge_coordinator,
            range_server,
            config,
        }
    }

    /// Create application state for testing with mock backends
    pub fn new_for_testing() -> Self {
        Self::with_backends(
            AppConfig::default(),
            Arc::new(MockMediaStore::new()),
            Arc::new(MockMediaCatalog::new()),
        )
    }
}
