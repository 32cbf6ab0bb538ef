//! Data layer module
//!
//! Handles all data persistence:
//! - Access-code table
//! - Application audit log
//! - JSON file or Redis backend, chosen once at startup

mod json_store;
mod models;
mod redis_store;
mod store;

use std::sync::Arc;

pub use json_store::JsonFileStore;
pub use models::*;
pub use redis_store::RedisStore;
pub use store::{
    ApplicationQuery, ApplicationStore, CodeMutation, CodeQuery, CodeStats, CodeStore, Mutated,
    Page,
};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{AppError, Result};

/// Shared handles to both collections
#[derive(Clone)]
pub struct Stores {
    pub codes: Arc<dyn CodeStore>,
    pub applications: Arc<dyn ApplicationStore>,
}

impl Stores {
    /// Both collections served by one backend value
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: CodeStore + ApplicationStore + 'static,
    {
        Self {
            codes: backend.clone(),
            applications: backend,
        }
    }

    /// Open the backend named in configuration
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackend::Json => {
                let store = JsonFileStore::open(&config.data_dir).await?;
                Ok(Self::from_backend(Arc::new(store)))
            }
            StorageBackend::Redis => {
                let url = config.redis_url.as_deref().ok_or_else(|| {
                    AppError::Config("storage.redis_url is required for redis".to_string())
                })?;
                let store = RedisStore::connect(url, config.redis_max_connections).await?;
                Ok(Self::from_backend(Arc::new(store)))
            }
        }
    }
}
