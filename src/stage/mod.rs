//! Object stage: intermediate persistence between pipeline steps.
//!
//! [`ObjectStage`] wraps an [`ObjectBackend`] that is connected lazily on
//! first use and dropped by [`ObjectStage::release`]. The stage is an
//! explicit capability: the caller builds one, hands it to the pipeline, and
//! decides whether it is shared between runs.
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`s3::S3Backend`] | S3 / MinIO bucket over the REST API (SigV4) |
//! | [`memory::InMemoryBackend`] | process-local map for tests and dry runs |

pub mod memory;
pub mod s3;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{error, info};

use crate::config::S3Config;
use crate::error::StorageError;

/// Storage operations the pipeline needs from a bucket.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Human-readable location, e.g. `s3://weather`.
    fn location(&self) -> String;

    /// Upload `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str)
        -> Result<(), StorageError>;

    /// Download the whole object. Missing keys are [`StorageError::NotFound`].
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

type Connect = Box<dyn Fn() -> Result<Arc<dyn ObjectBackend>, StorageError> + Send + Sync>;

pub struct ObjectStage {
    connect: Connect,
    backend: Mutex<Option<Arc<dyn ObjectBackend>>>,
}

impl ObjectStage {
    /// Create a stage that calls `connect` whenever it needs a client and has none.
    pub fn new<F>(connect: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ObjectBackend>, StorageError> + Send + Sync + 'static,
    {
        Self {
            connect: Box::new(connect),
            backend: Mutex::new(None),
        }
    }

    /// Stage backed by an S3 bucket. Credentials are resolved on initialization.
    pub fn s3(config: S3Config) -> Self {
        Self::new(move || {
            let backend: Arc<dyn ObjectBackend> = Arc::new(s3::S3Backend::from_config(&config)?);
            Ok(backend)
        })
    }

    /// Stage that always reconnects to the same backend instance.
    pub fn with_backend(backend: Arc<dyn ObjectBackend>) -> Self {
        Self::new(move || Ok(backend.clone()))
    }

    /// Establish the client. A second call while initialized is a no-op.
    pub fn initialize(&self) -> Result<(), StorageError> {
        self.client().map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.slot().is_some()
    }

    /// Drop the client. Later calls reconnect transparently.
    pub fn release(&self) {
        self.slot().take();
    }

    pub async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client()?.put(key, body, content_type).await
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.client()?.get(key).await
    }

    /// Best-effort delete: failures are logged and reported as `false`.
    pub async fn delete(&self, key: &str) -> bool {
        let result = match self.client() {
            Ok(client) => client.delete(key).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                info!("Object {} deleted", key);
                true
            }
            Err(e) => {
                error!("Error deleting object {}: {}", key, e);
                false
            }
        }
    }

    fn client(&self) -> Result<Arc<dyn ObjectBackend>, StorageError> {
        let mut slot = self.slot();
        if let Some(backend) = slot.as_ref() {
            return Ok(backend.clone());
        }
        let backend = (self.connect)()?;
        info!("Object stage connected to {}", backend.location());
        *slot = Some(backend.clone());
        Ok(backend)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn ObjectBackend>>> {
        self.backend.lock().unwrap_or_else(|e| e.into_inner())
    }
}
