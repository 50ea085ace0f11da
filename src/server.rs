//! HTTP server for the blob emulator.

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::engine::BlobEngine;
use crate::error::StorageResult;
use crate::router::{create_router, AppState};
use crate::storage::{
    ExtentStore, FsExtentStore, GarbageCollector, MemoryExtentStore, MemoryMetadataStore,
    MetadataStore,
};

/// Blob storage server.
pub struct BlobServer {
    config: Arc<Config>,
    engine: Arc<BlobEngine>,
}

impl BlobServer {
    /// Creates a new blob server with in-memory storage.
    pub fn new(config: Config) -> Self {
        let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
        let extents: Arc<dyn ExtentStore> = Arc::new(MemoryExtentStore::new());
        Self::with_storage(config, metadata, extents)
    }

    /// Creates a blob server whose storage follows the configuration: the
    /// workspace files when a location is set, memory otherwise.
    pub async fn open(config: Config) -> StorageResult<Self> {
        let (metadata_path, extent_path) = match (config.metadata_path(), config.extent_path()) {
            (Some(metadata_path), Some(extent_path)) => (metadata_path, extent_path),
            _ => return Ok(Self::new(config)),
        };

        let metadata: Arc<dyn MetadataStore> =
            Arc::new(MemoryMetadataStore::open(&metadata_path).await?);
        let extents: Arc<dyn ExtentStore> = Arc::new(FsExtentStore::new(extent_path).await?);
        info!("Using workspace metadata at {}", metadata_path.display());
        Ok(Self::with_storage(config, metadata, extents))
    }

    /// Creates a new blob server with custom storage.
    pub fn with_storage(
        config: Config,
        metadata: Arc<dyn MetadataStore>,
        extents: Arc<dyn ExtentStore>,
    ) -> Self {
        let engine = BlobEngine::new(metadata, extents).with_loose(config.loose);
        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
        }
    }

    /// Returns the engine serving requests.
    pub fn engine(&self) -> &Arc<BlobEngine> {
        &self.engine
    }

    /// Builds the router with middleware.
    pub fn router(&self) -> Router {
        let state = AppState {
            config: self.config.clone(),
            engine: self.engine.clone(),
        };
        create_router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    /// Runs the server on the configured address.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.blob_bind_address().parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener.
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(interval) = self.config.gc_interval {
            let gc = GarbageCollector::new(
                self.engine.metadata().clone(),
                self.engine.extents().clone(),
                interval,
            );
            tokio::spawn(async move { gc.run().await });
        }

        let app = self.router();
        info!(
            "Blob service is starting at http://{}",
            listener.local_addr()?
        );
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Returns the bind address.
    pub fn bind_address(&self) -> String {
        self.config.blob_bind_address()
    }

    /// Returns the base URL for the blob service.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.bind_address())
    }
}

/// Builder for creating a blob server.
pub struct BlobServerBuilder {
    config: Config,
    metadata: Option<Arc<dyn MetadataStore>>,
    extents: Option<Arc<dyn ExtentStore>>,
}

impl BlobServerBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            metadata: None,
            extents: None,
        }
    }

    /// Sets the configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the blob service port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.blob_port = port;
        self
    }

    /// Enables loose mode.
    pub fn loose(mut self, loose: bool) -> Self {
        self.config.loose = loose;
        self
    }

    /// Sets the metadata store.
    pub fn metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Sets the extent store.
    pub fn extents(mut self, extents: Arc<dyn ExtentStore>) -> Self {
        self.extents = Some(extents);
        self
    }

    /// Builds the server.
    pub fn build(self) -> BlobServer {
        let metadata = self
            .metadata
            .unwrap_or_else(|| Arc::new(MemoryMetadataStore::new()));
        let extents = self
            .extents
            .unwrap_or_else(|| Arc::new(MemoryExtentStore::new()));

        BlobServer::with_storage(self.config, metadata, extents)
    }
}

impl Default for BlobServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_applies_settings() {
        let server = BlobServerBuilder::new()
            .host("0.0.0.0")
            .port(12000)
            .loose(true)
            .build();

        assert_eq!(server.bind_address(), "0.0.0.0:12000");
        assert_eq!(server.base_url(), "http://0.0.0.0:12000");
        assert!(server.config.loose);
    }

    #[tokio::test]
    async fn test_open_in_memory_without_location() {
        let config = Config {
            location: None,
            ..Config::default()
        };
        let server = BlobServer::open(config).await.unwrap();
        assert_eq!(server.engine().extents().total_size().await, 0);
    }

    #[tokio::test]
    async fn test_open_creates_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            location: Some(dir.path().to_path_buf()),
            in_memory: false,
            ..Config::default()
        };
        let extent_path = config.extent_path().unwrap();

        BlobServer::open(config).await.unwrap();
        assert!(extent_path.is_dir());
    }
}
