//! Common test utilities.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::net::TcpListener;

use azurite_core::engine::BlobCreateOptions;
use azurite_core::models::{BlobRef, PublicAccessLevel};
use azurite_core::{
    BlobEngine, BlobServer, Config, MemoryExtentStore, MemoryMetadataStore, OperationContext,
    DEFAULT_ACCOUNT,
};

pub const API_VERSION: &str = "2021-10-04";

/// Test server wrapper.
pub struct TestServer {
    pub base_url: String,
    pub account: String,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Creates and starts a test server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = Config {
            host: "127.0.0.1".to_string(),
            blob_port: port,
            gc_interval: None,
            ..Config::default()
        };
        let server = BlobServer::new(config);

        tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            account: DEFAULT_ACCOUNT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Returns the URL of the account.
    pub fn account_url(&self) -> String {
        format!("{}/{}", self.base_url, self.account)
    }

    /// Returns the URL for a container.
    pub fn container_url(&self, container: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.account, container)
    }

    /// Returns the URL for a blob.
    pub fn blob_url(&self, container: &str, blob: &str) -> String {
        format!("{}/{}/{}/{}", self.base_url, self.account, container, blob)
    }

    /// Starts a request carrying the version header.
    pub fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("x-ms-version", API_VERSION)
    }

    pub async fn create_container(&self, name: &str) {
        let url = format!("{}?restype=container", self.container_url(name));
        let response = self
            .request(reqwest::Method::PUT, &url)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201, "create container {}", name);
    }

    pub async fn put_block_blob(&self, container: &str, blob: &str, content: &str) -> reqwest::Response {
        self.request(reqwest::Method::PUT, &self.blob_url(container, blob))
            .header("x-ms-blob-type", "BlockBlob")
            .body(content.to_string())
            .send()
            .await
            .unwrap()
    }
}

/// Returns the header value as a string.
pub fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// An engine over fresh in-memory stores.
pub fn memory_engine() -> BlobEngine {
    BlobEngine::new(
        Arc::new(MemoryMetadataStore::new()),
        Arc::new(MemoryExtentStore::new()),
    )
}

/// A fixed instant, so lease timing is deterministic.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// An operation context `seconds` after [`t0`].
pub fn at(seconds: i64) -> OperationContext {
    OperationContext::at(t0() + chrono::Duration::seconds(seconds))
}

pub fn blob_ref(container: &str, name: &str) -> BlobRef {
    BlobRef::new(DEFAULT_ACCOUNT, container, name)
}

/// A base64 block id.
pub fn block_id(name: &str) -> String {
    BASE64.encode(name)
}

pub async fn create_container(engine: &BlobEngine, name: &str) {
    engine
        .create_container(
            &at(0),
            DEFAULT_ACCOUNT,
            name,
            Default::default(),
            PublicAccessLevel::None,
        )
        .await
        .unwrap();
}

pub async fn put_blob(engine: &BlobEngine, ctx: &OperationContext, blob: &BlobRef, content: &str) {
    engine
        .put_blob(
            ctx,
            blob,
            Bytes::from(content.to_string()),
            None,
            BlobCreateOptions::default(),
        )
        .await
        .unwrap();
}

/// Collects a blob's committed content.
pub async fn read_all(engine: &BlobEngine, ctx: &OperationContext, blob: &BlobRef) -> Vec<u8> {
    use futures_util::TryStreamExt;

    let download = engine
        .download_blob(ctx, blob, "", None, &Default::default())
        .await
        .unwrap();
    let chunks: Vec<Bytes> = download.body.try_collect().await.unwrap();
    chunks.concat()
}
