//! azurite-core: the metadata and concurrency engine of a local blob storage
//! emulator.
//!
//! The crate models containers, blobs, snapshots and staged blocks, and
//! implements the rules that govern them: the lease state machine, block
//! staging and commit, conditional request evaluation, and deterministic
//! listing pagination. [`BlobEngine`] applies those rules under per-entity
//! locks on top of a pluggable [`MetadataStore`] and [`ExtentStore`]; a thin
//! axum adapter exposes it over the blob REST protocol.
//!
//! # Example
//!
//! ```no_run
//! use azurite_core::{BlobServer, Config};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = BlobServer::open(Config::default()).await.unwrap();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod blocks;
pub mod conditions;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod lease;
pub mod listing;
pub mod locks;
pub mod models;
pub mod router;
pub mod server;
pub mod storage;
pub mod tags;
pub mod xml;

// Re-exports for convenience
pub use config::{Args, Config, DEFAULT_ACCOUNT, DEFAULT_BLOB_PORT};
pub use engine::{AccessConditions, BlobEngine, OperationContext};
pub use error::{ErrorCode, StorageError, StorageResult};
pub use lease::{Lease, LeaseAction, LeaseState};
pub use server::{BlobServer, BlobServerBuilder};
pub use storage::{
    ExtentStore, FsExtentStore, GarbageCollector, MemoryExtentStore, MemoryMetadataStore,
    MetadataStore,
};
