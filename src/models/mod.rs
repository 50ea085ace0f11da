//! Data models for containers, blobs and blocks.

mod blob;
mod block;
mod container;

pub use blob::*;
pub use block::*;
pub use container::*;

/// Generates a fresh change token, already double-quoted for the wire.
pub fn new_etag() -> String {
    format!("\"0x{}\"", uuid::Uuid::new_v4().simple().to_string().to_uppercase())
}
