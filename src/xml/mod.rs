//! XML serialization and deserialization for Azure Blob Storage API.

pub mod deserialize;
pub mod serialize;

pub use deserialize::*;
pub use serialize::*;
