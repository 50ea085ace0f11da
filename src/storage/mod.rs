//! Storage layer: metadata records and content extents.

mod extent;
mod gc;
mod metadata;

pub use extent::*;
pub use gc::*;
pub use metadata::*;
