pub mod cache;
pub mod manifest;

pub use cache::CacheStore;
pub use manifest::{Manifest, ShardPart, MANIFEST_NAME};
