pub mod bucket;
pub mod builder;
pub mod handle;
pub mod properties;
pub mod shard;
pub mod source;

pub use builder::{BuildOptions, IndexBuilder};
pub use handle::IndexHandle;
