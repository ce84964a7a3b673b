#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod core;
pub mod engine;
pub mod index;
pub mod query;
pub mod stats;
pub mod storage;
pub mod update;

pub use engine::{Browscap, LookupOutcome};
