pub mod policy;
pub mod updater;

pub use policy::{should_check, FixedDraw, RandomSource, UpdatePolicy};
pub use updater::{LocalFileUpdater, NoUpdater, Updater};
