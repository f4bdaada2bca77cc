//! A contiguous range of shards hosted by one runtime unit.

pub mod event;
pub mod group;
pub mod readiness;
pub mod spec;

pub use event::GroupEvent;
pub use group::{Group, GroupStats};
pub use readiness::ReadyTracker;
pub use spec::GroupSpec;
