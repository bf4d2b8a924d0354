pub mod comparator;
pub mod engine;

pub use comparator::is_newer;
pub use engine::{SyncEngine, SyncReport};
