pub mod store;
pub mod version_log;

pub use store::Store;
pub use version_log::{LogEntry, VersionLog};
