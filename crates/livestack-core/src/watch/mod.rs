pub mod registry;
pub mod watcher;

use std::path::Path;

use crate::error::Result;

pub use registry::WatchRegistry;
pub use watcher::{ChangeReceiver, DirectoryWatcher};

/// Registration side of a directory watcher.
pub trait PathWatcher: Send {
    /// Start observing `dir`. Returns true on the first registration.
    fn add_path(&mut self, dir: &Path) -> Result<bool>;

    /// Stop observing `dir`. Returns true when the last registration went.
    fn remove_path(&mut self, dir: &Path) -> Result<bool>;
}
