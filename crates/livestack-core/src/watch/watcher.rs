use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::Result;

use super::PathWatcher;

/// Filesystem watcher over a set of directories, backed by `notify`.
///
/// Each directory is watched non-recursively and reference counted, so
/// several stacks can share one registration.
pub struct DirectoryWatcher {
    watcher: RecommendedWatcher,
    registrations: HashMap<PathBuf, usize>,
}

/// Receiving side of a [`DirectoryWatcher`].
pub struct ChangeReceiver {
    rx: Receiver<notify::Result<Event>>,
}

impl DirectoryWatcher {
    pub fn new() -> Result<(Self, ChangeReceiver)> {
        let (tx, rx) = mpsc::channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        Ok((
            Self {
                watcher,
                registrations: HashMap::new(),
            },
            ChangeReceiver { rx },
        ))
    }

    pub fn is_watching(&self, dir: &Path) -> bool {
        self.registrations.contains_key(dir)
    }
}

impl PathWatcher for DirectoryWatcher {
    fn add_path(&mut self, dir: &Path) -> Result<bool> {
        let count = self.registrations.entry(dir.to_path_buf()).or_insert(0);
        *count += 1;
        if *count > 1 {
            return Ok(false);
        }
        if let Err(e) = self.watcher.watch(dir, RecursiveMode::NonRecursive) {
            self.registrations.remove(dir);
            return Err(e.into());
        }
        info!(path = %dir.display(), "Watching directory");
        Ok(true)
    }

    fn remove_path(&mut self, dir: &Path) -> Result<bool> {
        let Some(count) = self.registrations.get_mut(dir) else {
            return Ok(false);
        };
        *count -= 1;
        if *count > 0 {
            return Ok(false);
        }
        self.registrations.remove(dir);
        self.watcher.unwatch(dir)?;
        info!(path = %dir.display(), "Stopped watching directory");
        Ok(true)
    }
}

impl ChangeReceiver {
    /// Wait up to `timeout` for filesystem activity, then drain everything
    /// queued. Returns each affected directory once.
    pub fn wait(&self, timeout: Duration) -> Vec<PathBuf> {
        let mut dirs = BTreeSet::new();
        match self.rx.recv_timeout(timeout) {
            Ok(res) => collect(res, &mut dirs),
            Err(RecvTimeoutError::Timeout) => return Vec::new(),
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Watcher channel closed");
                return Vec::new();
            }
        }
        while let Ok(res) = self.rx.try_recv() {
            collect(res, &mut dirs);
        }
        dirs.into_iter().collect()
    }
}

fn collect(res: notify::Result<Event>, dirs: &mut BTreeSet<PathBuf>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Watcher error");
            return;
        }
    };
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }
    for path in &event.paths {
        if let Some(dir) = changed_directory(path) {
            debug!(event = ?event.kind, path = %path.display(), "fs change");
            dirs.insert(dir);
        }
    }
}

/// Directory a change notification belongs to: the path itself when it is
/// a watched directory, its parent otherwise.
fn changed_directory(path: &Path) -> Option<PathBuf> {
    if path.is_dir() {
        Some(path.to_path_buf())
    } else {
        path.parent().map(Path::to_path_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_directory_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.fits");
        assert_eq!(changed_directory(&file), Some(dir.path().to_path_buf()));
        assert_eq!(changed_directory(dir.path()), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn test_refcounted_registration() {
        let dir = tempfile::tempdir().unwrap();
        let (mut watcher, _rx) = DirectoryWatcher::new().unwrap();
        assert!(watcher.add_path(dir.path()).unwrap());
        assert!(!watcher.add_path(dir.path()).unwrap());
        assert!(!watcher.remove_path(dir.path()).unwrap());
        assert!(watcher.is_watching(dir.path()));
        assert!(watcher.remove_path(dir.path()).unwrap());
        assert!(!watcher.is_watching(dir.path()));
    }
}
