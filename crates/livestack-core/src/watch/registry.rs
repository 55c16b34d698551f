use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::stack::StackId;

/// Which stacks watch which directory.
#[derive(Clone, Debug, Default)]
pub struct WatchRegistry {
    dirs: BTreeMap<PathBuf, Vec<StackId>>,
}

impl WatchRegistry {
    /// Returns true when `dir` had no stack before.
    pub fn register(&mut self, dir: &Path, id: StackId) -> bool {
        let stacks = self.dirs.entry(dir.to_path_buf()).or_default();
        let first = stacks.is_empty();
        if !stacks.contains(&id) {
            stacks.push(id);
        }
        first
    }

    /// Returns true when `dir` has no stack left.
    pub fn unregister(&mut self, dir: &Path, id: StackId) -> bool {
        let Some(stacks) = self.dirs.get_mut(dir) else {
            return false;
        };
        stacks.retain(|s| *s != id);
        if stacks.is_empty() {
            self.dirs.remove(dir);
            true
        } else {
            false
        }
    }

    /// Stacks registered for `dir`, in registration order.
    pub fn stacks_for(&self, dir: &Path) -> &[StackId] {
        self.dirs.get(dir).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.dirs.contains_key(dir)
    }

    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        self.dirs.keys().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_directory() {
        let mut reg = WatchRegistry::default();
        let dir = Path::new("/frames");
        assert!(reg.register(dir, StackId(1)));
        assert!(!reg.register(dir, StackId(2)));
        assert!(!reg.register(dir, StackId(2)));
        assert_eq!(reg.stacks_for(dir), [StackId(1), StackId(2)]);

        assert!(!reg.unregister(dir, StackId(1)));
        assert!(reg.unregister(dir, StackId(2)));
        assert!(!reg.contains(dir));
        assert!(reg.stacks_for(dir).is_empty());
    }
}
