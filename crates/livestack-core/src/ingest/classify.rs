use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::consts::{CALIBRATED_PREFIX, DEBAYERED_PREFIX};
use crate::error::Result;
use crate::frame::filter_of;
use crate::services::ImageServices;
use crate::stack::StackId;

/// Names that are never ingested: dotfiles and our own calibrated and
/// debayered outputs.
pub fn is_excluded_name(name: &str) -> bool {
    name.starts_with('.') || name.contains(CALIBRATED_PREFIX) || name.contains(DEBAYERED_PREFIX)
}

/// Lower-cased extension of a file name.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Regular files of `dir`, oldest first (name breaks ties).
pub fn list_directory(dir: &Path) -> Result<Vec<String>> {
    let mut entries: Vec<(SystemTime, String)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((modified, name));
    }
    entries.sort();
    Ok(entries.into_iter().map(|(_, name)| name).collect())
}

/// What the classifier needs to know about a stack.
#[derive(Clone, Debug)]
pub struct StackFilter<'a> {
    pub id: StackId,
    pub filter: &'a str,
    pub ignore_filter: bool,
    pub extension: &'a str,
}

impl StackFilter<'_> {
    fn accepts_extension(&self, name: &str) -> bool {
        extension_of(name) == self.extension.to_ascii_lowercase()
    }
}

/// Files of `listing` that could belong to any of `stacks`: not excluded
/// by name, not already known, with a stack's extension.
pub fn candidates<'a>(
    listing: &'a [String],
    known: &HashSet<&str>,
    stacks: &[StackFilter<'_>],
) -> Vec<&'a str> {
    listing
        .iter()
        .map(String::as_str)
        .filter(|name| !is_excluded_name(name) && !known.contains(name))
        .filter(|name| stacks.iter().any(|s| s.accepts_extension(name)))
        .collect()
}

/// New files per stack, in listing order. `lookup_filter` is only
/// consulted for candidates that some filtering stack could take.
pub fn classify<F>(
    listing: &[String],
    known: &HashSet<&str>,
    stacks: &[StackFilter<'_>],
    mut lookup_filter: F,
) -> BTreeMap<StackId, Vec<String>>
where
    F: FnMut(&str) -> String,
{
    let mut out: BTreeMap<StackId, Vec<String>> = BTreeMap::new();

    for name in candidates(listing, known, stacks) {
        let mut filter: Option<String> = None;
        for stack in stacks.iter().filter(|s| s.accepts_extension(name)) {
            let matches = stack.ignore_filter || {
                let f = filter.get_or_insert_with(|| lookup_filter(name));
                f.as_str() == stack.filter
            };
            if matches {
                out.entry(stack.id).or_default().push(name.to_string());
            }
        }
    }
    out
}

/// Filter keyword per file, kept for one watcher cycle.
#[derive(Debug, Default)]
pub struct FilterCache {
    entries: HashMap<PathBuf, String>,
}

impl FilterCache {
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filter of `path`; unreadable headers count as no filter.
    pub fn filter(&mut self, path: &Path, services: &dyn ImageServices) -> String {
        if let Some(f) = self.entries.get(path) {
            return f.clone();
        }
        let filter = match services.read_keywords(path) {
            Ok(keywords) => filter_of(&keywords),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No filter keyword");
                String::new()
            }
        };
        self.entries.insert(path.to_path_buf(), filter.clone());
        filter
    }
}
