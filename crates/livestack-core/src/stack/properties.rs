use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{LIST_SEPARATOR, PROPERTIES_SUFFIX};
use crate::error::{LiveStackError, Result};

/// Flat key/value properties persisted next to a running-average image.
/// Values are stored as strings so the sidecar stays readable by hand.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackProperties(BTreeMap<String, String>);

impl StackProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn set_path(&mut self, key: &str, path: Option<&Path>) {
        if let Some(p) = path {
            self.set(key, p.display());
        }
    }

    pub fn set_list<S: AsRef<str>>(&mut self, key: &str, items: impl IntoIterator<Item = S>) {
        let joined = items
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(&LIST_SEPARATOR.to_string());
        self.set(key, joined);
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &'static str) -> Result<&str> {
        self.get(key).ok_or(LiveStackError::MissingProperty(key))
    }

    /// Parsed value of `key`, or `default` when absent.
    pub fn parse_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.trim().parse().map_err(|_| LiveStackError::InvalidProperty {
                key,
                value: v.to_string(),
            }),
        }
    }

    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    }

    /// Separator-joined list; absent and empty values both give `[]`.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| split_list(v, LIST_SEPARATOR))
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string(self)?)?;
        Ok(())
    }
}

/// Non-empty, trimmed items of a joined list.
pub fn split_list(value: &str, separator: char) -> Vec<String> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// `<dir>/<stem>.livestack.toml` for a running image at `<dir>/<stem>.<ext>`.
pub fn sidecar_path(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    image_path.with_file_name(format!("{stem}{PROPERTIES_SUFFIX}"))
}
