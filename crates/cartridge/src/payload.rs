use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::CartridgeError;
use crate::manifest::MANIFEST_FILE;

/// In-memory package contents keyed by `/`-separated relative path.
///
/// Keys are the logical (decoded) entry names of the package. The tree is
/// owned by one conversion at a time and written back out once at the end.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PayloadTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl PayloadTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every regular file below `root`.
    pub fn read_dir(root: &Path) -> Result<Self, CartridgeError> {
        let mut tree = PayloadTree::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).map_err(|_| {
                CartridgeError::Structural(format!(
                    "{} is outside {}",
                    entry.path().display(),
                    root.display()
                ))
            })?;
            let key = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = fs::read(entry.path())?;
            tree.files.insert(key, bytes);
        }
        Ok(tree)
    }

    /// Writes every file below `root`, creating directories as needed.
    pub fn write_dir(&self, root: &Path) -> Result<(), CartridgeError> {
        fs::create_dir_all(root)?;
        for (key, bytes) in &self.files {
            let safe = normalize_relative(key)
                .filter(|safe| safe == key)
                .ok_or_else(|| {
                    CartridgeError::Structural(format!("payload path {key} escapes the package root"))
                })?;
            let target = root.join(&safe);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, bytes)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn get_text(&self, path: &str) -> Option<String> {
        self.get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.files.insert(path.into(), bytes.into())
    }

    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.files.remove(path)
    }

    /// Copies `from` to `to`, leaving `from` in place. Returns false when
    /// `from` does not exist.
    pub fn copy(&mut self, from: &str, to: &str) -> bool {
        match self.files.get(from).cloned() {
            Some(bytes) => {
                self.files.insert(to.to_string(), bytes);
                true
            }
            None => false,
        }
    }

    /// True when `path` names a directory: it ends in `/`, or other entries
    /// live below it while no file carries the name itself.
    pub fn is_directory(&self, path: &str) -> bool {
        if path.ends_with('/') {
            return true;
        }
        if path.is_empty() || self.contains(path) {
            return false;
        }
        let prefix = format!("{path}/");
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }

    /// Finds the manifest: `imsmanifest.xml` at the root, otherwise the
    /// shallowest nested one (ties broken by path order).
    pub fn locate_manifest(&self) -> Option<String> {
        if self.contains(MANIFEST_FILE) {
            return Some(MANIFEST_FILE.to_string());
        }
        self.files
            .keys()
            .filter(|key| {
                key.rsplit('/')
                    .next()
                    .is_some_and(|name| name.eq_ignore_ascii_case(MANIFEST_FILE))
            })
            .min_by_key(|key| (key.matches('/').count(), (*key).clone()))
            .cloned()
    }

    /// Splits off everything below `prefix/` as a standalone tree, leaving the
    /// rest in `self`.
    pub fn split_off_prefix(&mut self, prefix: &str) -> PayloadTree {
        if prefix.is_empty() {
            return std::mem::take(self);
        }
        let marker = format!("{prefix}/");
        let (inside, outside): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|(key, _)| key.starts_with(&marker));
        self.files = outside;
        PayloadTree {
            files: inside
                .into_iter()
                .map(|(key, bytes)| (key[marker.len()..].to_string(), bytes))
                .collect(),
        }
    }

    /// Inverse of [`PayloadTree::split_off_prefix`].
    pub fn absorb_under_prefix(&mut self, prefix: &str, inner: PayloadTree) {
        for (key, bytes) in inner.files {
            let key = if prefix.is_empty() {
                key
            } else {
                format!("{prefix}/{key}")
            };
            self.files.insert(key, bytes);
        }
    }
}

/// Lexically normalizes a relative path: drops `.` and empty segments and
/// resolves `..`. Returns `None` when the path climbs above the root.
pub fn normalize_relative(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}
