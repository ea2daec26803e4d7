//! Where archived recordings live

use cryo_core::{Result, ResultExt};
use cryo_utils::is_readable_file;
use std::path::{Component, Path, PathBuf};

/// Read access to archived recordings, grouped by source
pub trait RecordingStore: Send + Sync {
    /// Names of the recordings archived under `source`, sorted
    fn list_names(&self, source: &str) -> Result<Vec<String>>;

    /// Path of an archived recording, if it exists
    fn resolve(&self, source: &str, name: &str) -> Option<PathBuf>;

    fn is_readable(&self, source: &str, name: &str) -> bool {
        self.resolve(source, name).is_some()
    }
}

/// Archive laid out as `<root>/<source>/<recording>`
#[derive(Debug, Clone)]
pub struct FsRecordingStore {
    root: PathBuf,
}

impl FsRecordingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sources present in the archive, sorted
    pub fn sources(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut sources = Vec::new();
        for entry in std::fs::read_dir(&self.root).fs_context(&self.root, "list archive")? {
            let entry = entry.fs_context(&self.root, "list archive")?;
            if entry.path().is_dir() {
                sources.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        sources.sort();
        Ok(sources)
    }
}

impl RecordingStore for FsRecordingStore {
    fn list_names(&self, source: &str) -> Result<Vec<String>> {
        if !is_plain_name(source) {
            return Ok(Vec::new());
        }
        let dir = self.root.join(source);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).fs_context(&dir, "list recordings")? {
            let entry = entry.fs_context(&dir, "list recordings")?;
            if is_readable_file(&entry.path()) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn resolve(&self, source: &str, name: &str) -> Option<PathBuf> {
        if !is_plain_name(source) || !is_plain_name(name) {
            return None;
        }
        let path = self.root.join(source).join(name);
        is_readable_file(&path).then_some(path)
    }
}

/// A single path component that cannot step outside its parent
pub(crate) fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn archive() -> (TempDir, FsRecordingStore) {
        let temp = TempDir::new().unwrap();
        let default = temp.path().join("default");
        std::fs::create_dir_all(&default).unwrap();
        std::fs::write(default.join("foo.jfr"), "").unwrap();
        std::fs::write(default.join("bar.jfr"), "").unwrap();
        std::fs::create_dir_all(temp.path().join("uploads")).unwrap();
        let store = FsRecordingStore::new(temp.path());
        (temp, store)
    }

    #[test]
    fn lists_sources_and_names() {
        let (_temp, store) = archive();
        assert_eq!(store.sources().unwrap(), vec!["default", "uploads"]);
        assert_eq!(store.list_names("default").unwrap(), vec!["bar.jfr", "foo.jfr"]);
        assert!(store.list_names("uploads").unwrap().is_empty());
        assert!(store.list_names("missing").unwrap().is_empty());
    }

    #[test]
    fn resolves_only_plain_names() {
        let (temp, store) = archive();
        assert_eq!(
            store.resolve("default", "foo.jfr"),
            Some(temp.path().join("default/foo.jfr"))
        );
        assert!(store.is_readable("default", "foo.jfr"));
        assert!(store.resolve("default", "nope.jfr").is_none());
        assert!(store.resolve("..", "default").is_none());
        assert!(store.resolve("default", "../default/foo.jfr").is_none());
        assert!(store.resolve("", "foo.jfr").is_none());
    }

    #[test]
    fn missing_root_is_an_empty_archive() {
        let temp = TempDir::new().unwrap();
        let store = FsRecordingStore::new(temp.path().join("absent"));
        assert!(store.sources().unwrap().is_empty());
    }
}
