//! Filesystem abstractions used for source indexing and path checks.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::error::Result;

/// Directory names that hold vendored or installed dependencies.
pub const DEPENDENCY_DIRS: &[&str] = &["node_modules", "vendor", "bower_components", "__pycache__"];

/// Abstraction over filesystem access for testability.
#[cfg_attr(test, mockall::automock)]
pub trait FileSystem {
    /// List source files under the root, skipping hidden and dependency directories.
    fn list_source_files(&self, root: &Path) -> Result<Vec<PathBuf>>;
    /// Read a file into a string.
    fn read_to_string(&self, path: &Path) -> Result<String>;
    /// Whether a file exists at exactly this path.
    fn exists(&self, path: &Path) -> bool;
    /// Write a file, creating missing parent directories.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
}

/// Default filesystem implementation backed by `std::fs`.
#[derive(Debug, Default, Clone)]
pub struct StdFileSystem;

impl StdFileSystem {
    /// Create a new standard filesystem adapter.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for StdFileSystem {
    fn list_source_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));

        for entry in walker {
            let entry = entry.map_err(|err| {
                std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        files.sort();
        Ok(files)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        Ok(std::fs::read_to_string(path)?)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.') || DEPENDENCY_DIRS.contains(&name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::StdFileSystem;
    use crate::fs::FileSystem;
    use std::path::PathBuf;

    #[test]
    fn std_filesystem_lists_sources_and_skips_caches() {
        let root = std::env::temp_dir().join(unique_dir_name());
        let source = root.join("src/main.go");
        let vendored = root.join("vendor/lib/lib.go");
        let installed = root.join("web/node_modules/pkg/index.js");
        let hidden = root.join(".git/config");
        for path in [&source, &vendored, &installed, &hidden] {
            std::fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
            std::fs::write(path, "package main").expect("write file");
        }

        let fs = StdFileSystem::new();
        let files = fs.list_source_files(&root).expect("list files");
        assert_eq!(files, vec![source.clone()]);

        assert!(fs.exists(&source));
        assert!(!fs.exists(&root.join("src/missing.go")));
        assert!(!fs.exists(&root.join("src")));
        let contents = fs.read_to_string(&source).expect("read file");
        assert_eq!(contents, "package main");

        let report = root.join("out/nested/summary.json");
        fs.write(&report, b"{}").expect("write file");
        assert_eq!(fs.read_to_string(&report).expect("read back"), "{}");

        std::fs::remove_dir_all(&root).expect("cleanup temp dir");
    }

    fn unique_dir_name() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time")
            .as_nanos();
        PathBuf::from(format!("coverport_core_fs_test_{nanos}"))
    }
}
