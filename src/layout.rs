//! Maven-style source layout: `src/main/<lang>/a/b/C.<ext>` with its test at
//! `src/test/<lang>/a/b/CTest.<ext>`.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::config::ProjectSection;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SourceLayout {
    root: PathBuf,
    language_dir: String,
    extension: String,
    test_suffix: String,
}

impl SourceLayout {
    pub fn new(root: impl Into<PathBuf>, project: &ProjectSection) -> Self {
        Self {
            root: root.into(),
            language_dir: project.language_dir.clone(),
            extension: project.extension.clone(),
            test_suffix: project.test_suffix.clone(),
        }
    }

    /// Java defaults (`java`, `.java`, `Test`).
    pub fn java(root: impl Into<PathBuf>) -> Self {
        Self::new(root, &ProjectSection::default())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn main_root(&self) -> PathBuf {
        self.root.join("src").join("main").join(&self.language_dir)
    }

    pub fn test_root(&self) -> PathBuf {
        self.root.join("src").join("test").join(&self.language_dir)
    }

    /// `a/b/C` -> `<root>/src/main/<lang>/a/b/C.<ext>`
    pub fn source_path(&self, class_name: &str) -> PathBuf {
        join_class(self.main_root(), top_level_class(class_name), "", &self.extension)
    }

    /// `a/b/C` -> `<root>/src/test/<lang>/a/b/CTest.<ext>`
    pub fn test_path(&self, class_name: &str) -> PathBuf {
        join_class(
            self.test_root(),
            top_level_class(class_name),
            &self.test_suffix,
            &self.extension,
        )
    }

    /// `a/b/C` -> `CTest`
    pub fn test_class_name(&self, class_name: &str) -> String {
        let class_name = top_level_class(class_name);
        let simple = class_name.rsplit('/').next().unwrap_or(class_name);
        format!("{simple}{}", self.test_suffix)
    }

    /// The conventional test path if it exists, otherwise the first file
    /// under the test tree with the expected file name.
    pub fn find_test_file(&self, class_name: &str) -> Option<PathBuf> {
        let conventional = self.test_path(class_name);
        if conventional.is_file() {
            return Some(conventional);
        }

        let file_name = format!("{}.{}", self.test_class_name(class_name), self.extension);
        let found = WalkDir::new(self.test_root())
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == file_name)
            .map(|e| e.into_path());
        if let Some(path) = &found {
            debug!(class = class_name, path = %path.display(), "test file found outside conventional path");
        }
        found
    }
}

/// `a/Foo$Bar` and `a/Foo$1` -> `a/Foo`. Nested and anonymous classes live
/// in their enclosing class's file.
pub fn top_level_class(class_name: &str) -> &str {
    class_name.split('$').next().unwrap_or(class_name)
}

fn join_class(base: PathBuf, class_name: &str, suffix: &str, extension: &str) -> PathBuf {
    let mut path = base;
    let mut parts = class_name.split('/').peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_some() {
            path.push(part);
        } else {
            path.push(format!("{part}{suffix}.{extension}"));
        }
    }
    path
}

/// Read-only access to class sources and their existing tests.
pub trait SourceStore {
    /// Source text of a class, `None` when the file does not exist.
    fn read_source(&self, class_name: &str) -> Result<Option<String>>;

    /// Existing test text for a class, `None` when there is no test yet.
    fn read_tests(&self, class_name: &str) -> Result<Option<String>>;
}

/// Reads files from disk following a `SourceLayout`.
#[derive(Debug, Clone)]
pub struct FsSourceStore {
    layout: SourceLayout,
}

impl FsSourceStore {
    pub fn new(layout: SourceLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &SourceLayout {
        &self.layout
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl SourceStore for FsSourceStore {
    fn read_source(&self, class_name: &str) -> Result<Option<String>> {
        read_optional(&self.layout.source_path(class_name))
    }

    fn read_tests(&self, class_name: &str) -> Result<Option<String>> {
        match self.layout.find_test_file(class_name) {
            Some(path) => read_optional(&path),
            None => Ok(None),
        }
    }
}
