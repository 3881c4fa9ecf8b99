use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use codespan_reporting::files::SimpleFiles;

/// Reads source files for the compiler.
pub trait SourceLoader {
    fn load(&self, path: &Path) -> io::Result<String>;

    /// The identity of a file: two paths naming the same file must
    /// canonicalize to the same value.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Loads sources from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        path.canonicalize()
    }
}

/// Serves sources from memory, keyed by normalized path.
#[derive(Debug, Default, Clone)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, source: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), source.into());
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        self.files.get(&normalize(path)).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no such file in memory")
        })
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let normalized = normalize(path);
        if self.files.contains_key(&normalized) {
            Ok(normalized)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no such file in memory",
            ))
        }
    }
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve a path written in `from` against that file's directory, adding
/// the `.rocket` extension when none is given.
pub fn resolve_relative(from: &Path, target: &str) -> PathBuf {
    let base = from.parent().unwrap_or_else(|| Path::new(""));
    let resolved = base.join(target);
    if resolved.extension().is_none() {
        resolved.with_extension("rocket")
    } else {
        resolved
    }
}

/// Every source file read during a compilation, for diagnostics.
#[derive(Debug)]
pub struct SourceMap {
    files: SimpleFiles<String, String>,
    paths: Vec<PathBuf>,
}

impl Default for SourceMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceMap {
    pub fn new() -> Self {
        SourceMap {
            files: SimpleFiles::new(),
            paths: Vec::new(),
        }
    }

    /// Register a file and return its id.
    pub fn add(&mut self, path: PathBuf, source: String) -> usize {
        let id = self.files.add(path.display().to_string(), source);
        self.paths.push(path);
        id
    }

    pub fn path(&self, id: usize) -> Option<&Path> {
        self.paths.get(id).map(PathBuf::as_path)
    }

    pub fn source(&self, id: usize) -> Option<&str> {
        self.files.get(id).ok().map(|file| file.source().as_str())
    }

    pub fn id_of(&self, path: &Path) -> Option<usize> {
        self.paths.iter().position(|p| p == path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// The underlying files, for `codespan_reporting::term::emit`.
    pub fn files(&self) -> &SimpleFiles<String, String> {
        &self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_loader_normalizes_paths() {
        let loader = MemoryLoader::new().with_file("content/a.rocket", "hello");
        let path = Path::new("content/guide/../a.rocket");
        assert_eq!(loader.load(path).unwrap(), "hello");
        assert_eq!(
            loader.canonicalize(path).unwrap(),
            PathBuf::from("content/a.rocket")
        );
        assert!(loader.canonicalize(Path::new("content/missing.rocket")).is_err());
    }

    #[test]
    fn relative_paths_get_extension() {
        let from = Path::new("content/guide/index.rocket");
        assert_eq!(
            resolve_relative(from, "../shared/macros"),
            PathBuf::from("content/guide/../shared/macros.rocket")
        );
        assert_eq!(
            resolve_relative(from, "intro.rocket"),
            PathBuf::from("content/guide/intro.rocket")
        );
    }

    #[test]
    fn source_map_ids() {
        let mut map = SourceMap::new();
        let a = map.add(PathBuf::from("a.rocket"), "A".to_string());
        let b = map.add(PathBuf::from("b.rocket"), "B".to_string());
        assert_eq!((a, b), (0, 1));
        assert_eq!(map.source(b), Some("B"));
        assert_eq!(map.id_of(Path::new("a.rocket")), Some(0));
    }
}
