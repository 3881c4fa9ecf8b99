use std::collections::BTreeMap;
use std::path::PathBuf;

/// A content file to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    /// `/`-separated path of the page without extension, e.g. `guide/setup`.
    pub slug: String,
}

impl Entry {
    pub fn new(path: impl Into<PathBuf>, slug: impl Into<String>) -> Self {
        Entry {
            path: path.into(),
            slug: slug.into(),
        }
    }
}

/// A rendered page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub slug: String,
    pub source_path: PathBuf,
    pub title: String,
    /// Key/value pairs set with `theme-config`.
    pub metadata: BTreeMap<String, String>,
    pub html: String,
}

/// The URL a page is served at: `index` is `/`, `guide/index` is `/guide/`
/// and any other slug maps to its own directory.
pub fn page_url(slug: &str) -> String {
    if slug == "index" {
        return "/".to_string();
    }
    match slug.strip_suffix("/index") {
        Some(dir) => format!("/{}/", dir),
        None => format!("/{}/", slug),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        assert_eq!(page_url("index"), "/");
        assert_eq!(page_url("guide/index"), "/guide/");
        assert_eq!(page_url("guide/setup"), "/guide/setup/");
    }
}
