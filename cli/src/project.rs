use std::path::{Path, PathBuf};

use rocket_compiler::render::escape_html;
use rocket_compiler::{CompileOptions, Compiler, Entry, FsLoader, Page};
use walkdir::WalkDir;

use crate::config::ProjectConfig;

pub const SOURCE_EXTENSION: &str = "rocket";

pub struct Project {
    root: PathBuf,
    config: ProjectConfig,
}

pub struct BuildSummary {
    pub pages: usize,
}

impl Project {
    pub fn open(root: &Path) -> Result<Self, String> {
        let config = ProjectConfig::load(root)?;
        Ok(Project {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join(&self.config.content_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.config.output)
    }

    /// Compile every page; with `check`, nothing is written.
    pub fn build(&self, check: bool, no_color: bool) -> Result<BuildSummary, String> {
        let entries = discover_entries(&self.content_dir())?;
        tracing::info!(
            entries = entries.len(),
            content = %self.content_dir().display(),
            "building project"
        );

        let options = CompileOptions {
            version: self.config.version.clone(),
            toc_depth: self.config.toc_depth,
            ..CompileOptions::default()
        };
        let mut compiler = Compiler::new(FsLoader, options);
        let pages = match compiler.compile(&entries) {
            Ok(pages) => pages,
            Err(errors) => {
                crate::emit_diagnostics(compiler.sources().files(), &errors, no_color);
                return Err(format!("build failed with {} error(s)", errors.len()));
            }
        };

        if !check {
            let output = self.output_dir();
            let site_title = self.config.site_title();
            for page in &pages {
                let path = output.join(output_path(&page.slug));
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| format!("cannot create '{}': {}", parent.display(), e))?;
                }
                std::fs::write(&path, page_shell(page, site_title.as_deref()))
                    .map_err(|e| format!("cannot write '{}': {}", path.display(), e))?;
                tracing::debug!(path = %path.display(), "wrote page");
            }
        }

        Ok(BuildSummary { pages: pages.len() })
    }
}

/// Every `.rocket` file under `content_dir`, sorted by path. The slug is
/// the path relative to `content_dir` without the extension.
pub fn discover_entries(content_dir: &Path) -> Result<Vec<Entry>, String> {
    if !content_dir.is_dir() {
        return Err(format!(
            "content directory '{}' does not exist",
            content_dir.display()
        ));
    }

    let mut entries = Vec::new();
    for item in WalkDir::new(content_dir).sort_by_file_name() {
        let item = match item {
            Ok(item) => item,
            Err(error) => {
                tracing::warn!(%error, "skipping unreadable path");
                continue;
            }
        };
        let path = item.path();
        if !item.file_type().is_file()
            || path.extension().and_then(|e| e.to_str()) != Some(SOURCE_EXTENSION)
        {
            continue;
        }
        let Ok(relative) = path.strip_prefix(content_dir) else {
            continue;
        };
        let slug = relative
            .with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push(Entry::new(path, slug));
    }
    Ok(entries)
}

/// Where a page is written, relative to the output directory. Matches the
/// URL the page is linked at.
pub fn output_path(slug: &str) -> PathBuf {
    if slug == "index" {
        return PathBuf::from("index.html");
    }
    let dir = slug.strip_suffix("/index").unwrap_or(slug);
    PathBuf::from(dir).join("index.html")
}

fn page_shell(page: &Page, site_title: Option<&str>) -> String {
    let title = match site_title {
        Some(site) if site != page.title => format!("{} - {}", page.title, site),
        _ => page.title.clone(),
    };
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n<main>\n{}</main>\n</body>\n</html>\n",
        escape_html(&title),
        page.html
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_paths_follow_urls() {
        assert_eq!(output_path("index"), PathBuf::from("index.html"));
        assert_eq!(output_path("guide/index"), PathBuf::from("guide/index.html"));
        assert_eq!(output_path("guide/setup"), PathBuf::from("guide/setup/index.html"));
    }

    #[test]
    fn discovers_sources_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let content = dir.path();
        std::fs::create_dir_all(content.join("guide")).unwrap();
        std::fs::write(content.join("index.rocket"), "").unwrap();
        std::fs::write(content.join("guide/setup.rocket"), "").unwrap();
        std::fs::write(content.join("guide/notes.txt"), "").unwrap();

        let slugs: Vec<String> = discover_entries(content)
            .unwrap()
            .into_iter()
            .map(|e| e.slug)
            .collect();
        assert_eq!(slugs, vec!["guide/setup", "index"]);
    }

    #[test]
    fn shell_escapes_title() {
        let page = Page {
            slug: "index".into(),
            source_path: PathBuf::from("index.rocket"),
            title: "A & B".into(),
            metadata: Default::default(),
            html: "<p>x</p>\n".into(),
        };
        let html = page_shell(&page, Some("Docs"));
        assert!(html.contains("<title>A &amp; B - Docs</title>"));
        assert!(html.contains("<main>\n<p>x</p>\n</main>"));
    }
}
