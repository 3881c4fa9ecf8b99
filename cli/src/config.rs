use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const CONFIG_FILE: &str = "config.toml";

/// A project's `config.toml`. Every key is optional; keys this tool does
/// not use (such as `theme` or `[templates]`) are ignored with a warning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory holding the `.rocket` sources, relative to the project.
    pub content_dir: PathBuf,

    /// Directory pages are written to, relative to the project.
    pub output: PathBuf,

    /// Project version, returned by the `version` directive.
    pub version: String,

    /// Deepest heading level listed under a document in a `toctree`.
    pub toc_depth: usize,

    /// Free-form values for the page shell. `title` names the site.
    pub theme_constants: BTreeMap<String, toml::Value>,

    #[serde(flatten)]
    pub unknown: BTreeMap<String, toml::Value>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            content_dir: PathBuf::from("content"),
            output: PathBuf::from("build"),
            version: String::new(),
            toc_depth: 2,
            theme_constants: BTreeMap::new(),
            unknown: BTreeMap::new(),
        }
    }
}

impl ProjectConfig {
    pub fn parse(source: &str) -> Result<Self, String> {
        let config: ProjectConfig = toml::from_str(source).map_err(|e| e.to_string())?;
        for key in config.unknown.keys() {
            tracing::warn!(key = %key, "ignoring unknown config key");
        }
        Ok(config)
    }

    /// Read `config.toml` from a project directory.
    pub fn load(project: &Path) -> Result<Self, String> {
        let path = project.join(CONFIG_FILE);
        let source = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
        Self::parse(&source).map_err(|e| format!("{}: {}", path.display(), e))
    }

    /// A theme constant as text. Strings are taken as is; other values use
    /// their TOML spelling.
    pub fn constant(&self, key: &str) -> Option<String> {
        self.theme_constants.get(key).map(|value| match value {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn site_title(&self) -> Option<String> {
        self.constant("title")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        assert_eq!(ProjectConfig::parse("").unwrap(), ProjectConfig::default());
    }

    #[test]
    fn full_config() {
        let config = ProjectConfig::parse(
            r#"
content_dir = "docs"
output = "public"
version = "1.2.3"
toc_depth = 3

[theme_constants]
title = "Handbook"
show_nav = true
"#,
        )
        .unwrap();
        assert_eq!(config.content_dir, PathBuf::from("docs"));
        assert_eq!(config.output, PathBuf::from("public"));
        assert_eq!(config.version, "1.2.3");
        assert_eq!(config.toc_depth, 3);
        assert_eq!(config.site_title().as_deref(), Some("Handbook"));
        assert_eq!(config.constant("show_nav").as_deref(), Some("true"));
    }

    #[test]
    fn unused_keys_are_ignored() {
        let config = ProjectConfig::parse(
            r#"
theme = "rocket"
content_dir = "docs"

[templates]
page = "page.html"
"#,
        )
        .unwrap();
        assert_eq!(config.content_dir, PathBuf::from("docs"));
        let unknown: Vec<_> = config.unknown.keys().map(String::as_str).collect();
        assert_eq!(unknown, vec!["templates", "theme"]);
    }

    #[test]
    fn parse_errors_are_reported_once() {
        let err = ProjectConfig::parse("toc_depth = \"deep\"").unwrap_err();
        assert!(err.contains("toc_depth"), "{}", err);
        assert_eq!(err.matches("TOML parse error").count(), 1, "{}", err);
    }
}
