use std::path::{Path, PathBuf};

use crate::config::CONFIG_FILE;

/// Create `<name>/config.toml` and `<name>/content/index.rocket` in the
/// current directory.
pub fn create(name: &str) -> Result<PathBuf, String> {
    create_in(Path::new("."), name)
}

pub fn create_in(parent: &Path, name: &str) -> Result<PathBuf, String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!(
            "invalid project name '{}': use only letters and digits",
            name
        ));
    }
    let root = parent.join(name);
    if root.exists() {
        return Err(format!("'{}' already exists", root.display()));
    }

    let content = root.join("content");
    std::fs::create_dir_all(&content)
        .map_err(|e| format!("cannot create '{}': {}", content.display(), e))?;
    write(&root.join(CONFIG_FILE), &config_template(name))?;
    write(&content.join("index.rocket"), &index_template(name))?;
    tracing::debug!(root = %root.display(), "scaffolded project");
    Ok(root)
}

fn write(path: &Path, contents: &str) -> Result<(), String> {
    std::fs::write(path, contents).map_err(|e| format!("cannot write '{}': {}", path.display(), e))
}

fn config_template(name: &str) -> String {
    format!(
        "content_dir = \"content\"\noutput = \"build\"\nversion = \"0.1.0\"\n\n[theme_constants]\ntitle = \"{}\"\n",
        name
    )
}

fn index_template(name: &str) -> String {
    format!(
        "(:h1 \"{}\")\n\nWelcome to version (:version) of the documentation.\n",
        name
    )
}
