//! Config command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::Config;
use crate::util::write_output;

/// Print the resolved configuration, or write defaults to `path` with `init`.
pub fn cmd_config(config: &Config, path: Option<&Path>, init: bool) -> Result<()> {
    let path: PathBuf = path.map(Path::to_path_buf).unwrap_or_else(Config::default_path);

    if init {
        if path.exists() {
            return write_output(&format!("Config already exists: {}\n", path.display()));
        }
        Config::default().save(&path)?;
        return write_output(&format!("Wrote default config to {}\n", path.display()));
    }

    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    write_output(&format!("# {}\n{}", path.display(), content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_writes_defaults_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        cmd_config(&Config::default(), Some(&path), true).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[tracker]"));

        std::fs::write(&path, "[api]\nurl = \"https://kept.example.com\"\n").unwrap();
        cmd_config(&Config::default(), Some(&path), true).unwrap();
        let kept = std::fs::read_to_string(&path).unwrap();
        assert!(kept.contains("kept.example.com"));
    }
}
