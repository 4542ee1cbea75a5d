//! Configuration file support for the capfs CLI.
//!
//! Configuration is stored at `~/.config/capfs/config.toml` (XDG standard)
//! or `~/Library/Application Support/com.capfs.capfs/config.toml` on macOS.
//! `CAPFS_CONFIG_DIR` overrides the directory.
//!
//! # Example configuration
//!
//! ```toml
//! [roots]
//! work = "/home/user/work"
//! photos = "/media/photos"
//!
//! [transfer]
//! max_parallel = 8
//! progress_interval = "500ms"
//! overwrite_prompt = "batch"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use capfs_transfer::TransferConfig;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "CAPFS_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Local directories registered as top-level roots, by alias
    #[serde(default)]
    pub roots: BTreeMap<String, PathBuf>,

    /// Upload and download tuning
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    /// Load configuration from the default path, or return empty config if not found.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load configuration from `path`, or return empty config if not found.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Register (or replace) a root alias.
    pub fn add_root(&mut self, alias: impl Into<String>, path: impl Into<PathBuf>) -> Result<()> {
        let alias = alias.into();
        validate_alias(&alias)?;
        self.roots.insert(alias, path.into());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for alias in self.roots.keys() {
            validate_alias(alias)?;
        }
        self.transfer.validate()?;
        Ok(())
    }
}

fn validate_alias(alias: &str) -> Result<()> {
    if alias.is_empty() || alias == "." || alias == ".." || alias.contains('/') {
        bail!("Invalid root alias '{alias}': aliases are single path components");
    }
    Ok(())
}

/// Parse a `NAME=PATH` root argument.
pub fn parse_root_arg(s: &str) -> Result<(String, PathBuf), String> {
    let (alias, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{s}'"))?;
    validate_alias(alias).map_err(|e| e.to_string())?;
    if path.is_empty() {
        return Err(format!("root '{alias}' has an empty path"));
    }
    Ok((alias.to_string(), PathBuf::from(path)))
}

/// Get the path to the configuration file.
///
/// Uses XDG config directory on Linux, Application Support on macOS.
pub fn config_path() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir).join(CONFIG_FILE));
    }

    let base_dirs = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;

    #[cfg(target_os = "macos")]
    {
        let config_dir = base_dirs
            .home_dir()
            .join("Library/Application Support/com.capfs.capfs");
        Ok(config_dir.join(CONFIG_FILE))
    }

    #[cfg(not(target_os = "macos"))]
    {
        let config_dir = base_dirs.config_dir().join("capfs");
        Ok(config_dir.join(CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capfs_transfer::OverwritePrompt;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = Config::load_from(&temp.path().join(CONFIG_FILE)).unwrap();
        assert!(config.roots.is_empty());
        assert_eq!(config.transfer, TransferConfig::default());
    }

    #[test]
    fn test_parse_roots_and_transfer() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
[roots]
work = "/srv/work"

[transfer]
max_parallel = 4
progress_interval = "250ms"
overwrite_prompt = "batch"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.roots["work"], PathBuf::from("/srv/work"));
        assert_eq!(config.transfer.max_parallel, 4);
        assert_eq!(config.transfer.progress_interval, Duration::from_millis(250));
        assert_eq!(config.transfer.overwrite_prompt, OverwritePrompt::Batch);
        assert_eq!(
            config.transfer.stream_threshold,
            TransferConfig::default().stream_threshold
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);

        std::fs::write(&path, "[roots]\n\"a/b\" = \"/tmp\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());

        std::fs::write(&path, "[transfer]\nmax_parallel = 0\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_parallel"));
    }

    #[test]
    fn test_parse_root_arg() {
        assert_eq!(
            parse_root_arg("work=/srv/work").unwrap(),
            ("work".to_string(), PathBuf::from("/srv/work"))
        );
        assert!(parse_root_arg("work").is_err());
        assert!(parse_root_arg("=/srv").is_err());
        assert!(parse_root_arg("a/b=/srv").is_err());
        assert!(parse_root_arg("work=").is_err());
    }
}
