//! Configuration for the rule filter plugin.
//!
//! The embedding server usually deserializes [`FilterConfig`] out of its
//! own configuration tree; [`FilterConfig::load`] reads a standalone TOML
//! file for hosts that configure the plugin separately.
//!
//! # Example Config
//! ```toml
//! dir = "/var/lib/dns/adguard"
//! socks5 = "127.0.0.1:1080"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Settings for the rule filter plugin.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FilterConfig {
    /// Working directory holding the manifest and downloaded rule files.
    /// Created if absent.
    pub dir: PathBuf,

    /// Optional SOCKS5 proxy (`host:port`) for all rule downloads. When
    /// unset, the process environment's proxy variables apply.
    #[serde(default)]
    pub socks5: Option<String>,
}

impl FilterConfig {
    /// Loads the configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML fails to
    /// parse, or [`validate`](Self::validate) rejects the result.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .context("failed to read filter config file")?;
        let config: FilterConfig =
            toml::from_str(&contents).context("failed to parse filter config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that required fields are usable.
    pub fn validate(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            bail!("'dir' must be specified");
        }
        if let Some(addr) = &self.socks5 {
            if addr.trim().is_empty() {
                bail!("'socks5' must not be blank when set");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
            dir = "/tmp/rules"
            socks5 = "127.0.0.1:1080"
        "#;
        let config: FilterConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.dir, PathBuf::from("/tmp/rules"));
        assert_eq!(config.socks5.as_deref(), Some("127.0.0.1:1080"));
    }

    #[test]
    fn test_socks5_defaults_to_none() {
        let config: FilterConfig = toml::from_str(r#"dir = "rules""#).unwrap();
        assert!(config.socks5.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_dir_rejected() {
        let config: FilterConfig = toml::from_str(r#"dir = """#).unwrap();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.toml");
        tokio::fs::write(&path, "dir = \"/tmp/rules\"\n").await.unwrap();

        let config = FilterConfig::load(&path).await.unwrap();
        assert_eq!(config.dir, PathBuf::from("/tmp/rules"));

        assert!(FilterConfig::load(dir.path().join("missing.toml"))
            .await
            .is_err());
    }
}
