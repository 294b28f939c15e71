use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use capsule_flash::FlashLayout;
use capsule_store::StoreConfig;

/// Tool configuration, read from TOML.
///
/// ```toml
/// [store]
/// container_file_type = 4
/// default_return_width = "byte"
///
/// [layout]
/// origin = 4096
/// capsule_capacity = 1024
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub store: StoreConfig,
    pub layout: FlashLayout,
}

impl CliConfig {
    /// Load `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_types::{FileType, ReturnWidth};

    #[test]
    fn empty_config_is_default() {
        assert_eq!(CliConfig::parse("").unwrap(), CliConfig::default());
    }

    #[test]
    fn tables_override_defaults() {
        let config = CliConfig::parse(
            r#"
            [store]
            container_file_type = 9
            default_return_width = "word"

            [layout]
            origin = 8192
            capsule_capacity = 256
            capsule_odd_base = true

            [[layout.files]]
            file_type = 0
            len = 17
            "#,
        )
        .unwrap();
        assert_eq!(config.store.container_file_type, FileType(9));
        assert_eq!(config.store.default_return_width, ReturnWidth::Word);
        assert_eq!(config.store.sim_step_limit, 10_000);
        assert_eq!(config.layout.origin, 8192);
        assert_eq!(config.layout.files.len(), 1);
        assert!(config.layout.capsule_odd_base);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CliConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn no_path_means_defaults() {
        assert_eq!(CliConfig::load(None).unwrap(), CliConfig::default());
    }
}
