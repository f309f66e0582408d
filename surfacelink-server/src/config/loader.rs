//! Configuration loader

use std::path::Path;

use surfacelink_protocol::MAX_FRAME_SIZE;
use surfacelink_utils::{config_file, BridgeError, Result};

use super::BridgeConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<BridgeConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(BridgeConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<BridgeConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| BridgeError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<BridgeConfig> {
        toml::from_str(content).map_err(|e| BridgeError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &BridgeConfig) -> Result<()> {
        let t = &config.transport;

        if t.port == 0 {
            return Err(BridgeError::config("port must be non-zero"));
        }

        if t.max_retries == 0 {
            return Err(BridgeError::config("max_retries must be at least 1"));
        }

        if t.command_timeout_secs == 0 {
            return Err(BridgeError::config("command_timeout_secs must be at least 1"));
        }

        if t.read_buffer_size < 512 {
            return Err(BridgeError::config("read_buffer_size must be at least 512"));
        }

        if t.max_message_size < t.read_buffer_size {
            return Err(BridgeError::config(
                "max_message_size must not be smaller than read_buffer_size",
            ));
        }

        if t.max_message_size > MAX_FRAME_SIZE {
            return Err(BridgeError::config(format!(
                "max_message_size must not exceed {} bytes",
                MAX_FRAME_SIZE
            )));
        }

        if t.monitor_interval_ms == 0 {
            return Err(BridgeError::config("monitor_interval_ms must be non-zero"));
        }

        Ok(())
    }

    /// Load from `path` (or the default location) and validate
    pub fn load_and_validate(path: Option<&Path>) -> Result<BridgeConfig> {
        let config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load()?,
        };
        Self::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(
            &path,
            r#"
            [transport]
            port = 9999
            command_timeout_secs = 2
            outbound = ["127.0.0.1:7000"]
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(config.transport.port, 9999);
        assert_eq!(config.transport.command_timeout_secs, 2);
        assert_eq!(config.transport.outbound, vec!["127.0.0.1:7000".to_string()]);
        // Untouched fields keep defaults
        assert_eq!(config.transport.max_retries, 3);
    }

    #[test]
    fn test_load_missing_path_is_file_read_error() {
        let dir = tempdir().unwrap();
        let result = ConfigLoader::load_from_path(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(BridgeError::FileRead { .. })));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = ConfigLoader::parse("invalid { toml", Path::new("test.toml"));
        assert!(matches!(result, Err(BridgeError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_parse_empty_is_default() {
        let config = ConfigLoader::parse("", Path::new("empty.toml")).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(ConfigLoader::validate(&BridgeConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_retries() {
        let mut config = BridgeConfig::default();
        config.transport.max_retries = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_small_read_buffer() {
        let mut config = BridgeConfig::default();
        config.transport.read_buffer_size = 16;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_message_size_below_buffer() {
        let mut config = BridgeConfig::default();
        config.transport.max_message_size = 1024;
        config.transport.read_buffer_size = 4096;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_message_size_beyond_length_prefix() {
        let mut config = BridgeConfig::default();
        config.transport.max_message_size = MAX_FRAME_SIZE.saturating_add(1);
        config.transport.read_buffer_size = 4096;
        if config.transport.max_message_size > MAX_FRAME_SIZE {
            let err = ConfigLoader::validate(&config).unwrap_err();
            assert!(err.to_string().contains("max_message_size"), "{}", err);
        }

        config.transport.max_message_size = MAX_FRAME_SIZE;
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_embedded_default_toml_parses() {
        let config =
            ConfigLoader::parse(super::super::DEFAULT_CONFIG_TOML, Path::new("default.toml"))
                .unwrap();
        assert_eq!(config, BridgeConfig::default());
    }
}
