//! Configuration file loading for snipbox
//!
//! Handles loading and parsing configuration files using the config crate.
//! Files and the embedded example are layered under `SNIPBOX_*` environment
//! variables, with `__` separating nested keys (`SNIPBOX_LIMITS__TIME_LIMIT`).

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, ENV_PREFIX, EXAMPLE_CONFIG};

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    /// Load configuration from a file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .add_source(environment())
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load the embedded example configuration, then apply environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml))
            .add_source(environment())
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.queue_timeout < 0.0 {
            return Err(ConfigError::Invalid(
                "queue_timeout must not be negative".to_string(),
            ));
        }
        if self.source_limits.max_chars == 0 || self.source_limits.max_lines == 0 {
            return Err(ConfigError::Invalid(
                "source limits must be positive".to_string(),
            ));
        }

        if let Some(cpu) = self.limits.time_limit {
            if cpu <= 0.0 {
                return Err(ConfigError::Invalid(
                    "limits.time_limit must be positive".to_string(),
                ));
            }
            if let Some(wall) = self.limits.wall_time_limit
                && wall <= cpu
            {
                return Err(ConfigError::Invalid(format!(
                    "limits.wall_time_limit ({wall}) must exceed limits.time_limit ({cpu})"
                )));
            }
        }
        for (name, value) in [
            ("memory_limit", self.limits.memory_limit),
            ("rss_limit", self.limits.rss_limit),
            ("stack_limit", self.limits.stack_limit),
            ("max_output", self.limits.max_output),
        ] {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "limits.{name} must be positive"
                )));
            }
        }

        self.tools.validate()?;

        let session = &self.session;
        if session.heartbeat_interval <= 0.0 || session.idle_timeout <= 0.0 {
            return Err(ConfigError::Invalid(
                "session intervals must be positive".to_string(),
            ));
        }
        if session.heartbeat_grace <= 0.0 || session.heartbeat_grace > session.heartbeat_interval
        {
            return Err(ConfigError::Invalid(format!(
                "session.heartbeat_grace ({}) must be positive and at most heartbeat_interval ({})",
                session.heartbeat_grace, session.heartbeat_interval
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = Config::parse_toml("").unwrap();
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.limits.time_limit, Some(10.0));
        assert_eq!(config.tools.gcc, "gcc");
        assert_eq!(config.session.heartbeat_interval, 30.0);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
temp_root = "/var/tmp/snipbox"
max_concurrent_jobs = 2
queue_timeout = 1.5

[source_limits]
max_chars = 1000
max_lines = 50

[limits]
time_limit = 2.0
wall_time_limit = 3.0
memory_limit = 65536

[tools]
gcc = "/usr/bin/gcc-13"
tool_timeout = 20.0

[session]
heartbeat_interval = 5.0
heartbeat_grace = 2.0
idle_timeout = 60.0

[server]
bind = "127.0.0.1:9000"
"#;

        let config = Config::parse_toml(toml).unwrap();
        assert_eq!(
            config.temp_root,
            std::path::PathBuf::from("/var/tmp/snipbox")
        );
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.source_limits.max_lines, 50);
        assert_eq!(config.limits.time_limit, Some(2.0));
        assert_eq!(config.limits.memory_limit, Some(65536));
        assert_eq!(config.tools.gcc, "/usr/bin/gcc-13");
        assert_eq!(config.tools.gxx, "g++");
        assert_eq!(config.server.bind, "127.0.0.1:9000");
    }

    #[test]
    fn test_partial_limits_leave_other_fields_unset() {
        let toml = r#"
[limits]
time_limit = 1.0
"#;
        let config = Config::parse_toml(toml).unwrap();
        // Only time_limit was specified; the rest are unset, not defaulted
        assert_eq!(config.limits.time_limit, Some(1.0));
        assert_eq!(config.limits.wall_time_limit, None);
        assert_eq!(config.limits.memory_limit, None);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(Config::builtin().validate().is_ok());
    }

    #[test]
    fn test_invalid_wall_not_above_cpu() {
        let toml = r#"
[limits]
time_limit = 5.0
wall_time_limit = 5.0
"#;
        assert!(matches!(
            Config::parse_toml(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_invalid_grace_above_interval() {
        let toml = r#"
[session]
heartbeat_interval = 5.0
heartbeat_grace = 6.0
"#;
        assert!(matches!(
            Config::parse_toml(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_invalid_zero_jobs() {
        assert!(Config::parse_toml("max_concurrent_jobs = 0").is_err());
    }

    #[test]
    fn test_invalid_empty_tool() {
        let toml = r#"
[tools]
valgrind = ""
"#;
        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snipbox.toml");
        std::fs::write(&path, "max_concurrent_jobs = 3\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.max_concurrent_jobs, 3);
    }

    #[test]
    fn test_from_missing_file_fails() {
        assert!(Config::from_file("/nonexistent/snipbox.toml").is_err());
    }
}
