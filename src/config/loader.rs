//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::DevConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse a config document without touching the filesystem.
pub fn parse_config(content: &str) -> Result<DevConfig, ConfigError> {
    let config: DevConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
///
/// Relative site directories are resolved against the config file's directory.
pub fn load_config(path: &Path) -> Result<DevConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config = parse_config(&content)?;

    if let Some(base) = path.parent() {
        if config.site.publish_dir.is_relative() {
            config.site.publish_dir = base.join(&config.site.publish_dir);
        }
        if config.site.project_dir.is_relative() {
            config.site.project_dir = base.join(&config.site.project_dir);
        }
        if let Some(dir) = config.functions.directory.as_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let config = parse_config(
            r#"
            [site]
            id = "site-123"
            publish_dir = "public"

            [framework]
            port = 3000

            [[rules.redirects]]
            from = "/old"
            to = "/new"
            status = 301
            "#,
        )
        .unwrap();

        assert_eq!(config.site.id, "site-123");
        assert_eq!(config.framework.as_ref().unwrap().host, "localhost");
        assert_eq!(config.rules.redirects.len(), 1);
        assert_eq!(config.rules.jwt_role_path, "app_metadata.authorization.roles");
    }

    #[test]
    fn rejects_invalid_toml() {
        let err = parse_config("[site\nid=").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn resolves_relative_dirs_against_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev.toml");
        fs::write(&path, "[site]\npublish_dir = \"dist\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.site.publish_dir, dir.path().join("dist"));
        assert_eq!(config.site.project_dir, dir.path().join("."));
    }
}
