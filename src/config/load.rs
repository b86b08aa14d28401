use std::fs;
use std::path::Path;

use super::env::apply_env_overrides;
use super::{Config, ConfigError};

/// Reads `path`, then applies environment overrides.
pub fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parses a TOML document. Missing keys take their defaults; environment
/// overrides are not applied.
pub fn from_toml_str(contents: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(contents)?)
}

/// Loads `path` when it exists, otherwise the defaults, with environment
/// overrides applied either way.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        return load_from_path(path);
    }
    tracing::debug!(path = %path.display(), "no config file, using defaults");
    let mut config = Config::default();
    apply_env_overrides(&mut config);
    Ok(config)
}
