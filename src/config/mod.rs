//! Config loading: TOML file, defaults, environment overrides.

mod env;
mod load;
mod schema;

use std::path::PathBuf;

use thiserror::Error;

use crate::core::CoreError;

pub use env::{
    apply_env_overrides, ENV_CHANGELOG_ROOT, ENV_EXCLUDED_DOMAINS, ENV_MAX_PERSISTENT_SEARCHES,
};
pub use load::{from_toml_str, load_from_path, load_or_default};
pub use schema::{
    default_excluded_domains, BackendConfig, ChangelogConfig, Config, LogFormat, LoggingConfig,
    DEFAULT_MAX_PERSISTENT_SEARCHES, DEFAULT_ROOT_DN,
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{field} has invalid dn {value:?}: {source}")]
    InvalidDn {
        field: &'static str,
        value: String,
        #[source]
        source: CoreError,
    },

    #[error("{field} is invalid: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
