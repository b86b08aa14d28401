use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::{Dn, Rdn};

use super::ConfigError;

pub const DEFAULT_ROOT_DN: &str = "cn=changelog";
pub const DEFAULT_MAX_PERSISTENT_SEARCHES: usize = 256;

/// Domains never exposed through the changelog unless configured otherwise.
pub fn default_excluded_domains() -> Vec<String> {
    vec!["cn=admin data".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub changelog: ChangelogConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChangelogConfig {
    pub root_dn: String,
    pub excluded_domains: Vec<String>,
    pub max_persistent_searches: usize,
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            root_dn: DEFAULT_ROOT_DN.to_string(),
            excluded_domains: default_excluded_domains(),
            max_persistent_searches: DEFAULT_MAX_PERSISTENT_SEARCHES,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    /// `EnvFilter` directives, used when `ECL_LOG` is unset.
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
        }
    }
}

/// Validated settings the backend runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub root_dn: Dn,
    pub excluded_domains: BTreeSet<Dn>,
    pub max_persistent_searches: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            root_dn: Dn::from_rdns(vec![Rdn::new("cn", "changelog")]),
            excluded_domains: BTreeSet::from([Dn::from_rdns(vec![Rdn::new(
                "cn",
                "admin data",
            )])]),
            max_persistent_searches: DEFAULT_MAX_PERSISTENT_SEARCHES,
        }
    }
}

impl TryFrom<&ChangelogConfig> for BackendConfig {
    type Error = ConfigError;

    fn try_from(config: &ChangelogConfig) -> Result<Self, Self::Error> {
        let root_dn = parse_dn("changelog.root_dn", &config.root_dn)?;
        if root_dn.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "changelog.root_dn",
                reason: "must not be empty".to_string(),
            });
        }
        let excluded_domains = config
            .excluded_domains
            .iter()
            .map(|raw| parse_dn("changelog.excluded_domains", raw))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self {
            root_dn,
            excluded_domains,
            max_persistent_searches: config.max_persistent_searches,
        })
    }
}

fn parse_dn(field: &'static str, raw: &str) -> Result<Dn, ConfigError> {
    Dn::parse(raw).map_err(|source| ConfigError::InvalidDn {
        field,
        value: raw.to_string(),
        source,
    })
}
