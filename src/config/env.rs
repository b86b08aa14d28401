use crate::core::Dn;

use super::Config;

pub const ENV_CHANGELOG_ROOT: &str = "ECL_CHANGELOG_ROOT";
pub const ENV_EXCLUDED_DOMAINS: &str = "ECL_EXCLUDED_DOMAINS";
pub const ENV_MAX_PERSISTENT_SEARCHES: &str = "ECL_MAX_PERSISTENT_SEARCHES";

pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(raw) = std::env::var(ENV_CHANGELOG_ROOT) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            match Dn::parse(trimmed) {
                Ok(_) => {
                    config.changelog.root_dn = trimmed.to_string();
                }
                Err(err) => {
                    tracing::warn!("invalid {ENV_CHANGELOG_ROOT}, ignoring: {err}");
                }
            }
        }
    }

    if let Ok(raw) = std::env::var(ENV_EXCLUDED_DOMAINS) {
        let domains: Vec<String> = raw
            .split(';')
            .map(str::trim)
            .filter(|domain| !domain.is_empty())
            .map(str::to_string)
            .collect();
        match domains.iter().try_for_each(|domain| Dn::parse(domain).map(drop)) {
            Ok(()) => {
                config.changelog.excluded_domains = domains;
            }
            Err(err) => {
                tracing::warn!("invalid {ENV_EXCLUDED_DOMAINS}, ignoring: {err}");
            }
        }
    }

    if let Ok(raw) = std::env::var(ENV_MAX_PERSISTENT_SEARCHES) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            match trimmed.parse::<usize>() {
                Ok(value) => {
                    config.changelog.max_persistent_searches = value;
                }
                Err(err) => {
                    tracing::warn!("invalid {ENV_MAX_PERSISTENT_SEARCHES}, ignoring: {err}");
                }
            }
        }
    }
}
