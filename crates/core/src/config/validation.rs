//! Checks run on a merged configuration before any backend is dialled.

use crate::config::{AppConfig, CacheConfig};
use thiserror::Error;

/// Why a configuration could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CONFIG_LOAD: {0}")]
    LoadFailed(String),

    #[error("CONFIG_INVALID: {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("CONFIG_MISSING: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Reject settings no backend or worker could run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if any site configuration is invalid
    /// (see [`CacheConfig::validate`]) or the precache interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(network) = &self.network {
            network.validate("network")?;
        }
        for (host, site) in &self.sites {
            site.validate(&format!("sites.{host}"))?;
        }

        if self.precache.user_agent.is_empty() {
            return Err(ConfigError::Invalid {
                field: "precache.user_agent".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.precache.timeout_ms < 100 {
            return Err(ConfigError::Invalid {
                field: "precache.timeout_ms".into(),
                reason: "must be at least 100ms".into(),
            });
        }

        if self.network.is_some() && !self.sites.is_empty() {
            tracing::warn!(
                site_count = self.sites.len(),
                "Both network and per-site configuration are set; network takes precedence"
            );
        }

        Ok(())
    }
}

impl CacheConfig {
    /// Validate one site's cache configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - the key template is empty
    /// - meta and data prefixes are equal
    /// - a pooled engine has no hosts
    /// - `nocache_url` or `nocache_comment` is not a valid regex
    pub fn validate(&self, scope: &str) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: String| ConfigError::Invalid { field: format!("{scope}.{field}"), reason };

        if self.key.trim().is_empty() {
            return Err(invalid("key", "must not be empty".into()));
        }

        if self.prefix_meta == self.prefix_data {
            return Err(invalid("prefix_data", "must differ from prefix_meta".into()));
        }

        if self.cache_type.is_pooled() && self.hosts.split(',').all(|h| h.trim().is_empty()) {
            return Err(invalid("hosts", format!("required for the {} engine", self.cache_type.as_str())));
        }

        for (field, pattern) in [("nocache_url", &self.nocache_url), ("nocache_comment", &self.nocache_comment)] {
            let pattern = pattern.trim();
            if !pattern.is_empty()
                && let Err(e) = regex::Regex::new(pattern)
            {
                return Err(invalid(field, e.to_string()));
            }
        }

        if self.sasl_credentials().is_some() && !self.memcached_binary {
            tracing::warn!(scope, "authuser/authpass are only used with memcached_binary = true");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(CacheConfig::default().validate("network").is_ok());
    }

    #[test]
    fn test_validate_empty_key() {
        let config = CacheConfig { key: "  ".into(), ..Default::default() };
        let result = config.validate("network");
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "network.key"));
    }

    #[test]
    fn test_validate_equal_prefixes() {
        let config = CacheConfig { prefix_meta: "x-".into(), prefix_data: "x-".into(), ..Default::default() };
        let result = config.validate("network");
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "network.prefix_data"));
    }

    #[test]
    fn test_validate_pooled_without_hosts() {
        let config = CacheConfig { cache_type: BackendKind::Memcache, hosts: " , ".into(), ..Default::default() };
        assert!(config.validate("network").is_err());

        let config = CacheConfig { cache_type: BackendKind::Local, hosts: String::new(), ..Default::default() };
        assert!(config.validate("network").is_ok());
    }

    #[test]
    fn test_validate_bad_regex() {
        let config = CacheConfig { nocache_url: "(unclosed".into(), ..Default::default() };
        let result = config.validate("network");
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "network.nocache_url"));

        let config = CacheConfig { nocache_comment: "[".into(), ..Default::default() };
        let result = config.validate("network");
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "network.nocache_comment"));
    }

    #[test]
    fn test_validate_site_scope_in_field() {
        let mut config = AppConfig::default();
        config
            .sites
            .insert("example.com".into(), CacheConfig { key: String::new(), ..Default::default() });
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "sites.example.com.key"));
    }

    #[test]
    fn test_validate_precache_timeout() {
        let mut config = AppConfig::default();
        config.precache.timeout_ms = 50;
        assert!(config.validate().is_err());
    }
}
