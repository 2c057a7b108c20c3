//! Routing configuration and the pool builder.
//!
//! The configuration file is a JSON array of domain entries:
//!
//! ```json
//! [
//!     { "domain": "a.test", "addresses": ["http://10.0.0.1:8080", "http://10.0.0.2:8080"] }
//! ]
//! ```
//!
//! `servers` is accepted in place of `addresses`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::pool::Pool;
use crate::domain::registry::Registry;
use crate::error::ConfigError;

/// One domain and the upstream addresses serving it, in rotation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Host name the entry applies to.
    pub domain: String,
    /// Upstream addresses (`scheme://host[:port]`).
    #[serde(alias = "servers", default)]
    pub addresses: Vec<String>,
}

/// The full routing configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    /// Domain entries in file order.
    pub domains: Vec<DomainConfig>,
}

/// Parse a configuration document.
pub fn parse_configuration(bytes: &[u8]) -> Result<Configuration, ConfigError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read and parse the configuration file at `path`.
pub async fn load_configuration(path: impl AsRef<Path>) -> Result<Configuration, ConfigError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_configuration(&bytes)
}

/// Normalise a host name for registry lookups.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Build a registry from `config`.
///
/// Every backend starts healthy. Domains are normalised with
/// [`normalize_domain`]; repeated entries for one domain are merged in file
/// order, and a repeated address within a domain collapses to its first
/// occurrence. Identical configurations always produce identical rotation
/// order.
pub fn build(config: &Configuration) -> Result<Registry, ConfigError> {
    let mut order: Vec<(String, Vec<String>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for entry in &config.domains {
        let domain = normalize_domain(&entry.domain);
        if domain.is_empty() {
            return Err(ConfigError::EmptyDomain);
        }

        let slot = *index.entry(domain.clone()).or_insert_with(|| {
            order.push((domain.clone(), Vec::new()));
            order.len() - 1
        });

        for address in &entry.addresses {
            let address = address.trim();
            if address.is_empty() {
                return Err(ConfigError::EmptyAddress { domain });
            }
            if !seen.insert((domain.clone(), address.to_string())) {
                warn!(domain = %domain, address, "duplicate backend address ignored");
                continue;
            }
            order[slot].1.push(address.to_string());
        }
    }

    let pools = order.into_iter().map(|(domain, addresses)| {
        if addresses.is_empty() {
            warn!(domain = %domain, "domain has no backends");
        }
        debug!(domain = %domain, backends = addresses.len(), "pool built");
        Pool::new(domain, addresses)
    });

    Ok(Registry::from_pools(pools))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses(registry: &Registry, domain: &str) -> Vec<String> {
        registry
            .get(domain)
            .unwrap()
            .backends()
            .iter()
            .map(|b| b.address().to_string())
            .collect()
    }

    #[test]
    fn parses_addresses_and_servers_alias() {
        let config = parse_configuration(
            br#"[
                {"domain": "a.test", "addresses": ["h1", "h2", "h3"]},
                {"domain": "b.test", "servers": ["h4"]}
            ]"#,
        )
        .unwrap();

        assert_eq!(config.domains.len(), 2);
        assert_eq!(config.domains[0].addresses, ["h1", "h2", "h3"]);
        assert_eq!(config.domains[1].addresses, ["h4"]);
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(matches!(
            parse_configuration(b"{not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            parse_configuration(br#"{"domain": "a.test"}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn build_keeps_order_and_starts_healthy() {
        let config = parse_configuration(br#"[{"domain": "A.Test", "addresses": ["h1", "h2", "h3"]}]"#)
            .unwrap();
        let registry = build(&config).unwrap();

        assert_eq!(addresses(&registry, "a.test"), ["h1", "h2", "h3"]);
        assert_eq!(registry.get("a.test").unwrap().healthy_count(), 3);
    }

    #[test]
    fn build_is_reproducible() {
        let config = parse_configuration(
            br#"[{"domain": "a.test", "addresses": ["h3", "h1", "h2"]}, {"domain": "b.test", "addresses": ["x"]}]"#,
        )
        .unwrap();
        let first = build(&config).unwrap();
        let second = build(&config).unwrap();
        assert_eq!(first.status(), second.status());
    }

    #[test]
    fn duplicates_collapse_and_repeated_domains_merge() {
        let config = parse_configuration(
            br#"[
                {"domain": "a.test", "addresses": ["h1", "h2", "h1"]},
                {"domain": "a.test", "addresses": ["h3", "h2"]}
            ]"#,
        )
        .unwrap();
        let registry = build(&config).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(addresses(&registry, "a.test"), ["h1", "h2", "h3"]);
    }

    #[test]
    fn rejects_empty_domain_and_address() {
        let config = parse_configuration(br#"[{"domain": " ", "addresses": ["h1"]}]"#).unwrap();
        assert!(matches!(build(&config), Err(ConfigError::EmptyDomain)));

        let config = parse_configuration(br#"[{"domain": "a.test", "addresses": [""]}]"#).unwrap();
        assert!(matches!(
            build(&config),
            Err(ConfigError::EmptyAddress { domain }) if domain == "a.test"
        ));
    }

    #[test]
    fn domain_without_addresses_builds_empty_pool() {
        let config = parse_configuration(br#"[{"domain": "a.test", "addresses": []}]"#).unwrap();
        let registry = build(&config).unwrap();
        assert!(registry.get("a.test").unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_reports_unreadable_source() {
        let err = load_configuration("/nonexistent/loba/domains.json")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn normalizes_host_names() {
        assert_eq!(normalize_domain(" Example.COM. "), "example.com");
    }
}
