//! YAML configuration of monitored domains.
//!
//! ```yaml
//! domains:
//!   - domain: example.com
//!     nameservers: [a.iana-servers.net, b.iana-servers.net]
//!     dnssec: signedDelegation
//!   - domain: foo.rs
//!     registrar: Loopia d.o.o.
//! fields:
//!   nameservers: nameServer
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compare::FieldNames;
use crate::error::{Result, WatchError};
use crate::validation::normalize_domain;

/// Desired state of one monitored domain. Empty expectations are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDomain {
    pub domain: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dnssec: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registrar: String,
}

impl ConfigDomain {
    /// A domain with no expectations: only its expiry is tracked.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    pub fn has_expectations(&self) -> bool {
        !(self.status.is_empty()
            && self.nameservers.is_empty()
            && self.dnssec.is_empty()
            && self.registrar.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub domains: Vec<ConfigDomain>,
    #[serde(default)]
    pub fields: FieldNames,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            WatchError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&text)?;
        debug!(path = %path.display(), domains = config.domains.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.domains.is_empty() {
            return Err(WatchError::Config("no domains configured".to_string()));
        }

        let mut seen = HashSet::new();
        for entry in &mut self.domains {
            entry.domain = normalize_domain(&entry.domain)?;
            if !seen.insert(entry.domain.clone()) {
                return Err(WatchError::Config(format!(
                    "domain '{}' is configured more than once",
                    entry.domain
                )));
            }
        }

        let names = [
            &self.fields.expiry,
            &self.fields.status,
            &self.fields.nameservers,
            &self.fields.dnssec,
            &self.fields.registrar,
        ];
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(WatchError::Config("field names must not be empty".to_string()));
        }
        Ok(())
    }

    /// Looks up a configured domain, normalizing `name` first.
    pub fn domain(&self, name: &str) -> Option<&ConfigDomain> {
        let name = normalize_domain(name).ok()?;
        self.domains.iter().find(|d| d.domain == name)
    }
}
