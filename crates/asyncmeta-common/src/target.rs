//! Target configuration.
//!
//! A [`TargetConfig`] is the deserializable description of one remote
//! server; [`TargetDescriptor::from_config`] validates it into the
//! immutable form shared by the dispatcher and the session pool.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::dn::Dn;
use crate::protocol::error::{AsyncMetaError, Result};
use crate::protocol::requests::OperationKind;

/// How much of its suffix a target serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuffixScope {
    /// The suffix entry and everything beneath it.
    #[default]
    Subtree,
    /// Only the entries beneath the suffix; the suffix entry itself is
    /// served elsewhere.
    Subordinate,
}

/// Per-operation timeouts in milliseconds; 0 disables the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationTimeouts {
    pub add_ms: u64,
    pub delete_ms: u64,
    pub modrdn_ms: u64,
    pub compare_ms: u64,
    pub search_ms: u64,
}

impl OperationTimeouts {
    /// Sets every operation to the same timeout.
    pub fn uniform(timeout_ms: u64) -> Self {
        OperationTimeouts {
            add_ms: timeout_ms,
            delete_ms: timeout_ms,
            modrdn_ms: timeout_ms,
            compare_ms: timeout_ms,
            search_ms: timeout_ms,
        }
    }

    pub fn for_kind(&self, kind: OperationKind) -> Option<Duration> {
        let ms = match kind {
            OperationKind::Add => self.add_ms,
            OperationKind::Delete => self.delete_ms,
            OperationKind::ModRdn => self.modrdn_ms,
            OperationKind::Compare => self.compare_ms,
            OperationKind::Search => self.search_ms,
        };
        (ms > 0).then(|| Duration::from_millis(ms))
    }
}

/// Identity the dispatcher binds as on a target session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum BindPolicy {
    #[default]
    Anonymous,
    Simple {
        dn: String,
        password: String,
    },
}

impl BindPolicy {
    /// Resolves the policy into the credentials actually sent.
    ///
    /// A DN without a password binds anonymously; a password without a DN
    /// is a configuration error.
    pub fn credentials(&self) -> Result<Option<(Dn, String)>> {
        match self {
            BindPolicy::Anonymous => Ok(None),
            BindPolicy::Simple { dn, password } => {
                let dn = Dn::parse(dn)?;
                match (dn.is_root(), password.is_empty()) {
                    (_, true) => Ok(None),
                    (true, false) => Err(AsyncMetaError::InvalidConfig(
                        "bind password configured without a bind DN".to_string(),
                    )),
                    (false, false) => Ok(Some((dn, password.clone()))),
                }
            }
        }
    }
}

/// Quarantine of repeatedly unreachable targets.
///
/// After `failure_threshold` consecutive connect failures the target is
/// quarantined; the quarantine lasts `base_interval_ms` and grows by
/// `backoff_multiplier` on every failed trial connect, up to `max_interval_ms`.
/// A threshold of 0 disables quarantine.
///
/// A target that lets more than `max_timeout_ops` consecutive operations
/// time out without answering anything is quarantined too. 0 turns the
/// timeout count off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    pub failure_threshold: u32,
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
    pub max_timeout_ops: u32,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_interval_ms: 30_000,
            max_interval_ms: 300_000,
            backoff_multiplier: 2.0,
            max_timeout_ops: 0,
        }
    }
}

impl QuarantineConfig {
    pub fn disabled() -> Self {
        Self {
            failure_threshold: 0,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.failure_threshold > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub uri: String,
    /// Virtual naming context served by this target.
    pub suffix: String,
    /// Naming context on the target the virtual suffix maps to.
    #[serde(default)]
    pub massage_to: Option<String>,
    #[serde(default)]
    pub scope: SuffixScope,
    /// Search filters must match at least one of these patterns when any
    /// are configured.
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub timeouts: OperationTimeouts,
    #[serde(default)]
    pub bind: BindPolicy,
    /// Forward the client's identity with the proxied authorization
    /// control.
    #[serde(default)]
    pub identity_assertion: bool,
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, uri: impl Into<String>, suffix: impl Into<String>) -> Self {
        TargetConfig {
            name: name.into(),
            uri: uri.into(),
            suffix: suffix.into(),
            massage_to: None,
            scope: SuffixScope::Subtree,
            filters: Vec::new(),
            timeouts: OperationTimeouts::default(),
            bind: BindPolicy::Anonymous,
            identity_assertion: false,
        }
    }
}

/// A validated, immutable target.
#[derive(Debug, Clone)]
pub struct TargetDescriptor {
    pub index: usize,
    pub name: String,
    pub uri: String,
    pub suffix: Dn,
    pub massage_to: Option<Dn>,
    pub scope: SuffixScope,
    pub filters: Vec<Regex>,
    pub timeouts: OperationTimeouts,
    pub bind: BindPolicy,
    pub identity_assertion: bool,
}

impl TargetDescriptor {
    /// Validates a configuration entry.
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the target in its registry
    /// * `config` - The raw configuration
    ///
    /// # Errors
    ///
    /// Returns [`AsyncMetaError::InvalidConfig`] for an empty name or URI,
    /// an unparsable suffix, an invalid filter pattern or an inconsistent
    /// bind policy.
    pub fn from_config(index: usize, config: TargetConfig) -> Result<Self> {
        if config.name.trim().is_empty() {
            return Err(AsyncMetaError::InvalidConfig(format!(
                "target #{} has no name",
                index
            )));
        }
        if config.uri.trim().is_empty() {
            return Err(AsyncMetaError::InvalidConfig(format!(
                "target '{}' has no uri",
                config.name
            )));
        }

        let suffix = Dn::parse(&config.suffix).map_err(|e| {
            AsyncMetaError::InvalidConfig(format!("target '{}': suffix: {}", config.name, e))
        })?;
        let massage_to = config
            .massage_to
            .as_deref()
            .map(Dn::parse)
            .transpose()
            .map_err(|e| {
                AsyncMetaError::InvalidConfig(format!(
                    "target '{}': massage_to: {}",
                    config.name, e
                ))
            })?;
        let filters = config
            .filters
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        config.bind.credentials().map_err(|e| {
            AsyncMetaError::InvalidConfig(format!("target '{}': {}", config.name, e))
        })?;

        Ok(TargetDescriptor {
            index,
            name: config.name,
            uri: config.uri,
            suffix,
            massage_to,
            scope: config.scope,
            filters,
            timeouts: config.timeouts,
            bind: config.bind,
            identity_assertion: config.identity_assertion,
        })
    }

    /// Whether a search filter passes the configured filter patterns.
    pub fn accepts_filter(&self, filter: &str) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|re| re.is_match(filter))
    }

    /// The naming context of this target as seen on the target itself.
    pub fn remote_suffix(&self) -> &Dn {
        self.massage_to.as_ref().unwrap_or(&self.suffix)
    }
}
