//! The configured targets of one dispatcher.

use asyncmeta_common::protocol::error::{AsyncMetaError, Result};
use asyncmeta_common::{Dn, TargetConfig, TargetDescriptor};
use std::collections::HashSet;
use std::sync::Arc;

/// Validated, immutable target list shared by every operation.
///
/// Targets are identified by their position; candidate selection visits
/// them in this order.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: Vec<Arc<TargetDescriptor>>,
    primary: Option<usize>,
    naming_context: Dn,
}

impl TargetRegistry {
    /// Validates target configurations.
    ///
    /// # Arguments
    ///
    /// * `configs` - Targets in selection order
    /// * `primary` - Index of the target whose answer decides writes under
    ///   [`crate::WritePolicy::Primary`]
    ///
    /// # Errors
    ///
    /// [`AsyncMetaError::InvalidConfig`] when there are no targets, a name is
    /// used twice, the primary index is out of range, or a target fails its
    /// own validation.
    pub fn from_configs(configs: Vec<TargetConfig>, primary: Option<usize>) -> Result<Self> {
        if configs.is_empty() {
            return Err(AsyncMetaError::InvalidConfig("no targets configured".into()));
        }
        if let Some(index) = primary {
            if index >= configs.len() {
                return Err(AsyncMetaError::InvalidConfig(format!(
                    "primary target {} out of range ({} targets)",
                    index,
                    configs.len()
                )));
            }
        }

        let mut names = HashSet::new();
        let mut targets = Vec::with_capacity(configs.len());
        for (index, config) in configs.into_iter().enumerate() {
            if !names.insert(config.name.clone()) {
                return Err(AsyncMetaError::InvalidConfig(format!(
                    "duplicate target name {}",
                    config.name
                )));
            }
            targets.push(Arc::new(TargetDescriptor::from_config(index, config)?));
        }

        let naming_context = common_suffix(&targets);
        Ok(Self {
            targets,
            primary,
            naming_context,
        })
    }

    /// Overrides the naming context reported as matched DN when no target
    /// holds a requested entry.
    pub fn with_naming_context(mut self, naming_context: Dn) -> Self {
        self.naming_context = naming_context;
        self
    }

    pub fn targets(&self) -> &[Arc<TargetDescriptor>] {
        &self.targets
    }

    pub fn get(&self, index: usize) -> Option<&Arc<TargetDescriptor>> {
        self.targets.get(index)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn primary(&self) -> Option<usize> {
        self.primary
    }

    pub fn naming_context(&self) -> &Dn {
        &self.naming_context
    }
}

/// Deepest DN every target suffix lies within.
fn common_suffix(targets: &[Arc<TargetDescriptor>]) -> Dn {
    let Some(first) = targets.first() else {
        return Dn::root();
    };
    let mut candidate = first.suffix.clone();
    while !targets.iter().all(|t| t.suffix.is_within(&candidate)) {
        match candidate.parent() {
            Some(parent) => candidate = parent,
            None => return Dn::root(),
        }
    }
    candidate
}
