//! Attribute and objectClass mapping between the virtual schema and a
//! target's schema.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::rewrite::RewriteDirection;
use crate::target::TargetDescriptor;

lazy_static! {
    /// The attribute description of a filter item: `(` then the name, then
    /// the first character of the match operator. Extensible matches
    /// without an attribute (`(:dn:...)`) and `&`, `|`, `!` do not match.
    static ref FILTER_ATTRIBUTE: Regex =
        Regex::new(r"\(([A-Za-z0-9][A-Za-z0-9;.\-_]*)[=~<>:]").expect("filter attribute pattern");
}

/// Result of translating a search filter for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterMapping {
    Mapped(String),
    /// The filter references something the target cannot evaluate; the
    /// target is skipped for this search.
    NotCandidate,
}

pub trait SchemaMapper: Send + Sync {
    /// Maps an attribute type; `None` drops the attribute.
    fn map_attribute(
        &self,
        name: &str,
        direction: RewriteDirection,
        target: &TargetDescriptor,
    ) -> Option<String>;

    /// Maps an objectClass value; `None` drops the value.
    fn map_object_class(
        &self,
        value: &str,
        _direction: RewriteDirection,
        _target: &TargetDescriptor,
    ) -> Option<String> {
        Some(value.to_string())
    }

    fn map_filter(&self, filter: &str, target: &TargetDescriptor) -> FilterMapping;
}

/// Passes names and filters through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapping;

impl SchemaMapper for IdentityMapping {
    fn map_attribute(
        &self,
        name: &str,
        _direction: RewriteDirection,
        _target: &TargetDescriptor,
    ) -> Option<String> {
        Some(name.to_string())
    }

    fn map_filter(&self, filter: &str, _target: &TargetDescriptor) -> FilterMapping {
        FilterMapping::Mapped(filter.to_string())
    }
}

/// A rename table applied to every target.
///
/// Names are matched case-insensitively. Dropped attributes never reach a
/// target, and a search filter that mentions one makes the target a
/// non-candidate.
///
/// # Example
///
/// ```
/// use asyncmeta_common::{AttributeRenames, FilterMapping, SchemaMapper, TargetConfig, TargetDescriptor};
///
/// let target = TargetDescriptor::from_config(0, TargetConfig::new("t", "ldap://t", "dc=x")).unwrap();
/// let renames = AttributeRenames::new().rename("mail", "rfc822Mailbox");
///
/// assert_eq!(
///     renames.map_filter("(&(mail=a@x)(cn=a))", &target),
///     FilterMapping::Mapped("(&(rfc822Mailbox=a@x)(cn=a))".to_string())
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct AttributeRenames {
    to_target: HashMap<String, Option<String>>,
    from_target: HashMap<String, String>,
}

impl AttributeRenames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename(mut self, local: &str, remote: &str) -> Self {
        self.to_target
            .insert(local.to_lowercase(), Some(remote.to_string()));
        self.from_target
            .insert(remote.to_lowercase(), local.to_string());
        self
    }

    pub fn drop_attribute(mut self, local: &str) -> Self {
        self.to_target.insert(local.to_lowercase(), None);
        self
    }

    fn forward(&self, name: &str) -> Option<String> {
        match self.to_target.get(&name.to_lowercase()) {
            Some(mapped) => mapped.clone(),
            None => Some(name.to_string()),
        }
    }
}

impl SchemaMapper for AttributeRenames {
    fn map_attribute(
        &self,
        name: &str,
        direction: RewriteDirection,
        _target: &TargetDescriptor,
    ) -> Option<String> {
        match direction {
            RewriteDirection::ToTarget => self.forward(name),
            RewriteDirection::FromTarget => Some(
                self.from_target
                    .get(&name.to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| name.to_string()),
            ),
        }
    }

    fn map_filter(&self, filter: &str, _target: &TargetDescriptor) -> FilterMapping {
        let mut out = String::with_capacity(filter.len());
        let mut copied = 0;

        for captures in FILTER_ATTRIBUTE.captures_iter(filter) {
            let Some(name) = captures.get(1) else {
                continue;
            };
            let Some(mapped) = self.forward(name.as_str()) else {
                return FilterMapping::NotCandidate;
            };
            out.push_str(&filter[copied..name.start()]);
            out.push_str(&mapped);
            copied = name.end();
        }
        out.push_str(&filter[copied..]);

        FilterMapping::Mapped(out)
    }
}
