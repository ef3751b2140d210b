//! Distinguished names.
//!
//! A [`Dn`] keeps two views of the same name: the RDNs as the client wrote
//! them (whitespace around separators removed) and a normalized form used
//! for every comparison. Normalization lowercases attribute types and
//! values and strips the blanks around `=`, which is sufficient for the
//! case-insensitive string syntaxes naming contexts are made of.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::protocol::error::{AsyncMetaError, Result};

/// A parsed distinguished name, ordered leaf first.
///
/// The empty DN (the root DSE) has no RDNs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dn {
    rdns: Vec<String>,
    normalized: Vec<String>,
}

impl Dn {
    /// Parses a string DN.
    ///
    /// Commas escaped with a backslash do not split RDNs. Every RDN must
    /// contain an `=` separating a non-empty attribute type from its value.
    ///
    /// # Example
    ///
    /// ```
    /// use asyncmeta_common::Dn;
    ///
    /// let dn = Dn::parse("CN=Jane Doe , ou=People,dc=example,dc=com").unwrap();
    /// assert_eq!(dn.depth(), 4);
    /// assert_eq!(dn.as_str(), "CN=Jane Doe,ou=People,dc=example,dc=com");
    /// assert_eq!(dn, Dn::parse("cn=jane doe,ou=people,dc=example,dc=com").unwrap());
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Dn::root());
        }

        let mut rdns = Vec::new();
        for component in split_unescaped(trimmed) {
            let component = component.trim();
            let Some((attr, value)) = component.split_once('=') else {
                return Err(AsyncMetaError::InvalidDn(format!(
                    "RDN '{}' in '{}' has no '='",
                    component, input
                )));
            };
            let attr = attr.trim();
            if attr.is_empty() {
                return Err(AsyncMetaError::InvalidDn(format!(
                    "RDN '{}' in '{}' has an empty attribute type",
                    component, input
                )));
            }
            rdns.push(format!("{}={}", attr, value.trim()));
        }

        Ok(Dn::from_rdns(rdns))
    }

    /// The empty DN.
    pub fn root() -> Self {
        Dn {
            rdns: Vec::new(),
            normalized: Vec::new(),
        }
    }

    fn from_rdns(rdns: Vec<String>) -> Self {
        let normalized = rdns.iter().map(|rdn| rdn.to_lowercase()).collect();
        Dn { rdns, normalized }
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Number of RDNs.
    pub fn depth(&self) -> usize {
        self.rdns.len()
    }

    /// Leftmost RDN as written.
    pub fn rdn(&self) -> Option<&str> {
        self.rdns.first().map(String::as_str)
    }

    /// The DN with its leftmost RDN removed; `None` for the root.
    pub fn parent(&self) -> Option<Dn> {
        if self.is_root() {
            return None;
        }
        Some(Dn::from_rdns(self.rdns[1..].to_vec()))
    }

    /// Returns true if `self` equals `ancestor` or lies beneath it.
    pub fn is_within(&self, ancestor: &Dn) -> bool {
        self.levels_below(ancestor).is_some()
    }

    /// Number of RDNs between `self` and `ancestor`, or `None` when
    /// `ancestor` is not a suffix of `self`.
    pub fn levels_below(&self, ancestor: &Dn) -> Option<usize> {
        let depth = self.depth();
        let ancestor_depth = ancestor.depth();
        if ancestor_depth > depth {
            return None;
        }
        let offset = depth - ancestor_depth;
        if self.normalized[offset..] == ancestor.normalized[..] {
            Some(offset)
        } else {
            None
        }
    }

    /// Replaces the `old` suffix with `new`.
    ///
    /// Returns `None` if `self` is not within `old`.
    ///
    /// # Example
    ///
    /// ```
    /// use asyncmeta_common::Dn;
    ///
    /// let dn = Dn::parse("uid=a,ou=people,dc=virtual").unwrap();
    /// let old = Dn::parse("dc=virtual").unwrap();
    /// let new = Dn::parse("o=remote,c=us").unwrap();
    /// let moved = dn.with_suffix_replaced(&old, &new).unwrap();
    /// assert_eq!(moved.as_str(), "uid=a,ou=people,o=remote,c=us");
    /// ```
    pub fn with_suffix_replaced(&self, old: &Dn, new: &Dn) -> Option<Dn> {
        let keep = self.levels_below(old)?;
        let mut rdns = self.rdns[..keep].to_vec();
        rdns.extend(new.rdns.iter().cloned());
        Some(Dn::from_rdns(rdns))
    }

    /// The DN as written, with RDNs joined by `,`.
    pub fn as_str(&self) -> String {
        self.rdns.join(",")
    }

    /// The normalized form used for comparisons.
    pub fn normalized(&self) -> String {
        self.normalized.join(",")
    }
}

fn split_unescaped(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' | ';' if !escaped => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => escaped = false,
        }
    }
    parts.push(&input[start..]);
    parts
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl fmt::Debug for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dn({:?})", self.as_str())
    }
}

impl TryFrom<String> for Dn {
    type Error = AsyncMetaError;

    fn try_from(value: String) -> Result<Self> {
        Dn::parse(&value)
    }
}

impl From<Dn> for String {
    fn from(dn: Dn) -> Self {
        dn.as_str()
    }
}

impl std::str::FromStr for Dn {
    type Err = AsyncMetaError;

    fn from_str(s: &str) -> Result<Self> {
        Dn::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    #[test]
    fn test_parse_and_normalize() {
        let parsed = dn(" uid = JDoe , OU=People,dc=Example,dc=com ");
        assert_eq!(parsed.as_str(), "uid=JDoe,OU=People,dc=Example,dc=com");
        assert_eq!(parsed.normalized(), "uid=jdoe,ou=people,dc=example,dc=com");
        assert_eq!(parsed.rdn(), Some("uid=JDoe"));
    }

    #[test]
    fn test_escaped_comma_stays_in_rdn() {
        let parsed = dn("cn=Doe\\, Jane,dc=example");
        assert_eq!(parsed.depth(), 2);
        assert_eq!(parsed.rdn(), Some("cn=Doe\\, Jane"));
    }

    #[test]
    fn test_invalid_rdn_rejected() {
        assert!(matches!(
            Dn::parse("people,dc=example"),
            Err(AsyncMetaError::InvalidDn(_))
        ));
        assert!(Dn::parse("=x,dc=example").is_err());
    }

    #[test]
    fn test_root() {
        let root = dn("");
        assert!(root.is_root());
        assert!(root.parent().is_none());
        assert!(dn("dc=com").is_within(&root));
    }

    #[test]
    fn test_levels_below() {
        let suffix = dn("dc=example,dc=com");
        assert_eq!(dn("dc=example,dc=com").levels_below(&suffix), Some(0));
        assert_eq!(dn("ou=a,dc=example,dc=com").levels_below(&suffix), Some(1));
        assert_eq!(dn("cn=x,ou=a,dc=example,dc=com").levels_below(&suffix), Some(2));
        assert_eq!(dn("dc=com").levels_below(&suffix), None);
        assert_eq!(dn("dc=other,dc=com").levels_below(&suffix), None);
    }

    #[test]
    fn test_parent() {
        let entry = dn("uid=a,ou=people,dc=example");
        let parent = entry.parent().unwrap();
        assert_eq!(parent, dn("ou=people,dc=example"));
        assert_eq!(parent.parent().unwrap(), dn("dc=example"));
    }

    #[test]
    fn test_suffix_replacement_outside_suffix() {
        let entry = dn("uid=a,dc=elsewhere");
        assert!(entry
            .with_suffix_replaced(&dn("dc=example"), &dn("o=remote"))
            .is_none());
    }

    #[test]
    fn test_serde_as_string() {
        let entry = dn("uid=a,dc=example");
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, "\"uid=a,dc=example\"");
        let back: Dn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
