//! Candidate selection.
//!
//! A target is a candidate for a request when its suffix and the request
//! DN are related in a way the request scope can reach. The DN sent to the
//! target is narrowed to the target's suffix when the request starts above
//! it, so the target is never asked for entries it does not hold.

use asyncmeta_common::{
    Dn, DnRewriter, LdapResult, ResultCode, RewriteContext, RewriteDirection, RewriteError, Scope,
    SuffixScope, TargetDescriptor,
};

use crate::registry::TargetRegistry;

/// How a selected target takes part in an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidacy {
    /// Send the request with this base (already rewritten for the target)
    /// and scope.
    Candidate { base: Dn, scope: Scope },
    /// The target is eligible but the request cannot be sent to it; the
    /// result is reported if no other candidate answers.
    Failed(LdapResult),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateDescriptor {
    pub target: usize,
    pub candidacy: Candidacy,
}

impl CandidateDescriptor {
    pub fn is_failed(&self) -> bool {
        matches!(self.candidacy, Candidacy::Failed(_))
    }
}

/// Selects the targets a request must be sent to, in registry order.
///
/// `filter` is the search filter in string form. Non-search operations pass
/// an empty filter: target filter patterns are then not consulted and the
/// DN is rewritten as an entry DN rather than a search base.
///
/// Targets unrelated to `dn` are left out. A target whose DN rewrite is
/// refused is returned as [`Candidacy::Failed`] with `UnwillingToPerform`.
///
/// # Example
///
/// ```
/// use asyncmeta_common::{Dn, Scope, SuffixMassage, TargetConfig};
/// use asyncmeta_core::{select_candidates, Candidacy, TargetRegistry};
///
/// let registry = TargetRegistry::from_configs(
///     vec![
///         TargetConfig::new("people", "ldap://a", "ou=people,dc=x"),
///         TargetConfig::new("groups", "ldap://b", "ou=groups,dc=x"),
///     ],
///     None,
/// )
/// .unwrap();
///
/// let dn = Dn::parse("uid=bob,ou=people,dc=x").unwrap();
/// let candidates = select_candidates(&registry, &dn, Scope::Base, "", &SuffixMassage);
/// assert_eq!(candidates.len(), 1);
/// assert_eq!(candidates[0].target, 0);
/// assert!(matches!(candidates[0].candidacy, Candidacy::Candidate { .. }));
/// ```
pub fn select_candidates(
    registry: &TargetRegistry,
    dn: &Dn,
    scope: Scope,
    filter: &str,
    rewriter: &dyn DnRewriter,
) -> Vec<CandidateDescriptor> {
    let context = if filter.is_empty() {
        RewriteContext::EntryDn
    } else {
        RewriteContext::SearchBase
    };

    registry
        .targets()
        .iter()
        .filter_map(|target| {
            let (base, effective_scope) = narrow(target, dn, scope)?;
            if !filter.is_empty() && !target.accepts_filter(filter) {
                return None;
            }
            let candidacy = match rewriter.rewrite(&base, RewriteDirection::ToTarget, context, target)
            {
                Ok(rewritten) => Candidacy::Candidate {
                    base: rewritten,
                    scope: effective_scope,
                },
                Err(RewriteError::OutOfScope) => return None,
                Err(RewriteError::Unwilling) => Candidacy::Failed(
                    LdapResult::new(ResultCode::UnwillingToPerform)
                        .with_text("Operation not allowed"),
                ),
            };
            Some(CandidateDescriptor {
                target: target.index,
                candidacy,
            })
        })
        .collect()
}

/// Effective base and scope of a request on one target, or `None` when
/// the target cannot hold anything the request reaches.
fn narrow(target: &TargetDescriptor, dn: &Dn, scope: Scope) -> Option<(Dn, Scope)> {
    let suffix = &target.suffix;
    let subordinate_only = target.scope == SuffixScope::Subordinate;

    if let Some(depth) = dn.levels_below(suffix) {
        if depth > 0 || !subordinate_only {
            return Some((dn.clone(), scope));
        }
        // The suffix entry itself lives elsewhere.
        return match scope {
            Scope::Base => None,
            Scope::Subtree => Some((dn.clone(), Scope::Subordinate)),
            Scope::OneLevel | Scope::Subordinate => Some((dn.clone(), scope)),
        };
    }

    let distance = suffix.levels_below(dn)?;
    match scope {
        Scope::Base => None,
        Scope::OneLevel if distance == 1 && !subordinate_only => {
            Some((suffix.clone(), Scope::Base))
        }
        Scope::OneLevel => None,
        Scope::Subordinate if distance > 1 => None,
        Scope::Subtree | Scope::Subordinate if subordinate_only => {
            Some((suffix.clone(), Scope::Subordinate))
        }
        Scope::Subtree | Scope::Subordinate => Some((suffix.clone(), Scope::Subtree)),
    }
}
