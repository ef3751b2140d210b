//! DN rewriting between the virtual and the target naming contexts.

use thiserror::Error;

use crate::dn::Dn;
use crate::target::TargetDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteDirection {
    /// Client DN to target DN.
    ToTarget,
    /// Target DN back to client DN.
    FromTarget,
}

/// Where the DN being rewritten occurs. Rewriters may apply different
/// rules per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteContext {
    SearchBase,
    EntryDn,
    AttributeValue,
    NewSuperior,
    MatchedDn,
    Referral,
    SearchResultDn,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    /// The rewriter refuses the DN; the operation fails with
    /// `UnwillingToPerform` for this target.
    #[error("rewrite refused")]
    Unwilling,
    /// The DN has no image on the target; the target is skipped.
    #[error("DN is outside the target's naming context")]
    OutOfScope,
}

pub trait DnRewriter: Send + Sync {
    fn rewrite(
        &self,
        dn: &Dn,
        direction: RewriteDirection,
        context: RewriteContext,
        target: &TargetDescriptor,
    ) -> Result<Dn, RewriteError>;
}

/// Suffix massage: swaps the virtual suffix for the target's
/// `massage_to` naming context and back.
///
/// DNs outside the source naming context are returned unchanged, except
/// for search bases and entry DNs sent to a target, which are out of scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixMassage;

impl DnRewriter for SuffixMassage {
    fn rewrite(
        &self,
        dn: &Dn,
        direction: RewriteDirection,
        context: RewriteContext,
        target: &TargetDescriptor,
    ) -> Result<Dn, RewriteError> {
        let Some(remote) = &target.massage_to else {
            return Ok(dn.clone());
        };
        let (from, to) = match direction {
            RewriteDirection::ToTarget => (&target.suffix, remote),
            RewriteDirection::FromTarget => (remote, &target.suffix),
        };
        match dn.with_suffix_replaced(from, to) {
            Some(rewritten) => Ok(rewritten),
            None => match (direction, context) {
                (RewriteDirection::ToTarget, RewriteContext::SearchBase)
                | (RewriteDirection::ToTarget, RewriteContext::EntryDn) => {
                    Err(RewriteError::OutOfScope)
                }
                _ => Ok(dn.clone()),
            },
        }
    }
}
