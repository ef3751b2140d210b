//! Merging per-target outcomes into the client's result.

use asyncmeta_common::{Dn, LdapResult, OperationKind, ResultCode};

use crate::config::{OnError, WritePolicy};
use crate::context::CandidateSlot;
use crate::state::SlotState;

/// The configuration that decides how outcomes combine.
#[derive(Debug, Clone, Copy)]
pub struct Policy<'a> {
    pub on_error: OnError,
    pub write_policy: WritePolicy,
    pub primary: Option<usize>,
    pub naming_context: &'a Dn,
}

/// Returns the client result once the outcomes so far decide it, or
/// `None` while an answer is still needed from an active candidate.
///
/// `entries` is the number of search entries already streamed.
pub fn decide(
    kind: OperationKind,
    slots: &[CandidateSlot],
    entries: u64,
    policy: &Policy<'_>,
) -> Option<LdapResult> {
    let active = slots.iter().filter(|s| !s.state.is_terminal()).count();

    if policy.on_error == OnError::Stop {
        if let Some(failure) = first_failure(slots) {
            return Some(failure);
        }
    }

    match kind {
        OperationKind::Search => (active == 0).then(|| final_search(slots, entries, policy)),
        OperationKind::Compare => first_answer(slots, active, policy),
        OperationKind::Add | OperationKind::Delete | OperationKind::ModRdn => {
            match policy.write_policy {
                WritePolicy::FirstSuccess => first_answer(slots, active, policy),
                WritePolicy::AllMustSucceed => (active == 0).then(|| all_succeeded(slots, policy)),
                WritePolicy::Primary => {
                    let primary = policy
                        .primary
                        .and_then(|p| slots.iter().find(|s| s.target == p))
                        .filter(|s| !matches!(s.state, SlotState::NotCandidate | SlotState::Abandoned));
                    match primary {
                        Some(slot) if slot.state.is_terminal() => Some(slot_result(slot)),
                        Some(_) => None,
                        None => first_answer(slots, active, policy),
                    }
                }
            }
        }
    }
}

/// The first success, or the combined failure once nobody is left.
fn first_answer(slots: &[CandidateSlot], active: usize, policy: &Policy<'_>) -> Option<LdapResult> {
    if let Some(done) = slots.iter().find(|s| s.state == SlotState::Done) {
        return Some(slot_result(done));
    }
    (active == 0).then(|| no_success(slots, policy))
}

fn all_succeeded(slots: &[CandidateSlot], policy: &Policy<'_>) -> LdapResult {
    if let Some(failed) = slots.iter().find(|s| matches!(s.state, SlotState::Err(_))) {
        return slot_result(failed);
    }
    match slots.iter().find(|s| s.state == SlotState::Done) {
        Some(done) => slot_result(done),
        None => no_such_object(slots, policy),
    }
}

fn final_search(slots: &[CandidateSlot], entries: u64, policy: &Policy<'_>) -> LdapResult {
    let answered = entries > 0 || slots.iter().any(|s| s.state == SlotState::Done);
    if !answered {
        return no_success(slots, policy);
    }
    if policy.on_error == OnError::Report {
        if let Some(failure) = first_failure(slots) {
            return failure;
        }
    }
    LdapResult::success()
}

/// Nothing succeeded: the first real error, or `NoSuchObject`.
fn no_success(slots: &[CandidateSlot], policy: &Policy<'_>) -> LdapResult {
    first_failure(slots).unwrap_or_else(|| no_such_object(slots, policy))
}

/// First candidate error other than `NoSuchObject`.
fn first_failure(slots: &[CandidateSlot]) -> Option<LdapResult> {
    slots
        .iter()
        .find(|s| matches!(s.state, SlotState::Err(code) if code != ResultCode::NoSuchObject))
        .map(slot_result)
}

/// `NoSuchObject` with the longest matched DN any target reported, or the
/// naming context.
fn no_such_object(slots: &[CandidateSlot], policy: &Policy<'_>) -> LdapResult {
    let matched = slots
        .iter()
        .filter_map(|s| s.result.as_ref()?.matched_dn.as_ref())
        .max_by_key(|dn| dn.depth())
        .cloned()
        .unwrap_or_else(|| policy.naming_context.clone());
    LdapResult::new(ResultCode::NoSuchObject).with_matched(matched)
}

fn slot_result(slot: &CandidateSlot) -> LdapResult {
    match (&slot.result, slot.state) {
        (Some(result), _) => result.clone(),
        (None, SlotState::Done) => LdapResult::success(),
        (None, SlotState::Err(code)) => LdapResult::new(code),
        (None, _) => LdapResult::new(ResultCode::Other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asyncmeta_common::Scope;
    use pretty_assertions::assert_eq;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn slot(target: usize, state: SlotState) -> CandidateSlot {
        let result = match state {
            SlotState::Done => Some(LdapResult::success()),
            SlotState::Err(code) => Some(LdapResult::new(code)),
            _ => None,
        };
        CandidateSlot {
            target,
            base: dn("dc=x"),
            scope: Scope::Base,
            state,
            result,
            retries: 0,
            entries: 0,
        }
    }

    fn policy(naming_context: &Dn) -> Policy<'_> {
        Policy {
            on_error: OnError::Continue,
            write_policy: WritePolicy::FirstSuccess,
            primary: None,
            naming_context,
        }
    }

    fn code(result: Option<LdapResult>) -> Option<ResultCode> {
        result.map(|r| r.code)
    }

    #[test]
    fn test_first_success_answers_early() {
        let nc = dn("dc=x");
        let slots = vec![slot(0, SlotState::Connecting), slot(1, SlotState::Done)];
        assert_eq!(
            code(decide(OperationKind::Add, &slots, 0, &policy(&nc))),
            Some(ResultCode::Success)
        );
    }

    #[test]
    fn test_first_success_waits_for_everyone_on_failure() {
        let nc = dn("dc=x");
        let mut slots = vec![
            slot(0, SlotState::Err(ResultCode::EntryAlreadyExists)),
            slot(1, SlotState::Connecting),
        ];
        assert_eq!(decide(OperationKind::Add, &slots, 0, &policy(&nc)), None);
        slots[1] = slot(1, SlotState::Err(ResultCode::Unavailable));
        assert_eq!(
            code(decide(OperationKind::Add, &slots, 0, &policy(&nc))),
            Some(ResultCode::EntryAlreadyExists)
        );
    }

    #[test]
    fn test_all_must_succeed() {
        let nc = dn("dc=x");
        let p = Policy {
            write_policy: WritePolicy::AllMustSucceed,
            ..policy(&nc)
        };
        let mut slots = vec![slot(0, SlotState::Done), slot(1, SlotState::Connecting)];
        assert_eq!(decide(OperationKind::Delete, &slots, 0, &p), None);
        slots[1] = slot(1, SlotState::Err(ResultCode::InsufficientAccessRights));
        assert_eq!(
            code(decide(OperationKind::Delete, &slots, 0, &p)),
            Some(ResultCode::InsufficientAccessRights)
        );
    }

    #[test]
    fn test_primary_decides() {
        let nc = dn("dc=x");
        let p = Policy {
            write_policy: WritePolicy::Primary,
            primary: Some(1),
            ..policy(&nc)
        };
        let mut slots = vec![slot(0, SlotState::Done), slot(1, SlotState::Connecting)];
        assert_eq!(decide(OperationKind::ModRdn, &slots, 0, &p), None);
        slots[1] = slot(1, SlotState::Err(ResultCode::UnwillingToPerform));
        assert_eq!(
            code(decide(OperationKind::ModRdn, &slots, 0, &p)),
            Some(ResultCode::UnwillingToPerform)
        );

        // Primary not involved: first success wins.
        let p = Policy {
            primary: Some(5),
            ..p
        };
        assert_eq!(
            code(decide(OperationKind::ModRdn, &slots, 0, &p)),
            Some(ResultCode::Success)
        );
    }

    #[test]
    fn test_compare_ignores_missing_entries() {
        let nc = dn("dc=x");
        let mut compare_true = slot(1, SlotState::Done);
        compare_true.result = Some(LdapResult::new(ResultCode::CompareTrue));
        let slots = vec![slot(0, SlotState::Err(ResultCode::NoSuchObject)), compare_true];
        assert_eq!(
            code(decide(OperationKind::Compare, &slots, 0, &policy(&nc))),
            Some(ResultCode::CompareTrue)
        );
    }

    #[test]
    fn test_search_succeeds_despite_failed_candidate() {
        let nc = dn("dc=x");
        let slots = vec![
            slot(0, SlotState::Err(ResultCode::Unavailable)),
            slot(1, SlotState::Done),
        ];
        assert_eq!(
            code(decide(OperationKind::Search, &slots, 100, &policy(&nc))),
            Some(ResultCode::Success)
        );

        let report = Policy {
            on_error: OnError::Report,
            ..policy(&nc)
        };
        assert_eq!(
            code(decide(OperationKind::Search, &slots, 100, &report)),
            Some(ResultCode::Unavailable)
        );
    }

    #[test]
    fn test_search_waits_for_active_candidates() {
        let nc = dn("dc=x");
        let slots = vec![slot(0, SlotState::Done), slot(1, SlotState::Binding)];
        assert_eq!(decide(OperationKind::Search, &slots, 3, &policy(&nc)), None);
    }

    #[test]
    fn test_stop_answers_with_first_error() {
        let nc = dn("dc=x");
        let stop = Policy {
            on_error: OnError::Stop,
            ..policy(&nc)
        };
        let slots = vec![
            slot(0, SlotState::Err(ResultCode::NoSuchObject)),
            slot(1, SlotState::Connecting),
        ];
        assert_eq!(decide(OperationKind::Search, &slots, 0, &stop), None);

        let slots = vec![
            slot(0, SlotState::Connecting),
            slot(1, SlotState::Err(ResultCode::Busy)),
        ];
        assert_eq!(
            code(decide(OperationKind::Search, &slots, 0, &stop)),
            Some(ResultCode::Busy)
        );
    }

    #[test]
    fn test_no_such_object_uses_longest_matched() {
        let nc = dn("dc=x");
        let mut a = slot(0, SlotState::Err(ResultCode::NoSuchObject));
        a.result = Some(LdapResult::new(ResultCode::NoSuchObject).with_matched(dn("dc=x")));
        let mut b = slot(1, SlotState::Err(ResultCode::NoSuchObject));
        b.result =
            Some(LdapResult::new(ResultCode::NoSuchObject).with_matched(dn("ou=people,dc=x")));

        let result = decide(OperationKind::Search, &[a, b], 0, &policy(&nc)).unwrap();
        assert_eq!(result.code, ResultCode::NoSuchObject);
        assert_eq!(result.matched_dn, Some(dn("ou=people,dc=x")));

        let slots = vec![slot(0, SlotState::NotCandidate)];
        let result = decide(OperationKind::Delete, &slots, 0, &policy(&nc)).unwrap();
        assert_eq!(result.code, ResultCode::NoSuchObject);
        assert_eq!(result.matched_dn, Some(nc.clone()));
    }
}
