use asyncmeta_common::{MessageId, ResultCode, SessionId};
use std::fmt;

/// Where a request sent to one target can be found again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Correlation {
    pub session: SessionId,
    pub msgid: MessageId,
}

/// Progress of one target within one operation.
///
/// ```text
/// NeedBind -> Connecting -> Binding -> Candidate -> Sent -> Done
///                                                      -> Err
///                                  (server down, once) -> NeedBind
/// NeedBind -> Candidate when the session is already bound.
/// NotCandidate, Err and Abandoned end a slot without an answer.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Has no session yet: the operation just started, or the previous
    /// session went down.
    NeedBind,
    /// Waiting for the pool to connect to the target.
    Connecting,
    /// Waiting for a bind in progress on the target's session.
    Binding,
    /// Bound and about to send.
    Candidate,
    /// Request sent; responses carry this correlation.
    Sent(Correlation),
    /// The target answered.
    Done,
    /// The target turned out not to apply to the request.
    NotCandidate,
    Err(ResultCode),
    /// Torn down before the target answered.
    Abandoned,
}

impl SlotState {
    pub fn is_terminal(&self) -> bool {
        match self {
            SlotState::Done | SlotState::NotCandidate | SlotState::Err(_) | SlotState::Abandoned => {
                true
            }
            SlotState::NeedBind
            | SlotState::Connecting
            | SlotState::Binding
            | SlotState::Candidate
            | SlotState::Sent(_) => false,
        }
    }

    /// States a slot is in while no request has been sent.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            SlotState::NeedBind | SlotState::Connecting | SlotState::Binding
        )
    }

    pub fn correlation(&self) -> Option<Correlation> {
        match self {
            SlotState::Sent(correlation) => Some(*correlation),
            _ => None,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotState::NeedBind => f.write_str("need-bind"),
            SlotState::Connecting => f.write_str("connecting"),
            SlotState::Binding => f.write_str("binding"),
            SlotState::Candidate => f.write_str("candidate"),
            SlotState::Sent(c) => write!(f, "sent({}/{})", c.session, c.msgid),
            SlotState::Done => f.write_str("done"),
            SlotState::NotCandidate => f.write_str("not-candidate"),
            SlotState::Err(code) => write!(f, "err({})", code),
            SlotState::Abandoned => f.write_str("abandoned"),
        }
    }
}
