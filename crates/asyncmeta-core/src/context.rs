//! Per-operation fan-out state.

use asyncmeta_common::{
    ClientRequest, Dn, LdapResult, OperationId, OperationKind, ResultCode, Scope, SearchEntry,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::candidates::{Candidacy, CandidateDescriptor};
use crate::sink::SearchSink;
use crate::state::{Correlation, SlotState};

static CONTEXT_KEY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Why an operation's deadline is what it is; decides the result code
/// reported when it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineCause {
    ClientTimeLimit,
    TargetTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub at: Instant,
    pub cause: DeadlineCause,
}

impl Deadline {
    /// The result returned to the client when the deadline passes.
    pub fn expired_result(&self) -> LdapResult {
        match self.cause {
            DeadlineCause::ClientTimeLimit => LdapResult::new(ResultCode::TimeLimitExceeded),
            DeadlineCause::TargetTimeout => {
                LdapResult::new(ResultCode::AdminLimitExceeded).with_text("Operation timed out")
            }
        }
    }
}

/// One target's share of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSlot {
    pub target: usize,
    /// Base sent to the target, already rewritten.
    pub base: Dn,
    pub scope: Scope,
    pub state: SlotState,
    /// The target's answer, or the local error that ended the slot.
    pub result: Option<LdapResult>,
    pub retries: u32,
    pub entries: u64,
}

/// Outcome of recording a target's final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The slot no longer expects this response; nothing changed.
    Stale,
    Recorded { remaining: usize },
}

/// Outcome of streaming one search entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Forwarded,
    Stale,
    /// The client's size limit is reached; the entry was not forwarded.
    SizeLimitExceeded,
}

struct Slots {
    slots: Vec<CandidateSlot>,
    /// Slots not in a terminal state.
    active: usize,
    entries: u64,
}

impl Slots {
    /// Moves a slot to `next`, keeping `active` in step. Terminal slots
    /// never change.
    fn set(&mut self, index: usize, next: SlotState) -> bool {
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        if slot.state.is_terminal() {
            return false;
        }
        slot.state = next;
        if next.is_terminal() {
            self.active -= 1;
        }
        true
    }

    fn sent_as(&self, index: usize, correlation: Correlation) -> bool {
        self.slots
            .get(index)
            .and_then(|slot| slot.state.correlation())
            == Some(correlation)
    }
}

/// Everything one client operation shares between the tasks that work on
/// it.
///
/// Slots are only changed through the methods here, which hold the
/// context's lock for the duration of the change and never across network
/// I/O. Teardown is claimed with a single atomic flag; whichever caller
/// wins abandons what is still outstanding and delivers the client result.
pub struct OperationContext {
    key: u64,
    request: ClientRequest,
    deadline: Option<Deadline>,
    /// Session group used on every target.
    group: usize,
    slots: Mutex<Slots>,
    torn_down: AtomicBool,
    reply: Mutex<Option<oneshot::Sender<LdapResult>>>,
    sink: Option<Arc<dyn SearchSink>>,
}

impl OperationContext {
    /// Creates a context with one slot per candidate. Candidates start in
    /// [`SlotState::NeedBind`], since no session has been acquired for
    /// them yet; failed candidates start terminal.
    ///
    /// Returns the context and the receiver of the client's result.
    pub fn new(
        request: ClientRequest,
        candidates: Vec<CandidateDescriptor>,
        deadline: Option<Deadline>,
        sink: Option<Arc<dyn SearchSink>>,
        group: usize,
    ) -> (Arc<Self>, oneshot::Receiver<LdapResult>) {
        let slots: Vec<CandidateSlot> = candidates
            .into_iter()
            .map(|candidate| {
                let (base, scope, state, result) = match candidate.candidacy {
                    Candidacy::Candidate { base, scope } => {
                        (base, scope, SlotState::NeedBind, None)
                    }
                    Candidacy::Failed(result) => (
                        request.target_dn().clone(),
                        request.scope(),
                        SlotState::Err(result.code),
                        Some(result),
                    ),
                };
                CandidateSlot {
                    target: candidate.target,
                    base,
                    scope,
                    state,
                    result,
                    retries: 0,
                    entries: 0,
                }
            })
            .collect();
        let active = slots.iter().filter(|s| !s.state.is_terminal()).count();

        let (tx, rx) = oneshot::channel();
        let context = Arc::new(Self {
            key: CONTEXT_KEY_COUNTER.fetch_add(1, Ordering::Relaxed),
            request,
            deadline,
            group,
            slots: Mutex::new(Slots {
                slots,
                active,
                entries: 0,
            }),
            torn_down: AtomicBool::new(false),
            reply: Mutex::new(Some(tx)),
            sink,
        });
        (context, rx)
    }

    /// Identifies this context among all operations, including ones that
    /// reuse a client message ID.
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn id(&self) -> OperationId {
        self.request.id()
    }

    pub fn kind(&self) -> OperationKind {
        self.request.kind()
    }

    pub fn request(&self) -> &ClientRequest {
        &self.request
    }

    pub fn deadline(&self) -> Option<Deadline> {
        self.deadline
    }

    pub fn group(&self) -> usize {
        self.group
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// The client stopped waiting for the result.
    pub fn is_orphaned(&self) -> bool {
        lock(&self.reply)
            .as_ref()
            .map(|tx| tx.is_closed())
            .unwrap_or(false)
    }

    pub fn active(&self) -> usize {
        lock(&self.slots).active
    }

    pub fn entries(&self) -> u64 {
        lock(&self.slots).entries
    }

    pub fn state(&self, slot: usize) -> Option<SlotState> {
        lock(&self.slots).slots.get(slot).map(|s| s.state)
    }

    pub fn target_of(&self, slot: usize) -> Option<usize> {
        lock(&self.slots).slots.get(slot).map(|s| s.target)
    }

    /// Effective base and scope for a slot's target.
    pub fn plan(&self, slot: usize) -> Option<(Dn, Scope)> {
        lock(&self.slots)
            .slots
            .get(slot)
            .map(|s| (s.base.clone(), s.scope))
    }

    /// Copies of every slot, in candidate order.
    pub fn snapshot(&self) -> Vec<CandidateSlot> {
        lock(&self.slots).slots.clone()
    }

    /// Indexes of slots that still have to be driven.
    pub fn pending_slots(&self) -> Vec<usize> {
        lock(&self.slots)
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.state.is_terminal())
            .map(|(i, _)| i)
            .collect()
    }

    /// Records that a slot is waiting for a session. Has no effect once the
    /// slot moved past waiting, which happens when the session became ready
    /// before the caller got here.
    pub fn mark_waiting(&self, slot: usize, state: SlotState) -> bool {
        let mut slots = lock(&self.slots);
        match slots.slots.get(slot) {
            Some(current) if current.state.is_waiting() => slots.set(slot, state),
            _ => false,
        }
    }

    /// Marks a waiting slot as bound and about to send. Returns false if the
    /// slot is not waiting, so a slot is never started twice.
    pub fn ready(&self, slot: usize) -> bool {
        let mut slots = lock(&self.slots);
        match slots.slots.get(slot) {
            Some(current) if current.state.is_waiting() => slots.set(slot, SlotState::Candidate),
            _ => false,
        }
    }

    /// Moves a non-terminal slot to `state`.
    pub fn transition(&self, slot: usize, state: SlotState) -> bool {
        lock(&self.slots).set(slot, state)
    }

    /// Records the correlation of a request just sent. Returns false when
    /// the slot ended in the meantime; the request is then unwanted.
    pub fn attach(&self, slot: usize, correlation: Correlation) -> bool {
        lock(&self.slots).set(slot, SlotState::Sent(correlation))
    }

    /// Records a target's final result for the request sent as
    /// `correlation`.
    pub fn complete(&self, slot: usize, correlation: Correlation, result: LdapResult) -> Completion {
        let mut slots = lock(&self.slots);
        if !slots.sent_as(slot, correlation) {
            return Completion::Stale;
        }
        let next = if result.is_success() {
            SlotState::Done
        } else {
            SlotState::Err(result.code)
        };
        slots.set(slot, next);
        slots.slots[slot].result = Some(result);
        Completion::Recorded {
            remaining: slots.active,
        }
    }

    /// Ends a slot with a local or transport error. Returns the number of
    /// slots still active, or `None` if the slot had already ended.
    pub fn fail(&self, slot: usize, result: LdapResult) -> Option<usize> {
        let mut slots = lock(&self.slots);
        if !slots.set(slot, SlotState::Err(result.code)) {
            return None;
        }
        slots.slots[slot].result = Some(result);
        Some(slots.active)
    }

    /// Ends a slot whose request `correlation` can no longer be answered.
    pub fn fail_sent(
        &self,
        slot: usize,
        correlation: Correlation,
        result: LdapResult,
    ) -> Option<usize> {
        let mut slots = lock(&self.slots);
        if !slots.sent_as(slot, correlation) {
            return None;
        }
        slots.set(slot, SlotState::Err(result.code));
        slots.slots[slot].result = Some(result);
        Some(slots.active)
    }

    /// Ends a slot that does not apply after all.
    pub fn exclude(&self, slot: usize) -> Option<usize> {
        let mut slots = lock(&self.slots);
        slots
            .set(slot, SlotState::NotCandidate)
            .then_some(slots.active)
    }

    /// Takes one resend from the slot's budget.
    pub fn consume_retry(&self, slot: usize, max_retries: u32) -> bool {
        let mut slots = lock(&self.slots);
        match slots.slots.get_mut(slot) {
            Some(s) if !s.state.is_terminal() && s.retries < max_retries => {
                s.retries += 1;
                true
            }
            _ => false,
        }
    }

    /// Streams a search entry to the client if the slot still expects
    /// responses for `correlation`.
    ///
    /// The entry is handed to the sink with the lock held, so nothing is
    /// streamed once teardown started.
    pub fn forward_entry(
        &self,
        slot: usize,
        correlation: Correlation,
        entry: SearchEntry,
    ) -> Delivery {
        let mut slots = lock(&self.slots);
        if !slots.sent_as(slot, correlation) {
            return Delivery::Stale;
        }
        let size_limit = match &self.request {
            ClientRequest::Search(search) => u64::from(search.size_limit),
            _ => 0,
        };
        if size_limit > 0 && slots.entries >= size_limit {
            return Delivery::SizeLimitExceeded;
        }
        slots.entries += 1;
        slots.slots[slot].entries += 1;
        if let Some(sink) = &self.sink {
            sink.entry(entry);
        }
        Delivery::Forwarded
    }

    pub fn forward_reference(&self, slot: usize, correlation: Correlation, urls: Vec<String>) -> bool {
        let slots = lock(&self.slots);
        if !slots.sent_as(slot, correlation) {
            return false;
        }
        if let Some(sink) = &self.sink {
            sink.reference(urls);
        }
        true
    }

    /// Claims teardown. Only the first caller gets `Some`: the requests
    /// still outstanding, as `(target, correlation)` pairs, which the caller
    /// must abandon. Every remaining slot is ended.
    pub fn try_teardown(&self) -> Option<Vec<(usize, Correlation)>> {
        if self
            .torn_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let mut slots = lock(&self.slots);
        let mut outstanding = Vec::new();
        for index in 0..slots.slots.len() {
            let state = slots.slots[index].state;
            if state.is_terminal() {
                continue;
            }
            if let Some(correlation) = state.correlation() {
                outstanding.push((slots.slots[index].target, correlation));
            }
            slots.set(index, SlotState::Abandoned);
        }
        Some(outstanding)
    }

    /// Sends the client its result. Returns false if the client stopped
    /// waiting or a result was already delivered.
    pub fn deliver(&self, result: LdapResult) -> bool {
        match lock(&self.reply).take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
