use asyncmeta_common::protocol::error::{AsyncMetaError, Result};
use asyncmeta_common::{
    Connection, Connector, LdapResult, MessageId, OutboundMessage, OutboundRequest,
    QuarantineConfig, RemoteSession, ResponseBody, ResponseMessage, SessionId, TargetDescriptor,
};
use asyncmeta_metrics::{MetricsRegistry, TargetCounters};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::quarantine::{Quarantine, QuarantineState};

/// Session pool configuration.
///
/// # Fields
///
/// - `quarantine`: when to stop using a failing target
/// - `idle_timeout_ms`: bound sessions with no outstanding request are
///   closed after this long; 0 keeps them open
/// - `sessions_per_target`: independent sessions per target; 0 counts as 1
///
/// # Example
///
/// ```rust
/// use asyncmeta_client::PoolConfig;
/// use asyncmeta_common::QuarantineConfig;
///
/// let config = PoolConfig {
///     quarantine: QuarantineConfig::disabled(),
///     idle_timeout_ms: 60_000,
///     sessions_per_target: 4,
/// };
/// ```
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    pub quarantine: QuarantineConfig,
    pub idle_timeout_ms: u64,
    pub sessions_per_target: usize,
}

/// What the pool currently holds for a target, ordered from least to most
/// established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStatus {
    Absent,
    Connecting,
    Binding,
    Bound,
}

/// How a queued acquisition was resolved.
#[derive(Debug, Clone)]
pub enum BindOutcome {
    /// The session is ready; acquire again to use it.
    Bound,
    /// The target refused the bind, or the failure is not transient.
    Rejected(AsyncMetaError),
    /// Connect failed or the connection dropped before the bind finished.
    ServerDown(AsyncMetaError),
}

/// Receiver of everything the pool's session listeners observe.
///
/// Implementations are called from listener and connect tasks without any
/// pool lock held.
pub trait SessionEvents<W>: Send + Sync + 'static {
    /// A message that is not the reply to the session's own bind.
    fn on_response(&self, target: usize, session: SessionId, message: ResponseMessage);

    /// The session's response stream ended.
    fn on_session_lost(&self, target: usize, session: SessionId);

    /// Resolves the waiters queued while a session was being established.
    fn on_bind_outcome(&self, target: usize, waiters: Vec<W>, outcome: BindOutcome);
}

/// An established session shared by every operation routed to its target.
pub struct LiveSession<S> {
    id: SessionId,
    target: usize,
    group: usize,
    session: S,
    gate: Mutex<()>,
    last_used: Mutex<Instant>,
}

impl<S: RemoteSession> LiveSession<S> {
    fn new(target: usize, group: usize, session: S) -> Self {
        Self {
            id: SessionId::next(),
            target,
            group,
            session,
            gate: Mutex::new(()),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Which of the target's sessions this is.
    pub fn group(&self) -> usize {
        self.group
    }

    /// Sends a request and runs `on_sent` with its message ID before any
    /// response to that ID can be delivered by the session's listener.
    pub fn send_with<F>(&self, message: OutboundMessage, on_sent: F) -> Result<MessageId>
    where
        F: FnOnce(MessageId),
    {
        let _gate = lock(&self.gate);
        let msgid = self.session.send(message)?;
        self.touch();
        on_sent(msgid);
        Ok(msgid)
    }

    pub fn abandon(&self, msgid: MessageId) -> Result<()> {
        self.session.abandon(msgid)
    }

    fn close(&self) {
        self.session.close();
    }

    /// Waits for any `send_with` in progress.
    fn barrier(&self) {
        drop(lock(&self.gate));
    }

    fn touch(&self) {
        *lock(&self.last_used) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*lock(&self.last_used))
    }
}

/// Result of [`SessionPool::acquire`].
pub enum Acquire<S> {
    Ready(Arc<LiveSession<S>>),
    /// The waiter was queued and will be passed to
    /// [`SessionEvents::on_bind_outcome`].
    Queued,
    Rejected(AsyncMetaError),
}

enum SlotState<S, W> {
    Absent,
    Connecting {
        waiters: Vec<W>,
    },
    Binding {
        session: Arc<LiveSession<S>>,
        msgid: MessageId,
        waiters: Vec<W>,
    },
    Bound {
        session: Arc<LiveSession<S>>,
    },
}

impl<S, W> SlotState<S, W> {
    fn session(&self) -> Option<&Arc<LiveSession<S>>> {
        match self {
            SlotState::Binding { session, .. } | SlotState::Bound { session } => Some(session),
            SlotState::Absent | SlotState::Connecting { .. } => None,
        }
    }

    fn into_waiters(self) -> Vec<W> {
        match self {
            SlotState::Connecting { waiters } | SlotState::Binding { waiters, .. } => waiters,
            SlotState::Absent | SlotState::Bound { .. } => Vec::new(),
        }
    }
}

struct TargetSlot<S, W> {
    descriptor: Arc<TargetDescriptor>,
    /// One state per session group.
    groups: Vec<Mutex<SlotState<S, W>>>,
    quarantine: Mutex<Quarantine>,
    counters: Arc<TargetCounters>,
}

impl<S, W> TargetSlot<S, W> {
    fn group(&self, group: usize) -> &Mutex<SlotState<S, W>> {
        &self.groups[group % self.groups.len()]
    }
}

/// A fixed number of sessions per target, established on demand.
///
/// Sessions are organised in groups: group `g` holds one session to every
/// target. An operation picks a group with [`SessionPool::next_group`] and
/// uses that group's session on each of its targets, so operations are
/// spread over the groups in turn.
///
/// Acquiring a group that has no session to a target starts a connect
/// (and a bind, when the target is configured with credentials) in a
/// background task. Every caller that arrives while the session is being
/// established is queued on it, so a group never connects to a target
/// twice concurrently. Once the session is bound the queued waiters are
/// handed back through [`SessionEvents::on_bind_outcome`].
///
/// # Lock Order
///
/// A group's state lock is taken before the target's quarantine lock. No
/// pool lock is held while calling into [`SessionEvents`].
pub struct SessionPool<C: Connector, W> {
    inner: Arc<PoolInner<C, W>>,
}

struct PoolInner<C: Connector, W> {
    connector: C,
    slots: Vec<TargetSlot<C::Session, W>>,
    events: Weak<dyn SessionEvents<W>>,
    config: PoolConfig,
    next_group: AtomicUsize,
}

impl<C: Connector, W> Clone for SessionPool<C, W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, W> SessionPool<C, W>
where
    C: Connector,
    W: Send + 'static,
{
    /// Creates a pool with `sessions_per_target` empty groups.
    ///
    /// # Arguments
    ///
    /// * `connector` - Opens sessions
    /// * `targets` - Targets, indexed by their position
    /// * `events` - Receiver of responses and bind outcomes
    /// * `config` - Quarantine, idle and group settings
    /// * `metrics` - Registry holding the per-target counters
    pub fn new(
        connector: C,
        targets: &[Arc<TargetDescriptor>],
        events: Weak<dyn SessionEvents<W>>,
        config: PoolConfig,
        metrics: &MetricsRegistry,
    ) -> Self {
        let groups = config.sessions_per_target.max(1);
        let slots = targets
            .iter()
            .map(|descriptor| TargetSlot {
                descriptor: Arc::clone(descriptor),
                groups: (0..groups).map(|_| Mutex::new(SlotState::Absent)).collect(),
                quarantine: Mutex::new(Quarantine::new()),
                counters: metrics.target(&descriptor.name),
            })
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                connector,
                slots,
                events,
                config,
                next_group: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of session groups.
    pub fn groups(&self) -> usize {
        self.inner.config.sessions_per_target.max(1)
    }

    /// The group the next operation should use, in turn.
    pub fn next_group(&self) -> usize {
        self.inner.next_group.fetch_add(1, Ordering::Relaxed) % self.groups()
    }

    /// The most established session any group holds for a target.
    pub fn status(&self, target: usize) -> SessionStatus {
        (0..self.groups())
            .map(|group| self.group_status(target, group))
            .max()
            .unwrap_or(SessionStatus::Absent)
    }

    pub fn group_status(&self, target: usize, group: usize) -> SessionStatus {
        match self.inner.slots.get(target) {
            Some(slot) => match &*lock(slot.group(group)) {
                SlotState::Absent => SessionStatus::Absent,
                SlotState::Connecting { .. } => SessionStatus::Connecting,
                SlotState::Binding { .. } => SessionStatus::Binding,
                SlotState::Bound { .. } => SessionStatus::Bound,
            },
            None => SessionStatus::Absent,
        }
    }

    /// Returns the bound session of a target in `group`, or queues `waiter`
    /// until one is available. A quarantined target is rejected even when
    /// a session is open.
    ///
    /// Must be called within a Tokio runtime: establishing a session
    /// spawns a task.
    pub fn acquire(&self, target: usize, group: usize, waiter: W) -> Acquire<C::Session> {
        let Some(slot) = self.inner.slots.get(target) else {
            return Acquire::Rejected(AsyncMetaError::UnknownTarget(target));
        };
        let group = group % slot.groups.len();

        {
            let mut state = lock(slot.group(group));
            if !lock(&slot.quarantine).admit(&self.inner.config.quarantine, Instant::now()) {
                tracing::debug!(target = %slot.descriptor.name, "target quarantined");
                return Acquire::Rejected(AsyncMetaError::Quarantined(slot.descriptor.name.clone()));
            }
            match &mut *state {
                SlotState::Bound { session } => return Acquire::Ready(Arc::clone(session)),
                SlotState::Connecting { waiters } | SlotState::Binding { waiters, .. } => {
                    waiters.push(waiter);
                    return Acquire::Queued;
                }
                SlotState::Absent => {}
            }
            *state = SlotState::Connecting {
                waiters: vec![waiter],
            };
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let descriptor = Arc::clone(&inner.slots[target].descriptor);
            tracing::debug!(target = %descriptor.name, uri = %descriptor.uri, group, "connecting");
            let connected = inner.connector.connect(&descriptor).await;
            inner.establish(target, group, connected);
        });
        Acquire::Queued
    }

    /// Counts an operation that timed out with a request outstanding on
    /// `target`. Returns true when the target is quarantined afterwards.
    pub fn record_timeout(&self, target: usize) -> bool {
        let Some(slot) = self.inner.slots.get(target) else {
            return false;
        };
        let mut quarantine = lock(&slot.quarantine);
        let was_quarantined = quarantine.state() == QuarantineState::Quarantined;
        let quarantined = quarantine.record_timeout(&self.inner.config.quarantine, Instant::now());
        if quarantined && !was_quarantined {
            slot.counters.record_quarantine();
            tracing::warn!(
                target = %slot.descriptor.name,
                timeout_ops = quarantine.timeout_ops(),
                "target quarantined after repeated timeouts"
            );
        }
        quarantined
    }

    /// Drops the session of a target if it is still `session`.
    ///
    /// Used after a send failed on the session; the next acquire connects
    /// afresh.
    pub fn invalidate(&self, target: usize, session: SessionId) {
        let Some(slot) = self.inner.slots.get(target) else {
            return;
        };
        let previous = slot.groups.iter().find_map(|group| {
            let mut state = lock(group);
            (state.session().map(|s| s.id()) == Some(session))
                .then(|| std::mem::replace(&mut *state, SlotState::Absent))
        });
        let Some(previous) = previous else {
            return;
        };
        if let Some(live) = previous.session() {
            tracing::debug!(target = %slot.descriptor.name, session = %session, "invalidating session");
            live.close();
        }
        self.inner.notify(
            target,
            previous.into_waiters(),
            BindOutcome::ServerDown(AsyncMetaError::ServerDown("session invalidated".into())),
        );
    }

    /// Closes bound sessions idle for longer than the configured timeout.
    ///
    /// `in_use` reports whether a session still has outstanding requests;
    /// such sessions are kept. Returns the number of sessions closed.
    pub fn sweep_idle<F>(&self, now: Instant, in_use: F) -> usize
    where
        F: Fn(usize, SessionId) -> bool,
    {
        if self.inner.config.idle_timeout_ms == 0 {
            return 0;
        }
        let idle_timeout = Duration::from_millis(self.inner.config.idle_timeout_ms);

        let mut closed = 0;
        for (target, slot) in self.inner.slots.iter().enumerate() {
            for group in &slot.groups {
                let idle = match &*lock(group) {
                    SlotState::Bound { session } if session.idle_for(now) >= idle_timeout => {
                        Some(session.id())
                    }
                    _ => None,
                };
                let Some(session) = idle else { continue };
                if in_use(target, session) {
                    continue;
                }

                let mut state = lock(group);
                if state.session().map(|s| s.id()) == Some(session) {
                    if let SlotState::Bound { session: live } =
                        std::mem::replace(&mut *state, SlotState::Absent)
                    {
                        tracing::debug!(target = %slot.descriptor.name, session = %session, "closing idle session");
                        live.close();
                        closed += 1;
                    }
                }
            }
        }
        closed
    }

    /// Closes every session.
    pub fn close_all(&self) {
        for (target, slot) in self.inner.slots.iter().enumerate() {
            for group in &slot.groups {
                let previous = std::mem::replace(&mut *lock(group), SlotState::Absent);
                if let Some(live) = previous.session() {
                    live.close();
                }
                self.inner.notify(
                    target,
                    previous.into_waiters(),
                    BindOutcome::Rejected(AsyncMetaError::ServerDown("pool shut down".into())),
                );
            }
        }
    }
}

impl<C, W> PoolInner<C, W>
where
    C: Connector,
    W: Send + 'static,
{
    fn establish(
        self: &Arc<Self>,
        target: usize,
        group: usize,
        connected: Result<Connection<C::Session>>,
    ) {
        let slot = &self.slots[target];
        let connection = match connected {
            Ok(connection) => connection,
            Err(err) => {
                slot.counters.record_connect_failure();
                tracing::warn!(target = %slot.descriptor.name, error = %err, "connect failed");
                let waiters = {
                    let mut state = lock(slot.group(group));
                    if lock(&slot.quarantine).record_failure(&self.config.quarantine, Instant::now()) {
                        slot.counters.record_quarantine();
                        tracing::warn!(target = %slot.descriptor.name, "target quarantined");
                    }
                    std::mem::replace(&mut *state, SlotState::Absent).into_waiters()
                };
                self.notify(target, waiters, classify(err));
                return;
            }
        };

        slot.counters.record_connect();
        let live = Arc::new(LiveSession::new(target, group, connection.session));
        tokio::spawn(listen(Arc::downgrade(self), Arc::clone(&live), connection.responses));

        let credentials = match slot.descriptor.bind.credentials() {
            Ok(credentials) => credentials,
            Err(err) => {
                let waiters = std::mem::replace(&mut *lock(slot.group(group)), SlotState::Absent).into_waiters();
                live.close();
                self.notify(target, waiters, BindOutcome::Rejected(err));
                return;
            }
        };

        let mut state = lock(slot.group(group));
        let waiters = std::mem::replace(&mut *state, SlotState::Absent).into_waiters();
        let Some((dn, password)) = credentials else {
            lock(&slot.quarantine).record_success(Instant::now());
            tracing::debug!(target = %slot.descriptor.name, session = %live.id(), "session ready (anonymous)");
            *state = SlotState::Bound { session: live };
            drop(state);
            self.notify(target, waiters, BindOutcome::Bound);
            return;
        };

        // The state lock stays held across the send so the listener cannot
        // see the bind reply before the slot records its message ID.
        match live.session.send(OutboundMessage::new(OutboundRequest::Bind { dn, password })) {
            Ok(msgid) => {
                slot.counters.record_bind();
                tracing::debug!(target = %slot.descriptor.name, session = %live.id(), msgid, "bind sent");
                *state = SlotState::Binding {
                    session: live,
                    msgid,
                    waiters,
                };
            }
            Err(err) => {
                drop(state);
                tracing::warn!(target = %slot.descriptor.name, error = %err, "bind send failed");
                live.close();
                self.notify(target, waiters, classify(err));
            }
        }
    }

    /// Consumes the reply to a pending bind. Returns false for any other
    /// message.
    fn complete_bind(&self, live: &LiveSession<C::Session>, message: &ResponseMessage) -> bool {
        let slot = &self.slots[live.target];
        let mut state = lock(slot.group(live.group));
        let is_bind_reply = matches!(
            &*state,
            SlotState::Binding { session, msgid, .. }
                if session.id() == live.id() && *msgid == message.msgid
        );
        if !is_bind_reply {
            return false;
        }

        let result = match &message.body {
            ResponseBody::Result(result) => result.clone(),
            _ => LdapResult::new(asyncmeta_common::ResultCode::ProtocolError)
                .with_text("unexpected message in reply to bind"),
        };
        let previous = std::mem::replace(&mut *state, SlotState::Absent);
        let SlotState::Binding { session, waiters, .. } = previous else {
            return false;
        };

        if result.is_success() {
            lock(&slot.quarantine).record_success(Instant::now());
            tracing::debug!(target = %slot.descriptor.name, session = %live.id(), "session bound");
            *state = SlotState::Bound { session };
            drop(state);
            self.notify(live.target, waiters, BindOutcome::Bound);
        } else {
            drop(state);
            tracing::warn!(
                target = %slot.descriptor.name,
                code = %result.code,
                "bind rejected by target"
            );
            session.close();
            let err = AsyncMetaError::BindRejected {
                code: result.code,
                text: result.text.unwrap_or_default(),
            };
            self.notify(live.target, waiters, BindOutcome::Rejected(err));
        }
        true
    }

    fn session_lost(&self, live: &LiveSession<C::Session>) {
        let slot = &self.slots[live.target];
        let waiters = {
            let mut state = lock(slot.group(live.group));
            if state.session().map(|s| s.id()) == Some(live.id()) {
                std::mem::replace(&mut *state, SlotState::Absent).into_waiters()
            } else {
                Vec::new()
            }
        };
        tracing::debug!(target = %slot.descriptor.name, session = %live.id(), "session lost");
        self.notify(
            live.target,
            waiters,
            BindOutcome::ServerDown(AsyncMetaError::ServerDown(
                "connection lost while binding".into(),
            )),
        );
        if let Some(events) = self.events.upgrade() {
            events.on_session_lost(live.target, live.id());
        }
    }

    fn record_response(&self, target: usize) {
        lock(&self.slots[target].quarantine).record_response(Instant::now());
    }

    fn notify(&self, target: usize, waiters: Vec<W>, outcome: BindOutcome) {
        if waiters.is_empty() {
            return;
        }
        if let Some(events) = self.events.upgrade() {
            events.on_bind_outcome(target, waiters, outcome);
        }
    }
}

async fn listen<C, W>(
    pool: Weak<PoolInner<C, W>>,
    live: Arc<LiveSession<C::Session>>,
    mut responses: mpsc::UnboundedReceiver<ResponseMessage>,
) where
    C: Connector,
    W: Send + 'static,
{
    while let Some(message) = responses.recv().await {
        let Some(inner) = pool.upgrade() else {
            return;
        };
        live.barrier();
        live.touch();
        inner.record_response(live.target);
        if inner.complete_bind(&live, &message) {
            continue;
        }
        let Some(events) = inner.events.upgrade() else {
            return;
        };
        events.on_response(live.target, live.id(), message);
    }

    if let Some(inner) = pool.upgrade() {
        live.barrier();
        inner.session_lost(&live);
    }
}

fn classify(err: AsyncMetaError) -> BindOutcome {
    if err.is_retryable() {
        BindOutcome::ServerDown(err)
    } else {
        BindOutcome::Rejected(err)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
