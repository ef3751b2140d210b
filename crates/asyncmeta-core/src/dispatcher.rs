use asyncmeta_client::{Acquire, LiveSession, SessionEvents, SessionPool, SessionStatus};
use asyncmeta_common::protocol::error::AsyncMetaError;
use asyncmeta_common::{
    AddRequest, ClientRequest, CompareRequest, Connector, DeleteRequest, LdapResult, ModRdnRequest,
    OperationId, ResultCode, SearchRequest, SessionId,
};
use asyncmeta_metrics::{MetricsRegistry, MetricsSnapshot, TargetCounters};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::admission::Admission;
use crate::aggregate::{self, Policy};
use crate::candidates::{select_candidates, Candidacy, CandidateDescriptor};
use crate::config::{DispatchConfig, OnError};
use crate::context::{Deadline, DeadlineCause, OperationContext};
use crate::ops::{self, Collaborators, Prepared};
use crate::reaper::Reaper;
use crate::registry::TargetRegistry;
use crate::router::{CorrelationKey, Route, Router};
use crate::sink::SearchSink;
use crate::state::{Correlation, SlotState};

/// A slot waiting for its target's session; resumed when the session is
/// bound or fails.
pub(crate) struct Continuation {
    pub(crate) ctx: Arc<OperationContext>,
    pub(crate) slot: usize,
}

/// Fans client operations out to the targets of a [`TargetRegistry`] and
/// merges their answers.
///
/// Each operation selects its candidate targets, obtains (or waits for) the
/// shared session of each, sends its request on every one of them, and
/// resolves once the responses decide the result. Search entries are
/// streamed to the caller's [`SearchSink`] as they arrive.
///
/// # Partial Failure
///
/// A candidate that fails never fails the operation by itself: what the
/// client sees is decided by [`OnError`] and [`crate::WritePolicy`]. A
/// request whose session went down before it could be sent is resent once
/// on a fresh session.
///
/// # Example
///
/// ```no_run
/// # async fn example<C: asyncmeta_common::Connector>(connector: C) -> asyncmeta_common::Result<()> {
/// use asyncmeta_common::{Dn, Scope, SearchRequest, TargetConfig};
/// use asyncmeta_core::{Collaborators, DispatchConfig, Dispatcher, SearchEvent, TargetRegistry};
/// use tokio::sync::mpsc;
///
/// let registry = TargetRegistry::from_configs(
///     vec![
///         TargetConfig::new("people", "ldap://people.example.com", "ou=people,dc=example,dc=com"),
///         TargetConfig::new("groups", "ldap://groups.example.com", "ou=groups,dc=example,dc=com"),
///     ],
///     None,
/// )?;
/// let dispatcher = Dispatcher::new(registry, connector, Collaborators::default(), DispatchConfig::default());
/// let _reaper = dispatcher.spawn_reaper();
///
/// let (tx, mut rx) = mpsc::unbounded_channel::<SearchEvent>();
/// let request = SearchRequest::new(1, Dn::parse("dc=example,dc=com")?, Scope::Subtree, "(uid=jdoe)");
/// let result = dispatcher.search(request, tx).await;
/// while let Ok(event) = rx.try_recv() {
///     println!("{:?}", event);
/// }
/// println!("{}", result.code);
/// # Ok(())
/// # }
/// ```
pub struct Dispatcher<C: Connector> {
    inner: Arc<DispatcherInner<C>>,
}

pub(crate) struct DispatcherInner<C: Connector> {
    pub(crate) registry: TargetRegistry,
    pub(crate) collaborators: Collaborators,
    pub(crate) config: DispatchConfig,
    pub(crate) pool: SessionPool<C, Continuation>,
    pub(crate) router: Router<C::Session>,
    pub(crate) admission: Admission,
    pub(crate) metrics: MetricsRegistry,
    pub(crate) counters: Vec<Arc<TargetCounters>>,
}

impl<C: Connector> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> Dispatcher<C> {
    /// Creates a dispatcher. No target is contacted until an operation
    /// needs it.
    ///
    /// # Arguments
    ///
    /// * `registry` - The targets
    /// * `connector` - Opens sessions to targets
    /// * `collaborators` - DN rewriting, schema mapping and controls
    /// * `config` - Admission, failure and session policies
    pub fn new(
        registry: TargetRegistry,
        connector: C,
        collaborators: Collaborators,
        config: DispatchConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<DispatcherInner<C>>| {
            let events: Weak<dyn SessionEvents<Continuation>> = weak.clone();
            let metrics = MetricsRegistry::new();
            let pool = SessionPool::new(
                connector,
                registry.targets(),
                events,
                config.pool_config(),
                &metrics,
            );
            let counters = registry
                .targets()
                .iter()
                .map(|target| metrics.target(&target.name))
                .collect();
            DispatcherInner {
                admission: Admission::new(config.max_pending_ops),
                router: Router::new(),
                registry,
                collaborators,
                config,
                pool,
                metrics,
                counters,
            }
        });
        Self { inner }
    }

    pub async fn add(&self, request: AddRequest) -> LdapResult {
        self.inner.execute(ClientRequest::Add(request), None).await
    }

    pub async fn delete(&self, request: DeleteRequest) -> LdapResult {
        self.inner.execute(ClientRequest::Delete(request), None).await
    }

    pub async fn modrdn(&self, request: ModRdnRequest) -> LdapResult {
        self.inner.execute(ClientRequest::ModRdn(request), None).await
    }

    pub async fn compare(&self, request: CompareRequest) -> LdapResult {
        self.inner.execute(ClientRequest::Compare(request), None).await
    }

    /// Runs a search, streaming entries and references into `sink`, and
    /// returns the final result once every candidate has answered.
    pub async fn search<K>(&self, request: SearchRequest, sink: K) -> LdapResult
    where
        K: SearchSink + 'static,
    {
        let sink: Arc<dyn SearchSink> = Arc::new(sink);
        self.inner
            .execute(ClientRequest::Search(request), Some(sink))
            .await
    }

    /// Abandons the pending operation with this client ID. Its caller
    /// receives `Canceled`. Returns false if no such operation is pending.
    pub fn abandon(&self, id: OperationId) -> bool {
        let Some(ctx) = self.inner.admission.find(id) else {
            return false;
        };
        let abandoned = self
            .inner
            .finish(&ctx, LdapResult::new(ResultCode::Canceled));
        if abandoned {
            tracing::info!(op_id = id, "operation abandoned by client");
        }
        abandoned
    }

    pub fn pending_operations(&self) -> usize {
        self.inner.admission.len()
    }

    /// Requests sent to targets and not yet answered, across all
    /// operations.
    pub fn requests_in_flight(&self) -> usize {
        self.inner.router.in_flight()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.inner.registry
    }

    pub fn session_status(&self, target: usize) -> SessionStatus {
        self.inner.pool.status(target)
    }

    /// Starts the background task that expires overdue and orphaned
    /// operations and closes idle sessions. The task ends when the
    /// dispatcher is dropped.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        Reaper::new(Arc::downgrade(&self.inner), self.inner.config.reaper_interval()).spawn()
    }

    /// Runs one reaper pass now. Returns the number of operations ended.
    pub fn reap(&self) -> usize {
        self.inner.reap(Instant::now())
    }

    /// Fails every pending operation with `Unavailable` and closes all
    /// sessions.
    pub fn shutdown(&self) {
        for ctx in self.inner.admission.snapshot() {
            self.inner.finish(
                &ctx,
                LdapResult::new(ResultCode::Unavailable).with_text("dispatcher shutting down"),
            );
        }
        self.inner.pool.close_all();
        tracing::info!("dispatcher shut down");
    }
}

impl<C: Connector> DispatcherInner<C> {
    async fn execute(
        &self,
        request: ClientRequest,
        sink: Option<Arc<dyn SearchSink>>,
    ) -> LdapResult {
        let started = std::time::Instant::now();
        let kind = request.kind();
        let result = self.dispatch(request, sink).await;
        self.metrics.record_operation(
            kind.as_str(),
            started.elapsed().as_micros() as u64,
            result.is_success(),
        );
        result
    }

    async fn dispatch(
        &self,
        request: ClientRequest,
        sink: Option<Arc<dyn SearchSink>>,
    ) -> LdapResult {
        let op_id = request.id();
        let candidates = select_candidates(
            &self.registry,
            request.target_dn(),
            request.scope(),
            request.filter().unwrap_or(""),
            self.collaborators.rewriter.as_ref(),
        );
        tracing::debug!(
            op_id,
            kind = %request.kind(),
            dn = %request.target_dn(),
            candidates = candidates.len(),
            "candidates selected"
        );

        if candidates.is_empty() {
            let naming_context = self.registry.naming_context();
            let mut result = LdapResult::new(ResultCode::NoSuchObject);
            if request.target_dn().is_within(naming_context) {
                result = result.with_matched(naming_context.clone());
            }
            return result;
        }

        if let ClientRequest::ModRdn(modrdn) = &request {
            if let Some(superior) = &modrdn.new_superior {
                let crosses = candidates
                    .iter()
                    .any(|c| !superior.is_within(&self.registry.targets()[c.target].suffix));
                if crosses {
                    tracing::debug!(op_id, new_superior = %superior, "rename crosses targets");
                    return LdapResult::from(&AsyncMetaError::CrossTargetRename);
                }
            }
        }

        let first_failure = candidates.iter().find_map(|c| match &c.candidacy {
            Candidacy::Failed(result) => Some(result.clone()),
            Candidacy::Candidate { .. } => None,
        });
        if let Some(failure) = first_failure {
            if self.config.on_error == OnError::Stop
                || candidates.iter().all(CandidateDescriptor::is_failed)
            {
                return failure;
            }
        }

        let deadline = self.deadline_for(&request, &candidates);
        let group = self.pool.next_group();
        let (ctx, mut reply) = OperationContext::new(request, candidates, deadline, sink, group);
        if let Err(err) = self.admission.admit(&ctx) {
            self.metrics.record_busy();
            tracing::warn!(
                op_id,
                max_pending_ops = self.config.max_pending_ops,
                "rejecting operation: {}",
                err
            );
            return LdapResult::from(&err);
        }
        self.metrics.record_admitted();

        for slot in ctx.pending_slots() {
            self.advance(&ctx, slot);
        }

        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline.at, &mut reply).await,
            None => Ok((&mut reply).await),
        };
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => LdapResult::new(ResultCode::Other).with_text("operation ended without a result"),
            Err(_elapsed) => {
                self.expire(&ctx);
                // Either our teardown or a concurrent one delivered a result.
                reply.await.unwrap_or_else(|_| {
                    deadline
                        .map(|d| d.expired_result())
                        .unwrap_or_else(|| LdapResult::new(ResultCode::Other))
                })
            }
        }
    }

    /// The earlier of the client's time limit and the longest timeout
    /// configured on the candidate targets.
    fn deadline_for(
        &self,
        request: &ClientRequest,
        candidates: &[CandidateDescriptor],
    ) -> Option<Deadline> {
        let client = match request {
            ClientRequest::Search(search) if search.time_limit > 0 => {
                Some(Duration::from_secs(u64::from(search.time_limit)))
            }
            _ => None,
        };
        let target = candidates
            .iter()
            .filter(|c| !c.is_failed())
            .filter_map(|c| self.registry.targets()[c.target].timeouts.for_kind(request.kind()))
            .max();

        let (after, cause) = match (client, target) {
            (Some(client), Some(target)) if target < client => {
                (target, DeadlineCause::TargetTimeout)
            }
            (Some(client), _) => (client, DeadlineCause::ClientTimeLimit),
            (None, Some(target)) => (target, DeadlineCause::TargetTimeout),
            (None, None) => return None,
        };
        Some(Deadline {
            at: Instant::now() + after,
            cause,
        })
    }

    /// Moves a slot towards sending: uses the operation's session to the
    /// target when it is bound, or queues the slot until it is.
    pub(crate) fn advance(&self, ctx: &Arc<OperationContext>, slot: usize) {
        if ctx.is_torn_down() {
            return;
        }
        let Some(target) = ctx.target_of(slot) else {
            return;
        };
        let waiter = Continuation {
            ctx: Arc::clone(ctx),
            slot,
        };
        match self.pool.acquire(target, ctx.group(), waiter) {
            Acquire::Ready(session) => self.start(ctx, slot, session),
            Acquire::Queued => {
                let waiting = match self.pool.group_status(target, ctx.group()) {
                    SessionStatus::Binding => SlotState::Binding,
                    _ => SlotState::Connecting,
                };
                ctx.mark_waiting(slot, waiting);
            }
            Acquire::Rejected(err) => self.fail_slot(ctx, slot, &err),
        }
    }

    /// Builds and sends the request for one slot on a bound session.
    fn start(&self, ctx: &Arc<OperationContext>, slot: usize, session: Arc<LiveSession<C::Session>>) {
        let Some((base, scope)) = ctx.plan(slot) else {
            return;
        };
        if !ctx.ready(slot) {
            return;
        }
        let target = &self.registry.targets()[session.target()];

        let message = match ops::prepare(ctx.request(), &base, scope, target, &self.collaborators) {
            Ok(Prepared::Send(message)) => message,
            Ok(Prepared::NotCandidate) => {
                tracing::debug!(op_id = ctx.id(), target = %target.name, "target excluded by schema mapping");
                if ctx.exclude(slot).is_some() {
                    self.evaluate(ctx);
                }
                return;
            }
            Err(err) => {
                self.fail_slot(ctx, slot, &err);
                return;
            }
        };

        let mut attached = false;
        let sent = session.send_with(message, |msgid| {
            let correlation = Correlation {
                session: session.id(),
                msgid,
            };
            let key = CorrelationKey::new(target.index, correlation);
            self.router.insert(
                key,
                Route {
                    ctx: Arc::clone(ctx),
                    slot,
                    session: Arc::clone(&session),
                },
            );
            attached = ctx.attach(slot, correlation);
            if !attached {
                self.router.remove(&key);
            }
        });

        match sent {
            Ok(msgid) => {
                self.counters[target.index].record_sent();
                if attached {
                    tracing::debug!(
                        op_id = ctx.id(),
                        target = %target.name,
                        session = %session.id(),
                        msgid,
                        "request sent"
                    );
                } else {
                    // The operation ended while the request was on its way.
                    let _ = session.abandon(msgid);
                    self.counters[target.index].record_abandon();
                }
            }
            Err(err) if err.is_retryable() => self.retry(ctx, slot, Some(session.id()), err),
            Err(err) => self.fail_slot(ctx, slot, &err),
        }
    }

    /// Restarts a slot on a fresh session after its target went down, once.
    pub(crate) fn retry(
        &self,
        ctx: &Arc<OperationContext>,
        slot: usize,
        session: Option<SessionId>,
        err: AsyncMetaError,
    ) {
        let Some(target) = ctx.target_of(slot) else {
            return;
        };
        if let Some(session) = session {
            self.pool.invalidate(target, session);
        }
        if !ctx.consume_retry(slot, self.config.max_send_retries) {
            self.fail_slot(ctx, slot, &err);
            return;
        }

        self.counters[target].record_retry();
        tracing::warn!(
            op_id = ctx.id(),
            target = %self.registry.targets()[target].name,
            error = %err,
            "target down, retrying on a fresh session"
        );
        if ctx.transition(slot, SlotState::NeedBind) {
            self.advance(ctx, slot);
        }
    }

    pub(crate) fn fail_slot(&self, ctx: &Arc<OperationContext>, slot: usize, err: &AsyncMetaError) {
        tracing::debug!(op_id = ctx.id(), slot, error = %err, "candidate failed");
        if ctx.fail(slot, LdapResult::from(err)).is_some() {
            self.evaluate(ctx);
        }
    }

    /// Answers the client if the slot outcomes so far decide the result.
    pub(crate) fn evaluate(&self, ctx: &Arc<OperationContext>) {
        if ctx.is_torn_down() {
            return;
        }
        let policy = Policy {
            on_error: self.config.on_error,
            write_policy: self.config.write_policy,
            primary: self.registry.primary(),
            naming_context: self.registry.naming_context(),
        };
        if let Some(result) = aggregate::decide(ctx.kind(), &ctx.snapshot(), ctx.entries(), &policy) {
            self.finish(ctx, result);
        }
    }

    /// Tears an operation down and delivers `result`. Only the first call
    /// per operation has any effect; returns whether this one did.
    pub(crate) fn finish(&self, ctx: &Arc<OperationContext>, result: LdapResult) -> bool {
        self.finish_with(ctx, |_| result)
    }

    /// Like [`finish`](Self::finish), with the result built from the
    /// requests that were still outstanding.
    fn finish_with<F>(&self, ctx: &Arc<OperationContext>, result: F) -> bool
    where
        F: FnOnce(&[(usize, Correlation)]) -> LdapResult,
    {
        let Some(outstanding) = ctx.try_teardown() else {
            return false;
        };
        let result = result(&outstanding);

        for (target, correlation) in outstanding {
            let Some(route) = self.router.remove(&CorrelationKey::new(target, correlation)) else {
                continue;
            };
            if let Err(err) = route.session.abandon(correlation.msgid) {
                tracing::debug!(
                    op_id = ctx.id(),
                    target = %self.registry.targets()[target].name,
                    msgid = correlation.msgid,
                    error = %err,
                    "abandon failed"
                );
            }
            self.counters[target].record_abandon();
        }

        if self.admission.release(ctx.key()) {
            self.metrics.record_released();
        }
        self.metrics.record_teardown();
        tracing::debug!(op_id = ctx.id(), code = %result.code, "operation finished");
        ctx.deliver(result);
        true
    }

    /// Ends an operation whose deadline passed. Every target that still
    /// owed an answer is charged a timeout; if that leaves one of them
    /// quarantined the client gets `unavailable` instead of the timeout.
    fn expire(&self, ctx: &Arc<OperationContext>) -> bool {
        let Some(deadline) = ctx.deadline() else {
            return false;
        };
        let finished = self.finish_with(ctx, |outstanding| {
            let mut result = deadline.expired_result();
            let mut quarantined = false;
            for (target, _) in outstanding {
                quarantined |= self.pool.record_timeout(*target);
            }
            if quarantined {
                result.code = ResultCode::Unavailable;
            }
            result
        });
        if !finished {
            return false;
        }
        self.metrics.record_timeout();
        tracing::info!(op_id = ctx.id(), kind = %ctx.kind(), "operation timed out");
        true
    }

    /// Ends overdue and orphaned operations and closes idle sessions.
    pub(crate) fn reap(&self, now: Instant) -> usize {
        let mut reaped = 0;
        for ctx in self.admission.snapshot() {
            let overdue = ctx.deadline().map(|d| d.at <= now).unwrap_or(false);
            if overdue {
                if self.expire(&ctx) {
                    reaped += 1;
                }
            } else if ctx.is_orphaned()
                && self.finish(&ctx, LdapResult::new(ResultCode::Canceled))
            {
                tracing::info!(op_id = ctx.id(), "caller went away, operation abandoned");
                reaped += 1;
            }
        }

        let closed = self
            .pool
            .sweep_idle(std::time::Instant::now(), |target, session| {
                self.router.has_routes(target, session)
            });
        if closed > 0 {
            tracing::debug!(closed, "closed idle sessions");
        }
        reaped
    }
}
