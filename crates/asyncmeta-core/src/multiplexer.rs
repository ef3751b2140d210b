//! Routing of target responses to the operations that are waiting for
//! them.

use asyncmeta_client::{BindOutcome, SessionEvents};
use asyncmeta_common::protocol::error::AsyncMetaError;
use asyncmeta_common::{
    Connector, LdapResult, OperationKind, ResponseBody, ResponseMessage, ResultCode, SessionId,
};

use crate::context::{Completion, Delivery};
use crate::dispatcher::{Continuation, DispatcherInner};
use crate::ops;
use crate::router::{CorrelationKey, Route};

impl<C: Connector> SessionEvents<Continuation> for DispatcherInner<C> {
    fn on_response(&self, target: usize, session: SessionId, message: ResponseMessage) {
        let key = CorrelationKey {
            target,
            session,
            msgid: message.msgid,
        };
        let counters = &self.counters[target];
        let descriptor = &self.registry.targets()[target];

        let Some(route) = self.router.get(&key) else {
            counters.record_stale();
            tracing::debug!(
                target = %descriptor.name,
                session = %session,
                msgid = message.msgid,
                "discarding response without a pending request"
            );
            return;
        };
        let correlation = key.correlation();

        let streamed = matches!(
            message.body,
            ResponseBody::Entry(_) | ResponseBody::Reference(_)
        );
        if streamed && route.ctx.kind() != OperationKind::Search {
            self.protocol_error(&key, &route, "search response to a non-search request");
            return;
        }

        match message.body {
            ResponseBody::Entry(entry) => {
                let Some(entry) = ops::restore_entry(entry, descriptor, &self.collaborators) else {
                    tracing::debug!(op_id = route.ctx.id(), target = %descriptor.name, "entry DN refused by rewriter");
                    return;
                };
                match route.ctx.forward_entry(route.slot, correlation, entry) {
                    Delivery::Forwarded => counters.record_entry(),
                    Delivery::Stale => counters.record_stale(),
                    Delivery::SizeLimitExceeded => {
                        tracing::debug!(op_id = route.ctx.id(), "size limit exceeded");
                        self.finish(&route.ctx, LdapResult::new(ResultCode::SizeLimitExceeded));
                    }
                }
            }
            ResponseBody::Reference(urls) => {
                let urls =
                    ops::restore_referrals(urls, descriptor, self.collaborators.rewriter.as_ref());
                if !route.ctx.forward_reference(route.slot, correlation, urls) {
                    counters.record_stale();
                }
            }
            ResponseBody::Result(result) => {
                self.router.remove(&key);
                let result = ops::restore_result(result, descriptor, &self.collaborators);
                let code = result.code;
                match route.ctx.complete(route.slot, correlation, result) {
                    Completion::Stale => {
                        counters.record_stale();
                        tracing::debug!(op_id = route.ctx.id(), target = %descriptor.name, "discarding stale result");
                    }
                    Completion::Recorded { remaining } => {
                        tracing::debug!(
                            op_id = route.ctx.id(),
                            target = %descriptor.name,
                            code = %code,
                            remaining,
                            "candidate answered"
                        );
                        self.evaluate(&route.ctx);
                    }
                }
            }
        }
    }

    fn on_session_lost(&self, target: usize, session: SessionId) {
        for (key, route) in self.router.remove_session(target, session) {
            self.counters[target].record_read_error();
            tracing::warn!(
                op_id = route.ctx.id(),
                target = %self.registry.targets()[target].name,
                session = %session,
                msgid = key.msgid,
                "connection lost with request in flight"
            );
            let result = LdapResult::new(ResultCode::Unavailable)
                .with_text("Read error on connection to target");
            if route
                .ctx
                .fail_sent(route.slot, key.correlation(), result)
                .is_some()
            {
                self.evaluate(&route.ctx);
            }
        }
    }

    fn on_bind_outcome(&self, target: usize, waiters: Vec<Continuation>, outcome: BindOutcome) {
        tracing::debug!(
            target = %self.registry.targets()[target].name,
            waiters = waiters.len(),
            outcome = ?outcome,
            "session outcome"
        );
        for Continuation { ctx, slot } in waiters {
            match &outcome {
                BindOutcome::Bound => self.advance(&ctx, slot),
                BindOutcome::ServerDown(err) => self.retry(&ctx, slot, None, err.clone()),
                BindOutcome::Rejected(err) => self.fail_slot(&ctx, slot, err),
            }
        }
    }
}

impl<C: Connector> DispatcherInner<C> {
    /// Ends a slot whose target answered with something its request cannot
    /// produce.
    fn protocol_error(&self, key: &CorrelationKey, route: &Route<C::Session>, detail: &str) {
        self.router.remove(key);
        let err = AsyncMetaError::Protocol(detail.to_string());
        tracing::warn!(
            op_id = route.ctx.id(),
            target = %self.registry.targets()[key.target].name,
            msgid = key.msgid,
            error = %err,
            "unexpected response from target"
        );
        if route
            .ctx
            .fail_sent(route.slot, key.correlation(), LdapResult::from(&err))
            .is_some()
        {
            self.evaluate(&route.ctx);
        }
    }
}
