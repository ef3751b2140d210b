//! Correlation of target responses with operations.

use asyncmeta_client::LiveSession;
use asyncmeta_common::{MessageId, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::context::OperationContext;
use crate::state::Correlation;

/// Identifies a request on the wire. Message IDs are only unique per
/// session, and session IDs are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub target: usize,
    pub session: SessionId,
    pub msgid: MessageId,
}

impl CorrelationKey {
    pub fn new(target: usize, correlation: Correlation) -> Self {
        Self {
            target,
            session: correlation.session,
            msgid: correlation.msgid,
        }
    }

    pub fn correlation(&self) -> Correlation {
        Correlation {
            session: self.session,
            msgid: self.msgid,
        }
    }
}

/// Where responses to one request go.
pub struct Route<S> {
    pub ctx: Arc<OperationContext>,
    pub slot: usize,
    pub session: Arc<LiveSession<S>>,
}

impl<S> Clone for Route<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            slot: self.slot,
            session: Arc::clone(&self.session),
        }
    }
}

/// Requests in flight across all operations.
pub struct Router<S> {
    routes: Mutex<HashMap<CorrelationKey, Route<S>>>,
}

impl<S> Router<S> {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: CorrelationKey, route: Route<S>) {
        self.lock().insert(key, route);
    }

    pub fn get(&self, key: &CorrelationKey) -> Option<Route<S>> {
        self.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &CorrelationKey) -> Option<Route<S>> {
        self.lock().remove(key)
    }

    /// Removes every route on a session.
    pub fn remove_session(&self, target: usize, session: SessionId) -> Vec<(CorrelationKey, Route<S>)> {
        let mut routes = self.lock();
        let keys: Vec<CorrelationKey> = routes
            .keys()
            .filter(|k| k.target == target && k.session == session)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|k| routes.remove(&k).map(|route| (k, route)))
            .collect()
    }

    /// Whether any request on the session is still unanswered.
    pub fn has_routes(&self, target: usize, session: SessionId) -> bool {
        self.lock()
            .keys()
            .any(|k| k.target == target && k.session == session)
    }

    /// Number of requests awaiting their final result.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationKey, Route<S>>> {
        self.routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S> Default for Router<S> {
    fn default() -> Self {
        Self::new()
    }
}
