use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::protocol::error::Result;
use crate::protocol::requests::OutboundMessage;
use crate::protocol::responses::ResponseMessage;
use crate::target::TargetDescriptor;

/// LDAP message ID assigned by a session to an outbound request.
pub type MessageId = i32;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of one physical session.
///
/// A replacement session to the same target gets a new ID, so responses
/// that were addressed to a dead session can never be mistaken for
/// responses to its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        SessionId(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// An established session to a target.
///
/// Every method must return without waiting for the network: `send`
/// enqueues the request and reports the message ID it was assigned.
pub trait RemoteSession: Send + Sync + 'static {
    /// Submits a request.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AsyncMetaError::ServerDown`] when the session is no
    /// longer usable; other errors are reported for requests the session
    /// could not encode.
    fn send(&self, message: OutboundMessage) -> Result<MessageId>;

    /// Asks the target to abandon an outstanding request.
    fn abandon(&self, msgid: MessageId) -> Result<()>;

    /// Closes the session. The response stream ends afterwards.
    fn close(&self);
}

/// A freshly opened session and the stream of messages read from it.
///
/// The stream ends when the connection is lost or closed.
pub struct Connection<S> {
    pub session: S,
    pub responses: mpsc::UnboundedReceiver<ResponseMessage>,
}

impl<S> Connection<S> {
    pub fn new(session: S, responses: mpsc::UnboundedReceiver<ResponseMessage>) -> Self {
        Connection { session, responses }
    }
}

/// Opens sessions to targets.
pub trait Connector: Send + Sync + 'static {
    type Session: RemoteSession;

    fn connect(
        &self,
        target: &TargetDescriptor,
    ) -> impl Future<Output = Result<Connection<Self::Session>>> + Send;
}
