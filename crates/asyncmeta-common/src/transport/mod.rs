//! Transport seams.
//!
//! The dispatcher never touches sockets. It drives remote servers through
//! two traits:
//!
//! - **[`Connector`]**: opens a session to a target and hands back the
//!   stream of responses read from it
//! - **[`RemoteSession`]**: submits requests and abandons without waiting
//!   for the network
//!
//! Wire encoding, TLS and socket management belong to the implementations.

mod session;

pub use session::{Connection, Connector, MessageId, RemoteSession, SessionId};
