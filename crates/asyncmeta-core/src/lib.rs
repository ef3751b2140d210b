//! AsyncMeta Dispatcher
//!
//! Presents several remote LDAP servers as one directory tree. Each client
//! operation goes to every target whose naming context can hold it. The
//! requests run concurrently over sessions shared with other operations
//! (one per target unless configured otherwise), and the answers are merged
//! into a single result.
//!
//! # Components
//!
//! - [`registry`] - The configured targets and the virtual naming context
//! - [`candidates`] - Which targets an operation goes to, with what base and scope
//! - [`context`] - Per-operation slot state, streaming and single teardown
//! - [`aggregate`] - Merging per-target outcomes into the client result
//! - [`Dispatcher`] - Admission, fan-out, retries, timeouts and abandon

pub mod admission;
pub mod aggregate;
pub mod candidates;
pub mod config;
pub mod context;
mod dispatcher;
mod multiplexer;
pub mod ops;
mod reaper;
pub mod registry;
mod router;
pub mod sink;
pub mod state;

pub use candidates::{select_candidates, Candidacy, CandidateDescriptor};
pub use config::{DispatchConfig, OnError, WritePolicy};
pub use context::{Deadline, DeadlineCause, OperationContext};
pub use dispatcher::Dispatcher;
pub use ops::{Collaborators, Prepared};
pub use registry::TargetRegistry;
pub use sink::{SearchEvent, SearchSink};
pub use state::{Correlation, SlotState};
