pub mod pool;
pub mod quarantine;

pub use pool::{Acquire, BindOutcome, LiveSession, PoolConfig, SessionEvents, SessionPool, SessionStatus};
pub use quarantine::{Quarantine, QuarantineState};
