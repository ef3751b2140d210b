use asyncmeta_common::Connector;
use std::sync::Weak;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use crate::dispatcher::DispatcherInner;

/// Periodic sweep of overdue operations, operations whose caller went
/// away, and idle sessions.
pub(crate) struct Reaper<C: Connector> {
    dispatcher: Weak<DispatcherInner<C>>,
    interval: Duration,
}

impl<C: Connector> Reaper<C> {
    pub(crate) fn new(dispatcher: Weak<DispatcherInner<C>>, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
        }
    }

    /// Starts the reaper task.
    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Main loop; exits once the dispatcher is gone.
    async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let Some(dispatcher) = self.dispatcher.upgrade() else {
                tracing::debug!("dispatcher dropped, reaper exiting");
                return;
            };
            let reaped = dispatcher.reap(Instant::now());
            if reaped > 0 {
                tracing::info!(reaped, "reaped operations");
            }
        }
    }
}
