//! Heartbeat keeping a trial's reservation alive while it runs.

use core::time::Duration;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, trace, warn};

use crate::storage::Storage;

/// A background task that refreshes a trial's heartbeat every `wait_time`.
///
/// The first heartbeat happens one interval after start. The task ends on
/// [`stop`](Self::stop), or by itself as soon as a heartbeat finds the
/// trial no longer `reserved` by `owner` (completed, broken, interrupted or
/// re-reserved by someone else). In the latter case the [`lost`](Self::lost) token is cancelled so
/// whoever runs the trial can abort.
pub struct Pacemaker {
    trial_id: String,
    wait_time: Duration,
    stop: CancellationToken,
    lost: CancellationToken,
    handle: JoinHandle<()>,
}

impl Pacemaker {
    /// Spawns the heartbeat task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn start(
        storage: Arc<dyn Storage>,
        trial_id: impl Into<String>,
        owner: impl Into<String>,
        wait_time: Duration,
    ) -> Self {
        let trial_id = trial_id.into();
        let stop = CancellationToken::new();
        let lost = CancellationToken::new();
        let handle = tokio::spawn(
            beat(
                storage,
                trial_id.clone(),
                owner.into(),
                wait_time,
                stop.clone(),
                lost.clone(),
            )
            .instrument(Span::current()),
        );
        Self {
            trial_id,
            wait_time,
            stop,
            lost,
            handle,
        }
    }

    /// The heartbeat interval.
    #[must_use]
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// The trial kept alive.
    #[must_use]
    pub fn trial_id(&self) -> &str {
        &self.trial_id
    }

    /// Token cancelled when the trial stopped being reserved.
    #[must_use]
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    /// Returns `true` once the heartbeat task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the heartbeat and waits for the task to exit.
    pub async fn stop(self) {
        self.stop.cancel();
        self.join().await;
    }

    /// Waits for the task to exit without stopping it.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!(trial_id = %self.trial_id, error = %e, "pacemaker task failed");
        }
    }
}

async fn beat(
    storage: Arc<dyn Storage>,
    trial_id: String,
    owner: String,
    wait_time: Duration,
    stop: CancellationToken,
    lost: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + wait_time, wait_time);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = storage.update_heartbeat(&trial_id, &owner) {
                    debug!(%trial_id, error = %e, "trial no longer reserved, stopping pacemaker");
                    lost.cancel();
                    break;
                }
                trace!(%trial_id, "heartbeat");
            }
        }
    }
}
