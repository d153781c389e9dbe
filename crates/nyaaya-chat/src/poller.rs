use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Floor for the interval; a zero period would make the ticker panic.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A cancellable repeating task with a fixed interval.
///
/// The first attempt runs immediately. Once the token is cancelled no further
/// attempt is started; an attempt already in flight is dropped at its next
/// await point.
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            interval: interval.max(MIN_INTERVAL),
            cancel,
        }
    }

    /// Run `attempt` until it yields `Some`, or return `None` on cancellation.
    pub async fn poll_until<T, F, Fut>(&self, mut attempt: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                found = attempt() => {
                    if found.is_some() {
                        return found;
                    }
                }
            }
        }
    }

    /// Run `attempt` every interval in the background until cancelled.
    pub fn spawn_repeating<F, Fut>(&self, mut attempt: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interval = self.interval;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = attempt() => {}
                }
            }
            tracing::debug!("repeating task stopped");
        })
    }
}
