use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::Result;
use crate::job::PollOutcome;

/// Cancellation handle for a single polling loop. Replacing or cancelling
/// the handle aborts the previous task.
#[derive(Debug, Default)]
pub struct PollHandle {
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl PollHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new loop, aborting any previous one.
    pub fn replace(&mut self, task: JoinHandle<()>, generation: u64) {
        self.cancel();
        self.task = Some(task);
        self.generation = generation;
    }

    /// Abort the loop. Safe to call any number of times.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(generation = self.generation, "Polling cancelled");
        }
    }

    /// True while a loop is installed and has not exited on its own.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Generation of the loop most recently installed.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Spawn a loop that calls `fetch` every `interval` and hands each successful
/// result to `apply`.
///
/// The first fetch happens one full interval after spawning. The loop exits
/// on the first fetch error (logged, never retried) or once `apply` reports
/// [`PollOutcome::Finished`] or [`PollOutcome::Stale`].
pub fn spawn_poll_loop<T, F, Fut, A>(
    label: &'static str,
    interval: Duration,
    mut fetch: F,
    mut apply: A,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    A: FnMut(T) -> PollOutcome + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let value = match fetch().await {
                Ok(v) => v,
                Err(e) => {
                    warn!(poller = label, error = %e, "Poll failed, cancelling polling");
                    break;
                }
            };

            match apply(value) {
                PollOutcome::Continue | PollOutcome::Discarded => {}
                PollOutcome::Finished => {
                    debug!(poller = label, "Polling finished");
                    break;
                }
                PollOutcome::Stale => {
                    debug!(poller = label, "Stale poll result, exiting loop");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptionError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_loop_waits_one_interval_before_first_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let handle = spawn_poll_loop(
            "test",
            Duration::from_secs(1),
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), CaptionError>(())
                }
            },
            |_| PollOutcome::Continue,
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_on_finished() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let handle = spawn_poll_loop(
            "test",
            Duration::from_secs(1),
            move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<usize, CaptionError>(n) }
            },
            |n| {
                if n >= 2 {
                    PollOutcome::Finished
                } else {
                    PollOutcome::Continue
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(handle.is_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_cancels_itself_on_fetch_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let applied = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let a = applied.clone();
        let handle = spawn_poll_loop(
            "test",
            Duration::from_secs(1),
            move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 1 {
                        Err(CaptionError::Other("connection reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            },
            move |_| {
                a.fetch_add(1, Ordering::SeqCst);
                PollOutcome::Continue
            },
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(handle.is_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_aborts_previous_loop() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let spawn_counter = |counter: Arc<AtomicUsize>| {
            spawn_poll_loop(
                "test",
                Duration::from_secs(1),
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<(), CaptionError>(()) }
                },
                |_| PollOutcome::Continue,
            )
        };

        let mut handle = PollHandle::new();
        handle.replace(spawn_counter(first.clone()), 1);
        handle.replace(spawn_counter(second.clone()), 2);
        assert_eq!(handle.generation(), 2);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 3);

        handle.cancel();
        handle.cancel();
        assert!(!handle.is_active());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(second.load(Ordering::SeqCst), 3);
    }
}
