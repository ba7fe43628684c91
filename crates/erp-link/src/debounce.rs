//! Delay-coalescing scheduler.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Runs only the last action submitted within `delay`.
///
/// Each [`call`](Debouncer::call) cancels the previously scheduled action, if
/// it has not started yet, and schedules the new one. Must be used inside a
/// Tokio runtime.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn call<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action().await;
        });
        if let Some(previous) = self.pending.lock().replace(task) {
            previous.abort();
        }
    }

    /// Drop the scheduled action without running it.
    pub fn cancel(&self) {
        if let Some(task) = self.pending.lock().take() {
            task.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn last_call_wins() {
        let debouncer = Debouncer::new(Duration::from_millis(300));
        let seen = Arc::new(Mutex::new(Vec::new()));
        for value in ["s", "sa", "sal"] {
            let seen = Arc::clone(&seen);
            debouncer.call(move || async move { seen.lock().push(value) });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*seen.lock(), vec!["sal"]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn calls_outside_window_all_run() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let seen = Arc::new(Mutex::new(Vec::new()));
        for value in [1, 2] {
            let seen = Arc::clone(&seen);
            debouncer.call(move || async move { seen.lock().push(value) });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_pending_action() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let seen = Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink = Arc::clone(&seen);
        debouncer.call(move || async move { sink.lock().push(1) });
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(seen.lock().is_empty());
        assert!(!debouncer.is_pending());
    }
}
