//! Cancellable auto-close timers for timed polls.
//!
//! One timer may exist per (event, poll). Scheduling over an existing key
//! cancels the prior timer; manual close cancels it too. Timers can fire on
//! any worker thread, so the handle table sits behind a mutex.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use tribuna_model::{EventId, PollId};

#[derive(Debug, Default)]
pub struct PollAutoClose {
    handles: Mutex<HashMap<(i64, i64), JoinHandle<()>>>,
}

impl PollAutoClose {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep until `close_at`, then drop the handle entry and run `on_fire`.
    /// `on_fire` itself re-checks that the poll is still the live one.
    pub fn schedule<F>(
        self: &Arc<Self>,
        event_id: EventId,
        poll_id: PollId,
        close_at: DateTime<Utc>,
        on_fire: F,
    ) where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = (event_id.as_i64(), poll_id.as_i64());
        let table = Arc::clone(self);
        let delay = (close_at - Utc::now()).to_std().unwrap_or_default();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Drop the handle reference first to avoid leaks.
            table.handles.lock().remove(&key);
            on_fire.await;
        });

        let mut handles = self.handles.lock();
        if let Some(prior) = handles.insert(key, handle) {
            debug!(event = %event_id, poll = %poll_id, "replacing scheduled auto-close");
            prior.abort();
        }
    }

    pub fn cancel(&self, event_id: EventId, poll_id: PollId) {
        let key = (event_id.as_i64(), poll_id.as_i64());
        if let Some(handle) = self.handles.lock().remove(&key) {
            handle.abort();
        }
    }

    pub fn is_scheduled(&self, event_id: EventId, poll_id: PollId) -> bool {
        self.handles
            .lock()
            .contains_key(&(event_id.as_i64(), poll_id.as_i64()))
    }

    pub fn scheduled_count(&self) -> usize {
        self.handles.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_close_time() {
        let timers = Arc::new(PollAutoClose::new());
        let fired = Arc::new(AtomicBool::new(false));

        let flag = fired.clone();
        timers.schedule(
            EventId::new(1),
            PollId::new(7),
            Utc::now() + chrono::Duration::seconds(60),
            async move {
                flag.store(true, Ordering::SeqCst);
            },
        );
        assert!(timers.is_scheduled(EventId::new(1), PollId::new(7)));
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(59)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(!timers.is_scheduled(EventId::new(1), PollId::new(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let timers = Arc::new(PollAutoClose::new());
        let fired = Arc::new(AtomicBool::new(false));

        let flag = fired.clone();
        timers.schedule(
            EventId::new(1),
            PollId::new(7),
            Utc::now() + chrono::Duration::seconds(60),
            async move {
                flag.store(true, Ordering::SeqCst);
            },
        );
        timers.cancel(EventId::new(1), PollId::new(7));
        assert_eq!(timers.scheduled_count(), 0);

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_prior_timer() {
        let timers = Arc::new(PollAutoClose::new());
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));

        let flag = first.clone();
        timers.schedule(
            EventId::new(1),
            PollId::new(7),
            Utc::now() + chrono::Duration::seconds(30),
            async move {
                flag.store(true, Ordering::SeqCst);
            },
        );
        let flag = second.clone();
        timers.schedule(
            EventId::new(1),
            PollId::new(7),
            Utc::now() + chrono::Duration::seconds(60),
            async move {
                flag.store(true, Ordering::SeqCst);
            },
        );
        assert_eq!(timers.scheduled_count(), 1);
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert!(!first.load(Ordering::SeqCst));
        assert!(second.load(Ordering::SeqCst));
    }
}
