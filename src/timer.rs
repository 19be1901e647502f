//! Cancellable timers that feed the engine's event loop.
//!
//! Each timer is a spawned tokio task that sleeps and then sends an event
//! into the engine's unbounded channel. The engine never runs timer work
//! on the timer task itself; it reacts to the event on its own loop, so
//! all state mutation stays on one logical thread.
//!
//! A [`TimerHandle`] owns its task. Cancelling aborts the task and is
//! idempotent; dropping the handle cancels too, which lets an entity's
//! timers die with the entity.
//!
//! # Usage
//!
//! ```ignore
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! // Repeating: fires every 70ms until cancelled
//! let flush = TimerHandle::every(Duration::from_millis(70), tx.clone(), || Tick);
//!
//! // One-shot: fires once after 100ms
//! let debounce = TimerHandle::after(Duration::from_millis(100), tx, Settled);
//! ```

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Owned handle to a spawned timer task.
#[derive(Debug)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Fire `make()` into `tx` every `period`, starting one period from now.
    ///
    /// The task ends by itself when the receiving side of `tx` is gone.
    pub fn every<E, F>(period: Duration, tx: UnboundedSender<E>, make: F) -> Self
    where
        E: Send + 'static,
        F: Fn() -> E + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(make()).is_err() {
                    break;
                }
            }
        });
        Self { task: Some(task) }
    }

    /// Fire `event` into `tx` once, after `delay`.
    pub fn after<E>(delay: Duration, tx: UnboundedSender<E>, event: E) -> Self
    where
        E: Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
        Self { task: Some(task) }
    }

    /// Stop the timer. Returns `true` only on the call that actually
    /// cancelled it.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Whether the timer has not been cancelled yet.
    ///
    /// A finished one-shot timer still counts as active until cancelled or
    /// dropped; the engine cancels it when it consumes the event.
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_every_fires_periodically() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = TimerHandle::every(Duration::from_millis(70), tx, || "tick");

        tokio::time::sleep(Duration::from_millis(215)).await;

        let mut fired = 0;
        while rx.try_recv().is_ok() {
            fired += 1;
        }
        assert_eq!(fired, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_after_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = TimerHandle::after(Duration::from_millis(100), tx, 7_u32);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rx.try_recv().ok(), Some(7));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_stops_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TimerHandle::every(Duration::from_millis(10), tx, || ());

        assert!(timer.is_active());
        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert!(!timer.is_active());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(TimerHandle::after(Duration::from_millis(10), tx, ()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
