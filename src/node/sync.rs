use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Single-slot handoff holding only the latest value.
///
/// `post` always succeeds and discards whatever was not yet taken; `take`
/// empties the slot. A slow reader loses stale values instead of queueing
/// them.
#[derive(Debug, Default)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Stores `value`, returning true if an unread value was overwritten.
    pub fn post(&self, value: T) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.replace(value).is_some()
    }

    pub fn take(&self) -> Option<T> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Signal {
    SampleReady = 0b01,
    UplinkComplete = 0b10,
}

/// Independently settable flags with wait-and-clear.
#[derive(Debug, Default)]
pub struct Signals {
    bits: AtomicU8,
    notify: Notify,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, signal: Signal) {
        self.bits.fetch_or(signal as u8, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn clear(&self, signal: Signal) {
        self.bits.fetch_and(!(signal as u8), Ordering::SeqCst);
    }

    pub fn is_raised(&self, signal: Signal) -> bool {
        self.bits.load(Ordering::SeqCst) & signal as u8 != 0
    }

    /// Clears `signal` if raised, reporting whether it was.
    pub fn try_take(&self, signal: Signal) -> bool {
        self.bits.fetch_and(!(signal as u8), Ordering::SeqCst) & signal as u8 != 0
    }

    /// Waits until `signal` is raised, then clears it.
    pub async fn take(&self, signal: Signal) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.try_take(signal) {
                return;
            }
            notified.await;
        }
    }

    /// Like [`Signals::take`] but gives up after `limit`; returns whether
    /// the signal was taken.
    pub async fn take_timeout(&self, signal: Signal, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.take(signal)).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn mailbox_keeps_only_latest() {
        let mb = Mailbox::new();
        assert!(!mb.post("A"));
        assert!(mb.post("B"));
        assert_eq!(mb.take(), Some("B"));
        assert_eq!(mb.take(), None);
    }

    #[tokio::test]
    async fn flags_are_independent() {
        let s = Signals::new();
        s.raise(Signal::SampleReady);
        assert!(s.is_raised(Signal::SampleReady));
        assert!(!s.is_raised(Signal::UplinkComplete));
        assert!(!s.try_take(Signal::UplinkComplete));
        assert!(s.try_take(Signal::SampleReady));
        assert!(!s.is_raised(Signal::SampleReady));

        s.raise(Signal::UplinkComplete);
        s.clear(Signal::UplinkComplete);
        assert!(!s.is_raised(Signal::UplinkComplete));
    }

    #[tokio::test(start_paused = true)]
    async fn take_timeout_expires_without_signal() {
        let s = Signals::new();
        assert!(!s.take_timeout(Signal::SampleReady, Duration::from_millis(250)).await);
    }

    #[tokio::test]
    async fn raise_wakes_a_waiter_and_is_consumed() {
        let s = Arc::new(Signals::new());
        let waiter = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.take(Signal::UplinkComplete).await })
        };
        tokio::task::yield_now().await;
        s.raise(Signal::SampleReady);
        s.raise(Signal::UplinkComplete);
        waiter.await.unwrap();
        assert!(!s.is_raised(Signal::UplinkComplete));
        assert!(s.is_raised(Signal::SampleReady));
    }

    #[tokio::test]
    async fn signal_raised_before_wait_is_not_lost() {
        let s = Signals::new();
        s.raise(Signal::SampleReady);
        assert!(s.take_timeout(Signal::SampleReady, Duration::from_secs(1)).await);
    }
}
