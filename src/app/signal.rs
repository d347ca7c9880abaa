//! ISR → server task command signal.
//!
//! A single-slot mailbox: the button interrupt deposits a [`CommandValue`],
//! the dispatch loop blocks until one is present and takes it.
//!
//! ```text
//! ┌────────────┐  signal()   ┌──────────┐  wait()   ┌───────────────┐
//! │ Button ISR │────────────▶│  1 slot  │──────────▶│ Dispatch loop │
//! └────────────┘ (no block)  └──────────┘ (blocks)  └───────────────┘
//! ```
//!
//! While a value is pending further signals are dropped: the first pending
//! press wins and nothing is ever queued behind it. Drops are counted so
//! the task side can report them.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use super::command::CommandValue;

pub struct CommandSignal {
    inner: Signal<CriticalSectionRawMutex, CommandValue>,
    dropped: AtomicU32,
}

impl CommandSignal {
    pub const fn new() -> Self {
        Self {
            inner: Signal::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Deposit `value` unless one is already pending.
    ///
    /// Never blocks; safe to call from interrupt context. Returns `false`
    /// when the value was dropped.
    pub fn signal(&self, value: CommandValue) -> bool {
        // Single producer: the consumer can only clear the slot between the
        // check and the store, never fill it.
        if self.inner.signaled() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.inner.signal(value);
        true
    }

    /// Wait for the next command and consume it.
    pub async fn wait(&self) -> CommandValue {
        self.inner.wait().await
    }

    /// Block the calling task until a command arrives. No timeout.
    #[cfg(target_os = "espidf")]
    pub fn wait_blocking(&self) -> CommandValue {
        // Task-notification based executor: the ISR-side wake is safe.
        esp_idf_hal::task::block_on(self.wait())
    }

    /// Block the calling thread until a command arrives. No timeout.
    #[cfg(not(target_os = "espidf"))]
    pub fn wait_blocking(&self) -> CommandValue {
        futures_lite::future::block_on(self.wait())
    }

    /// Take the pending command without blocking.
    pub fn try_take(&self) -> Option<CommandValue> {
        self.inner.try_take()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.signaled()
    }

    /// Total signals dropped because one was already pending.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for CommandSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn empty_signal_has_nothing_pending() {
        let s = CommandSignal::new();
        assert!(!s.is_pending());
        assert_eq!(s.try_take(), None);
        assert_eq!(s.dropped(), 0);
    }

    #[test]
    fn signal_is_consumed_exactly_once() {
        let s = CommandSignal::new();
        assert!(s.signal(CommandValue::On));
        assert!(s.is_pending());
        assert_eq!(s.try_take(), Some(CommandValue::On));
        assert_eq!(s.try_take(), None);
    }

    #[test]
    fn first_pending_value_wins() {
        let s = CommandSignal::new();
        assert!(s.signal(CommandValue::On));
        assert!(!s.signal(CommandValue::Off));
        assert!(!s.signal(CommandValue::Off));
        assert_eq!(s.dropped(), 2);
        assert_eq!(s.try_take(), Some(CommandValue::On));
    }

    #[test]
    fn slot_rearms_after_consumption() {
        let s = CommandSignal::new();
        assert!(s.signal(CommandValue::On));
        assert_eq!(s.wait_blocking(), CommandValue::On);
        assert!(s.signal(CommandValue::Off));
        assert_eq!(s.wait_blocking(), CommandValue::Off);
        assert_eq!(s.dropped(), 0);
    }

    #[test]
    fn blocked_waiter_is_woken_by_signal() {
        let s = Arc::new(CommandSignal::new());
        let waiter = {
            let s = Arc::clone(&s);
            std::thread::spawn(move || s.wait_blocking())
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(s.signal(CommandValue::Off));
        assert_eq!(waiter.join().unwrap(), CommandValue::Off);
        assert!(!s.is_pending());
    }
}
