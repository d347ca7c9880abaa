//! Shared state threaded through the ISR, the socket event loop and the
//! dispatch loop.
//!
//! `ServerContext` replaces what would otherwise be globals: the debounce
//! window, the command signal, the mirrored LED state and the single client
//! slot. It is built once at startup and shared by `Arc`.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::command::{CommandValue, LedState};
use super::connection::ConnectionManager;
use super::ports::{Accepted, ClientId, LedPort, SecureClient, SocketEvents};
use super::signal::CommandSignal;
use crate::config::ServerConfig;
use crate::drivers::button::Debouncer;
use crate::error::SocketError;

// ---------------------------------------------------------------------------
// LED mirror
// ---------------------------------------------------------------------------

/// Last LED state acknowledged by the client.
///
/// Written by the receive handler, read by the button ISR to pick the next
/// command. Optionally drives a physical LED.
pub struct LedMirror {
    on: AtomicBool,
    sink: Option<Box<dyn LedPort>>,
}

impl LedMirror {
    pub fn new() -> Self {
        Self {
            on: AtomicBool::new(false),
            sink: None,
        }
    }

    pub fn with_sink(sink: Box<dyn LedPort>) -> Self {
        Self {
            on: AtomicBool::new(false),
            sink: Some(sink),
        }
    }

    /// Current mirrored state. ISR-safe.
    pub fn get(&self) -> LedState {
        if self.on.load(Ordering::Acquire) {
            LedState::On
        } else {
            LedState::Off
        }
    }

    pub fn set(&self, state: LedState) {
        self.on.store(state == LedState::On, Ordering::Release);
        if let Some(sink) = &self.sink {
            sink.show(state);
        }
    }

    /// The command the next press should send. ISR-safe.
    pub fn next_command(&self) -> CommandValue {
        self.get().toggle_command()
    }
}

impl Default for LedMirror {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ServerContext
// ---------------------------------------------------------------------------

pub struct ServerContext<C> {
    pub config: ServerConfig,
    pub debouncer: Debouncer,
    pub signal: CommandSignal,
    pub led: Arc<LedMirror>,
    pub connection: ConnectionManager<C>,
}

impl<C> ServerContext<C> {
    pub fn new(config: ServerConfig, led: LedMirror) -> Self {
        let led = Arc::new(led);
        Self {
            debouncer: Debouncer::new(config.debounce_ms),
            signal: CommandSignal::new(),
            connection: ConnectionManager::new(Arc::clone(&led)),
            led,
            config,
        }
    }

    /// Button interrupt body: debounce the edge and, if it counts as a
    /// press, signal the toggle of the mirrored LED state.
    ///
    /// Allocation-free and non-blocking. Returns the signalled command, or
    /// `None` if the edge was filtered or the signal slot was occupied.
    pub fn on_button_edge(&self, now_ms: u32) -> Option<CommandValue> {
        if !self.debouncer.on_raw_edge(now_ms) {
            return None;
        }
        let command = self.led.next_command();
        self.signal.signal(command).then_some(command)
    }
}

/// The listening socket reports straight into the connection slot.
impl<C: SecureClient> SocketEvents<C> for ServerContext<C> {
    fn on_connect(&self, accepted: Result<Accepted<C>, SocketError>) {
        self.connection.on_connect(accepted);
    }

    fn on_receive(&self, id: ClientId) {
        self.connection.on_receive(id);
    }

    fn on_disconnect(&self, id: ClientId) {
        self.connection.on_disconnect(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingLed(Mutex<Vec<LedState>>);

    impl LedPort for RecordingLed {
        fn show(&self, state: LedState) {
            self.0.lock().unwrap().push(state);
        }
    }

    fn context() -> ServerContext<()> {
        ServerContext::new(ServerConfig::default(), LedMirror::new())
    }

    #[test]
    fn mirror_starts_off_and_requests_on() {
        let m = LedMirror::new();
        assert_eq!(m.get(), LedState::Off);
        assert_eq!(m.next_command(), CommandValue::On);
        m.set(LedState::On);
        assert_eq!(m.next_command(), CommandValue::Off);
    }

    #[test]
    fn mirror_forwards_to_sink() {
        let led = Arc::new(RecordingLed(Mutex::new(Vec::new())));
        struct Shared(Arc<RecordingLed>);
        impl LedPort for Shared {
            fn show(&self, state: LedState) {
                self.0.show(state);
            }
        }
        let m = LedMirror::with_sink(Box::new(Shared(Arc::clone(&led))));
        m.set(LedState::On);
        m.set(LedState::Off);
        assert_eq!(*led.0.lock().unwrap(), vec![LedState::On, LedState::Off]);
    }

    #[test]
    fn accepted_edge_signals_toggle() {
        let ctx = context();
        assert_eq!(ctx.on_button_edge(1_000), Some(CommandValue::On));
        assert_eq!(ctx.signal.try_take(), Some(CommandValue::On));
    }

    #[test]
    fn bounce_within_window_is_filtered() {
        let ctx = context();
        assert!(ctx.on_button_edge(1_000).is_some());
        assert_eq!(ctx.on_button_edge(1_040), None);
        assert_eq!(ctx.signal.dropped(), 0);
    }

    #[test]
    fn press_while_pending_is_dropped_and_counted() {
        let ctx = context();
        assert_eq!(ctx.on_button_edge(1_000), Some(CommandValue::On));
        assert_eq!(ctx.on_button_edge(1_500), None);
        assert_eq!(ctx.signal.dropped(), 1);
        assert_eq!(ctx.signal.try_take(), Some(CommandValue::On));
    }

    #[test]
    fn command_follows_acknowledged_state() {
        let ctx = context();
        ctx.led.set(LedState::On);
        assert_eq!(ctx.on_button_edge(1_000), Some(CommandValue::Off));
    }
}
