//! Single-client connection state machine.
//!
//! ```text
//!            on_connect(Ok)
//!   ┌──────┐ ─────────────────▶ ┌───────────┐
//!   │ Idle │                    │ Connected │ ──┐ on_receive: mirror ack
//!   └──────┘ ◀───────────────── └───────────┘ ◀─┘
//!      on_disconnect / peer closed on recv or send
//! ```
//!
//! The socket event loop drives the [`SocketEvents`] callbacks while the
//! dispatch loop calls [`ConnectionManager::send_command`] from another
//! thread, so the one client slot sits behind a mutex. Every event names
//! the [`ClientId`] it concerns; events for a released client are stale
//! and ignored.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use super::command::{CommandValue, parse_ack};
use super::context::LedMirror;
use super::ports::{Accepted, ClientId, SecureClient, SocketEvents};
use crate::error::SocketError;

/// Fixed capacity of the acknowledgement receive buffer.
pub const RECV_BUFFER_SIZE: usize = 20;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connected { id: ClientId, peer: SocketAddr },
}

/// Result of forwarding one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The command byte was handed to the transport.
    Sent(CommandValue),
    /// No client connected; the command was dropped.
    Discarded(CommandValue),
    /// The peer had closed; the client was released.
    PeerClosed,
    /// Transient send failure; the client is kept.
    Failed(SocketError),
}

struct ClientConnection<C> {
    id: ClientId,
    peer: SocketAddr,
    handle: C,
}

pub struct ConnectionManager<C> {
    slot: Mutex<Option<ClientConnection<C>>>,
    led: Arc<LedMirror>,
}

impl<C> ConnectionManager<C> {
    pub fn new(led: Arc<LedMirror>) -> Self {
        Self {
            slot: Mutex::new(None),
            led,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ClientConnection<C>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        match self.lock().as_ref() {
            Some(c) => ConnectionState::Connected {
                id: c.id,
                peer: c.peer,
            },
            None => ConnectionState::Idle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }
}

impl<C: SecureClient> ConnectionManager<C> {
    /// Forward `command` to the connected client, if any.
    ///
    /// The transport is never touched while idle.
    pub fn send_command(&self, command: CommandValue) -> DispatchOutcome {
        let mut slot = self.lock();
        let Some(conn) = slot.as_mut() else {
            debug!("Conn: no client, discarding {:?} command", command);
            return DispatchOutcome::Discarded(command);
        };

        match conn.handle.send(&[command.wire_byte()]) {
            Ok(_) => {
                info!("Conn: LED {:?} command sent to {}", command, conn.peer);
                DispatchOutcome::Sent(command)
            }
            Err(e) if e.is_peer_closed() => {
                warn!("Conn: send to {} failed: {}", conn.peer, e);
                release(&mut slot);
                DispatchOutcome::PeerClosed
            }
            Err(e) => {
                warn!("Conn: send to {} failed: {}", conn.peer, e);
                DispatchOutcome::Failed(e)
            }
        }
    }
}

/// Disconnect and drop the held client.
fn release<C: SecureClient>(slot: &mut Option<ClientConnection<C>>) {
    if let Some(mut conn) = slot.take() {
        conn.handle.disconnect();
        info!("Conn: client {} ({}) disconnected", conn.id, conn.peer);
    }
}

impl<C: SecureClient> SocketEvents<C> for ConnectionManager<C> {
    fn on_connect(&self, accepted: Result<Accepted<C>, SocketError>) {
        let accepted = match accepted {
            Ok(a) => a,
            Err(e) => {
                warn!("Conn: failed to accept incoming client: {}", e);
                return;
            }
        };

        let mut slot = self.lock();
        if let Some(old) = slot.as_ref() {
            warn!("Conn: replacing stale client {} ({})", old.id, old.peer);
            release(&mut slot);
        }
        info!(
            "Conn: client {} accepted from {}, TLS handshake complete",
            accepted.id, accepted.peer
        );
        *slot = Some(ClientConnection {
            id: accepted.id,
            peer: accepted.peer,
            handle: accepted.client,
        });
    }

    fn on_receive(&self, id: ClientId) {
        let mut slot = self.lock();
        let Some(conn) = slot.as_mut().filter(|c| c.id == id) else {
            debug!("Conn: receive event for stale client {}", id);
            return;
        };

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        match conn.handle.recv(&mut buf) {
            Ok(n) => {
                let payload = &buf[..n.min(RECV_BUFFER_SIZE)];
                let state = parse_ack(payload);
                info!(
                    "Conn: acknowledgement from {}: {:?} -> LED {:?}",
                    conn.peer,
                    String::from_utf8_lossy(payload),
                    state
                );
                self.led.set(state);
            }
            Err(e) if e.is_peer_closed() => {
                warn!("Conn: receive from {} failed: {}", conn.peer, e);
                release(&mut slot);
            }
            Err(e) => {
                warn!("Conn: receive from {} failed: {}", conn.peer, e);
            }
        }
    }

    fn on_disconnect(&self, id: ClientId) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|c| c.id == id) {
            release(&mut slot);
        } else {
            debug!("Conn: disconnect event for stale client {}", id);
        }
    }
}
