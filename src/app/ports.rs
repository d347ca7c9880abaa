//! Port traits: the boundary between the server core and the platform.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ConnectionManager / CommandServer
//! ```
//!
//! The TLS transport, network link and LED output implement these traits.
//! The core consumes them via generics, so connection handling, dispatch
//! and bring-up are testable on the host against mocks.

use core::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use super::command::LedState;
use crate::error::{LinkError, SocketError};

// ───────────────────────────────────────────────────────────────
// Client handle
// ───────────────────────────────────────────────────────────────

/// Generation token identifying one accepted client.
///
/// Socket events carry the id of the client they concern, so an event that
/// arrives after the handle was released is recognised as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An accepted client whose TLS handshake completed.
pub struct Accepted<C> {
    pub id: ClientId,
    pub peer: SocketAddr,
    pub client: C,
}

/// A connected, secured client socket.
pub trait SecureClient: Send {
    /// Write `data`; returns the number of bytes accepted by the transport.
    fn send(&mut self, data: &[u8]) -> Result<usize, SocketError>;

    /// Read up to `buf.len()` bytes. Never writes past `buf`.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, SocketError>;

    /// Shut the connection down. The handle itself is released on drop.
    fn disconnect(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Socket event sink
// ───────────────────────────────────────────────────────────────

/// Callbacks the listening socket fires from its event loop.
///
/// The socket never fires two callbacks concurrently, and never reports a
/// new connection while it still holds the previous client.
pub trait SocketEvents<C> {
    /// A connect request was accepted (handshake done) or failed.
    fn on_connect(&self, accepted: Result<Accepted<C>, SocketError>);

    /// Data is ready to be read from client `id`.
    fn on_receive(&self, id: ClientId);

    /// Client `id` closed the connection.
    fn on_disconnect(&self, id: ClientId);
}

impl<C, T: SocketEvents<C> + ?Sized> SocketEvents<C> for Arc<T> {
    fn on_connect(&self, accepted: Result<Accepted<C>, SocketError>) {
        (**self).on_connect(accepted);
    }

    fn on_receive(&self, id: ClientId) {
        (**self).on_receive(id);
    }

    fn on_disconnect(&self, id: ClientId) {
        (**self).on_disconnect(id);
    }
}

// ───────────────────────────────────────────────────────────────
// Network link
// ───────────────────────────────────────────────────────────────

/// The physical/link layer beneath the server socket.
pub trait NetworkLink {
    /// Initialise the interface and driver. Called exactly once.
    fn init(&mut self) -> Result<(), LinkError>;

    /// One connection attempt. Blocks until the link is up or failed and
    /// returns the assigned IPv4 address.
    fn connect(&mut self) -> Result<Ipv4Addr, LinkError>;

    /// IPv6 link-local address and interface scope id, after `connect`.
    fn ipv6_link_local(&mut self) -> Result<(Ipv6Addr, u32), LinkError>;
}

// ───────────────────────────────────────────────────────────────
// LED output
// ───────────────────────────────────────────────────────────────

/// Observational sink for the mirrored LED state.
pub trait LedPort: Send + Sync {
    fn show(&self, state: LedState);
}
