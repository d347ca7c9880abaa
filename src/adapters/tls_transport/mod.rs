//! Secure listening socket.
//!
//! A single-client TCP server whose connections are TLS-terminated with
//! mutual X.509 authentication. [`create_and_listen`] performs the setup
//! steps in a fixed order and reports the first failing [`SetupStep`];
//! afterwards the server never stops listening.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: lwIP socket + mbedTLS with the server
//!   certificate, private key, CA chain and `VERIFY_REQUIRED`.
//! - **all other targets**: simulation on `std::net` in plaintext (no
//!   TLS) for host-side testing. Identity material is still validated and
//!   fingerprinted.
//!
//! ## Event model
//!
//! [`TlsServer::pump_once`] runs one step of the event loop and reports it
//! to the attached [`SocketEvents`] sink:
//!
//! 1. No client held: poll for a connect request. Accept, handshake, and
//!    hand the new [`TlsClient`] over through `on_connect`.
//! 2. Client held: peek for readiness. Pending data fires `on_receive`,
//!    an orderly close fires `on_disconnect`.
//!
//! Only one client is held at a time. Further connect requests wait in the
//! backlog until the held client is gone, whether the peer closed it or the
//! connection manager released it.

use core::time::Duration;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use log::{debug, info, warn};

use crate::adapters::cert_store::Fingerprint;
use crate::app::ports::{Accepted, ClientId, SecureClient, SocketEvents};
use crate::config::ServerConfig;
use crate::drivers::task_pin::{self, Core};
use crate::error::{SetupError, SetupStep, SocketError};

#[cfg(not(target_os = "espidf"))]
use std::io::{Read, Write};
#[cfg(not(target_os = "espidf"))]
use std::net::{Shutdown, TcpListener, TcpStream};

// ───────────────────────────────────────────────────────────────
// ESP-IDF platform helpers (real lwIP + mbedTLS)
// ───────────────────────────────────────────────────────────────
#[cfg(target_os = "espidf")]
mod esp_impl;

/// `EINVAL`, reported for option values the socket layer would refuse.
const EINVAL: i32 = 22;

// ───────────────────────────────────────────────────────────────
// Identity and options
// ───────────────────────────────────────────────────────────────

/// The server's own TLS credentials (PEM).
#[derive(Clone)]
pub struct ServerIdentity {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl ServerIdentity {
    pub fn new(cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.cert)
    }
}

impl core::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Never print key material.
        f.debug_struct("ServerIdentity")
            .field("cert_len", &self.cert.len())
            .field("key_len", &self.key.len())
            .finish()
    }
}

/// Listening socket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerOptions {
    pub backlog: u16,
    pub recv_timeout: Duration,
    /// Sleep between event loop steps that found nothing to do.
    pub poll_interval: Duration,
}

impl ListenerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            backlog: config.backlog,
            recv_timeout: config.recv_timeout(),
            poll_interval: config.event_poll_interval(),
        }
    }
}

/// What one event loop step observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEvent {
    /// Nothing happened.
    Idle,
    /// A client was accepted and handed to `on_connect`.
    Connected(ClientId),
    /// A connect request failed; reported to `on_connect` as an error.
    AcceptFailed(SocketError),
    /// The held client has data; `on_receive` fired.
    Received(ClientId),
    /// The held client closed; `on_disconnect` fired.
    Disconnected(ClientId),
}

// ───────────────────────────────────────────────────────────────
// Client handle
// ───────────────────────────────────────────────────────────────

/// An accepted, handshaken client connection.
///
/// Owned by the connection manager. Disconnecting or dropping it tells
/// the server it may accept the next client.
pub struct TlsClient {
    peer: SocketAddr,
    alive: Arc<AtomicBool>,

    #[cfg(target_os = "espidf")]
    inner: esp_impl::EspTlsClient,

    #[cfg(not(target_os = "espidf"))]
    stream: TcpStream,
}

impl TlsClient {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(not(target_os = "espidf"))]
fn map_io_error(e: &io::Error) -> SocketError {
    use io::ErrorKind;
    match e.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => SocketError::PeerClosed,
        ErrorKind::WouldBlock | ErrorKind::TimedOut => SocketError::WouldBlock,
        _ => SocketError::Io(e.raw_os_error().unwrap_or(-1)),
    }
}

impl SecureClient for TlsClient {
    #[cfg(target_os = "espidf")]
    fn send(&mut self, data: &[u8]) -> Result<usize, SocketError> {
        self.inner.write(data)
    }

    #[cfg(not(target_os = "espidf"))]
    fn send(&mut self, data: &[u8]) -> Result<usize, SocketError> {
        let n = self.stream.write(data).map_err(|e| map_io_error(&e))?;
        self.stream.flush().map_err(|e| map_io_error(&e))?;
        Ok(n)
    }

    #[cfg(target_os = "espidf")]
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        self.inner.read(buf)
    }

    #[cfg(not(target_os = "espidf"))]
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.stream.read(buf) {
            Ok(0) => Err(SocketError::PeerClosed),
            Ok(n) => Ok(n),
            Err(e) => Err(map_io_error(&e)),
        }
    }

    #[cfg(target_os = "espidf")]
    fn disconnect(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.inner.close_notify();
    }

    #[cfg(not(target_os = "espidf"))]
    fn disconnect(&mut self) {
        self.alive.store(false, Ordering::Release);
        // The event loop's probe shares the socket and sees EOF.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for TlsClient {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

/// The server's view of the client it handed out.
struct HeldClient {
    id: ClientId,
    alive: Arc<AtomicBool>,

    #[cfg(target_os = "espidf")]
    probe: esp_impl::Probe,

    #[cfg(not(target_os = "espidf"))]
    probe: TcpStream,
}

// ───────────────────────────────────────────────────────────────
// Server
// ───────────────────────────────────────────────────────────────

/// The listening socket plus its event sink.
pub struct TlsServer<E> {
    events: E,
    options: ListenerOptions,
    local_addr: SocketAddr,
    next_id: u32,
    held: Option<HeldClient>,

    #[cfg(target_os = "espidf")]
    listener: esp_impl::EspTlsListener,

    #[cfg(not(target_os = "espidf"))]
    listener: TcpListener,
}

/// Create the secure listening socket.
///
/// Steps, in order: create the socket, configure the receive timeout,
/// attach `events`, attach the TLS identity, require a verified peer
/// certificate against `trusted_roots`, bind to `bind_addr`, listen with
/// `options.backlog`. The first failure aborts setup.
pub fn create_and_listen<E: SocketEvents<TlsClient>>(
    identity: &ServerIdentity,
    trusted_roots: &[u8],
    bind_addr: SocketAddr,
    options: ListenerOptions,
    events: E,
) -> Result<TlsServer<E>, SetupError> {
    let (listener, local_addr) = platform_listen(identity, trusted_roots, bind_addr, options)?;
    info!(
        "TLS: listening on {} (backlog={}, recv timeout={}ms, cert {})",
        local_addr,
        options.backlog,
        options.recv_timeout.as_millis(),
        identity.fingerprint()
    );
    Ok(TlsServer {
        events,
        options,
        local_addr,
        next_id: 1,
        held: None,
        listener,
    })
}

fn check_common(
    identity: &ServerIdentity,
    trusted_roots: &[u8],
    options: ListenerOptions,
) -> Result<(), SetupError> {
    if options.recv_timeout.is_zero() {
        return Err(SetupError::new(SetupStep::SetRecvTimeout, EINVAL));
    }
    if identity.cert.is_empty() || identity.key.is_empty() {
        return Err(SetupError::new(SetupStep::AttachIdentity, EINVAL));
    }
    // Peer verification is mandatory; it needs something to verify against.
    if trusted_roots.is_empty() {
        return Err(SetupError::new(SetupStep::SetAuthMode, EINVAL));
    }
    Ok(())
}

#[cfg(target_os = "espidf")]
fn platform_listen(
    identity: &ServerIdentity,
    trusted_roots: &[u8],
    bind_addr: SocketAddr,
    options: ListenerOptions,
) -> Result<(esp_impl::EspTlsListener, SocketAddr), SetupError> {
    check_common(identity, trusted_roots, options)?;
    let listener = esp_impl::esp_listen(identity, trusted_roots, bind_addr, options)?;
    Ok((listener, bind_addr))
}

#[cfg(not(target_os = "espidf"))]
fn platform_listen(
    identity: &ServerIdentity,
    trusted_roots: &[u8],
    bind_addr: SocketAddr,
    options: ListenerOptions,
) -> Result<(TcpListener, SocketAddr), SetupError> {
    check_common(identity, trusted_roots, options)?;

    // std creates, binds and listens in one call; the OS picks the backlog.
    let listener = TcpListener::bind(bind_addr)
        .map_err(|e| SetupError::new(SetupStep::Bind, e.raw_os_error().unwrap_or(-1)))?;
    if options.backlog == 0 {
        return Err(SetupError::new(SetupStep::Listen, EINVAL));
    }
    listener
        .set_nonblocking(true)
        .map_err(|e| SetupError::new(SetupStep::Listen, e.raw_os_error().unwrap_or(-1)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| SetupError::new(SetupStep::Bind, e.raw_os_error().unwrap_or(-1)))?;

    info!("TLS(sim): listening on {} (plaintext)", local_addr);
    Ok((listener, local_addr))
}

impl<E> TlsServer<E> {
    /// The bound address. Useful when port `0` was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn options(&self) -> ListenerOptions {
        self.options
    }

    /// Whether a client is currently handed out.
    pub fn holds_client(&self) -> bool {
        self.held
            .as_ref()
            .is_some_and(|h| h.alive.load(Ordering::Acquire))
    }

    fn allocate_id(&mut self) -> ClientId {
        let id = ClientId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }
}

impl<E: SocketEvents<TlsClient>> TlsServer<E> {
    /// Run one step of the event loop.
    pub fn pump_once(&mut self) -> PumpEvent {
        if self
            .held
            .as_ref()
            .is_some_and(|h| !h.alive.load(Ordering::Acquire))
        {
            if let Some(h) = self.held.take() {
                debug!("TLS: client {} released, accepting again", h.id);
            }
        }

        if self.held.is_some() {
            self.poll_held()
        } else {
            self.poll_accept()
        }
    }

    /// Run the event loop forever on a dedicated thread.
    pub fn spawn_event_loop(
        mut self,
        core: Core,
        priority: u8,
        stack_kb: usize,
    ) -> io::Result<JoinHandle<()>>
    where
        E: Send + 'static,
    {
        task_pin::spawn_on_core(core, priority, stack_kb, "sock-evt\0", move || {
            loop {
                if self.pump_once() == PumpEvent::Idle {
                    std::thread::sleep(self.options.poll_interval);
                }
            }
        })
    }

    fn hand_out(&mut self, accepted: Result<(TlsClient, HeldClient), SocketError>) -> PumpEvent {
        match accepted {
            Ok((client, held)) => {
                let id = held.id;
                let peer = client.peer;
                self.held = Some(held);
                self.events.on_connect(Ok(Accepted { id, peer, client }));
                PumpEvent::Connected(id)
            }
            Err(e) => {
                self.events.on_connect(Err(e));
                PumpEvent::AcceptFailed(e)
            }
        }
    }

    fn drop_held(&mut self, id: ClientId) -> PumpEvent {
        self.held = None;
        self.events.on_disconnect(id);
        PumpEvent::Disconnected(id)
    }

    // ── Platform helpers: accept ──────────────────────────────

    #[cfg(target_os = "espidf")]
    fn poll_accept(&mut self) -> PumpEvent {
        let Some(result) = esp_impl::esp_accept(&self.listener, self.options.recv_timeout) else {
            return PumpEvent::Idle;
        };
        let id = self.allocate_id();
        let accepted = result.map(|(inner, probe, peer)| {
            let alive = Arc::new(AtomicBool::new(true));
            info!("TLS(espidf): client {} from {} handshake complete", id, peer);
            (
                TlsClient {
                    peer,
                    alive: Arc::clone(&alive),
                    inner,
                },
                HeldClient { id, alive, probe },
            )
        });
        self.hand_out(accepted)
    }

    #[cfg(not(target_os = "espidf"))]
    fn poll_accept(&mut self) -> PumpEvent {
        let (stream, peer) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return PumpEvent::Idle,
            Err(e) => {
                warn!("TLS(sim): accept error: {}", e);
                return self.hand_out(Err(map_io_error(&e)));
            }
        };

        let id = self.allocate_id();
        let accepted = self.prepare_stream(stream).map(|(stream, probe)| {
            info!("TLS(sim): client {} connected from {}", id, peer);
            let alive = Arc::new(AtomicBool::new(true));
            (
                TlsClient {
                    peer,
                    alive: Arc::clone(&alive),
                    stream,
                },
                HeldClient { id, alive, probe },
            )
        });
        if let Err(e) = accepted {
            warn!("TLS(sim): failed to configure client socket from {}: {}", peer, e);
        }
        self.hand_out(accepted)
    }

    #[cfg(not(target_os = "espidf"))]
    fn prepare_stream(&self, stream: TcpStream) -> Result<(TcpStream, TcpStream), SocketError> {
        // Accepted sockets may inherit the listener's non-blocking flag.
        stream
            .set_nonblocking(false)
            .and_then(|()| stream.set_read_timeout(Some(self.options.recv_timeout)))
            .and_then(|()| stream.set_nodelay(true))
            .map_err(|e| map_io_error(&e))?;
        let probe = stream.try_clone().map_err(|e| map_io_error(&e))?;
        Ok((stream, probe))
    }

    // ── Platform helpers: readiness ───────────────────────────

    #[cfg(target_os = "espidf")]
    fn poll_held(&mut self) -> PumpEvent {
        let Some(held) = self.held.as_ref() else {
            return PumpEvent::Idle;
        };
        let id = held.id;
        match held.probe.poll() {
            esp_impl::Readiness::Pending => PumpEvent::Idle,
            esp_impl::Readiness::Data => {
                self.events.on_receive(id);
                PumpEvent::Received(id)
            }
            esp_impl::Readiness::Closed => {
                info!("TLS(espidf): client {} closed the connection", id);
                self.drop_held(id)
            }
            esp_impl::Readiness::Error(errno) => {
                warn!("TLS(espidf): client {} socket error (errno={})", id, errno);
                self.drop_held(id)
            }
        }
    }

    /// Blocks for at most the receive timeout: the probe shares the
    /// client socket's options.
    #[cfg(not(target_os = "espidf"))]
    fn poll_held(&mut self) -> PumpEvent {
        let Some(held) = self.held.as_ref() else {
            return PumpEvent::Idle;
        };
        let id = held.id;
        let mut byte = [0u8; 1];
        match held.probe.peek(&mut byte) {
            Ok(0) => {
                info!("TLS(sim): client {} closed the connection (EOF)", id);
                self.drop_held(id)
            }
            Ok(_) => {
                self.events.on_receive(id);
                PumpEvent::Received(id)
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                PumpEvent::Idle
            }
            Err(e) => {
                warn!("TLS(sim): client {} socket error: {}", id, e);
                self.drop_held(id)
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests (host / simulation path only)
// ───────────────────────────────────────────────────────────────
