//! ESP-IDF platform helpers for the secure listening socket.
//!
//! This module is compiled only for `target_os = "espidf"` and contains the
//! real lwIP TCP socket + mbedTLS X.509 implementation.
//!
//! All public items are `pub(super)` to keep them private to the adapters
//! module.

use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use log::{info, warn};

use esp_idf_svc::sys::{
    AF_INET, AF_INET6, EAGAIN, EWOULDBLOCK, F_SETFL, MBEDTLS_ERR_SSL_PEER_CLOSE_NOTIFY,
    MBEDTLS_ERR_SSL_WANT_READ, MBEDTLS_ERR_SSL_WANT_WRITE, MBEDTLS_SSL_IS_SERVER,
    MBEDTLS_SSL_PRESET_DEFAULT, MBEDTLS_SSL_TRANSPORT_STREAM, MBEDTLS_SSL_VERIFY_REQUIRED,
    MSG_DONTWAIT, MSG_PEEK, O_NONBLOCK, SO_RCVTIMEO, SOCK_STREAM, SOL_SOCKET, lwip_accept,
    lwip_bind, lwip_close, lwip_fcntl, lwip_htons, lwip_listen, lwip_recv, lwip_send,
    lwip_setsockopt, lwip_socket, mbedtls_ctr_drbg_context, mbedtls_ctr_drbg_free,
    mbedtls_ctr_drbg_init, mbedtls_ctr_drbg_random, mbedtls_ctr_drbg_seed,
    mbedtls_entropy_context, mbedtls_entropy_free, mbedtls_entropy_func, mbedtls_entropy_init,
    mbedtls_pk_context, mbedtls_pk_free, mbedtls_pk_init, mbedtls_pk_parse_key,
    mbedtls_ssl_close_notify, mbedtls_ssl_conf_authmode, mbedtls_ssl_conf_ca_chain,
    mbedtls_ssl_conf_own_cert, mbedtls_ssl_conf_rng, mbedtls_ssl_config,
    mbedtls_ssl_config_defaults, mbedtls_ssl_config_free, mbedtls_ssl_config_init,
    mbedtls_ssl_context, mbedtls_ssl_free, mbedtls_ssl_handshake, mbedtls_ssl_init,
    mbedtls_ssl_read, mbedtls_ssl_set_bio, mbedtls_ssl_setup, mbedtls_ssl_write,
    mbedtls_x509_crt, mbedtls_x509_crt_free, mbedtls_x509_crt_init, mbedtls_x509_crt_parse,
    sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t, timeval, vTaskDelay,
};

use super::{ListenerOptions, ServerIdentity};
use crate::error::{SetupError, SetupStep, SocketError};

/// Maximum TLS handshake retries before giving up (non-blocking loop).
const HANDSHAKE_MAX_RETRIES: u32 = 200;

fn errno() -> i32 {
    // SAFETY: __errno() returns the pointer to the current task errno,
    // which is valid to read in any task context.
    unsafe { *esp_idf_svc::sys::__errno() }
}

fn would_block(err: i32) -> bool {
    err == EAGAIN as i32 || err == EWOULDBLOCK as i32
}

// ── BIO callbacks ─────────────────────────────────────────────────────────────
//
// mbedTLS calls these to send/receive raw bytes over the underlying transport.
// We pass the socket fd as a void pointer via the `p_bio` context.

/// # Safety
///
/// `ctx` must be a raw file descriptor cast to `*mut c_void`, valid for the
/// lifetime of the TLS session.
unsafe extern "C" fn bio_send(
    ctx: *mut core::ffi::c_void,
    buf: *const u8,
    len: usize,
) -> core::ffi::c_int {
    let fd = ctx as core::ffi::c_int;
    let ret = unsafe { lwip_send(fd, buf.cast(), len, 0) } as core::ffi::c_int;
    if ret < 0 && would_block(errno()) {
        return MBEDTLS_ERR_SSL_WANT_WRITE;
    }
    ret
}

/// # Safety
///
/// Same invariants as `bio_send`. EAGAIN (no data within `SO_RCVTIMEO`, or
/// nothing pending during the non-blocking handshake) maps to
/// `MBEDTLS_ERR_SSL_WANT_READ`.
unsafe extern "C" fn bio_recv(
    ctx: *mut core::ffi::c_void,
    buf: *mut u8,
    len: usize,
) -> core::ffi::c_int {
    let fd = ctx as core::ffi::c_int;
    let ret = unsafe { lwip_recv(fd, buf.cast(), len, 0) } as core::ffi::c_int;
    if ret < 0 && would_block(errno()) {
        return MBEDTLS_ERR_SSL_WANT_READ;
    }
    ret
}

// ── Socket address conversion ─────────────────────────────────────────────────

fn to_sockaddr(addr: SocketAddr) -> (sockaddr_storage, socklen_t) {
    // SAFETY: sockaddr_storage is plain old data; all-zero is a valid value.
    let mut storage: sockaddr_storage = unsafe { core::mem::zeroed() };
    match addr {
        SocketAddr::V4(v4) => {
            // SAFETY: sockaddr_storage is large enough and suitably aligned
            // for every sockaddr variant.
            let sin = unsafe { &mut *core::ptr::addr_of_mut!(storage).cast::<sockaddr_in>() };
            sin.sin_len = core::mem::size_of::<sockaddr_in>() as _;
            sin.sin_family = AF_INET as _;
            // SAFETY: pure byte-order conversion.
            sin.sin_port = unsafe { lwip_htons(v4.port()) };
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            (storage, core::mem::size_of::<sockaddr_in>() as socklen_t)
        }
        SocketAddr::V6(v6) => {
            // SAFETY: as above.
            let sin6 = unsafe { &mut *core::ptr::addr_of_mut!(storage).cast::<sockaddr_in6>() };
            sin6.sin6_len = core::mem::size_of::<sockaddr_in6>() as _;
            sin6.sin6_family = AF_INET6 as _;
            // SAFETY: pure byte-order conversion.
            sin6.sin6_port = unsafe { lwip_htons(v6.port()) };
            sin6.sin6_scope_id = v6.scope_id();
            // SAFETY: sin6_addr is 16 bytes of address in network order.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    v6.ip().octets().as_ptr(),
                    core::ptr::addr_of_mut!(sin6.sin6_addr).cast::<u8>(),
                    16,
                );
            }
            (storage, core::mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

fn from_sockaddr(storage: &sockaddr_storage) -> Option<SocketAddr> {
    match u32::from(storage.ss_family) {
        f if f == AF_INET => {
            // SAFETY: family says this is a sockaddr_in.
            let sin = unsafe { &*core::ptr::addr_of!(*storage).cast::<sockaddr_in>() };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Some(SocketAddr::new(IpAddr::V4(ip), u16::from_be(sin.sin_port)))
        }
        f if f == AF_INET6 => {
            // SAFETY: family says this is a sockaddr_in6.
            let sin6 = unsafe { &*core::ptr::addr_of!(*storage).cast::<sockaddr_in6>() };
            let mut octets = [0u8; 16];
            // SAFETY: sin6_addr is 16 bytes.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    core::ptr::addr_of!(sin6.sin6_addr).cast::<u8>(),
                    octets.as_mut_ptr(),
                    16,
                );
            }
            Some(SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(octets)),
                u16::from_be(sin6.sin6_port),
            ))
        }
        _ => None,
    }
}

fn set_recv_timeout(fd: core::ffi::c_int, timeout: Duration) -> Result<(), i32> {
    let tv = timeval {
        tv_sec: timeout.as_secs() as _,
        tv_usec: timeout.subsec_micros() as _,
    };
    // SAFETY: `tv` is a valid timeval for the duration of the call.
    let rc = unsafe {
        lwip_setsockopt(
            fd,
            SOL_SOCKET as _,
            SO_RCVTIMEO as _,
            core::ptr::addr_of!(tv).cast(),
            core::mem::size_of::<timeval>() as socklen_t,
        )
    };
    if rc < 0 { Err(errno()) } else { Ok(()) }
}

/// mbedTLS PEM parsers require the terminating NUL to be part of the input.
fn nul_terminated(pem: &[u8]) -> Cow<'_, [u8]> {
    if pem.last() == Some(&0) {
        Cow::Borrowed(pem)
    } else {
        let mut v = Vec::with_capacity(pem.len() + 1);
        v.extend_from_slice(pem);
        v.push(0);
        Cow::Owned(v)
    }
}

// ── Session state ─────────────────────────────────────────────────────────────

/// Per-connection TLS state (heap-allocated to limit stack pressure).
pub(super) struct EspTlsClient {
    fd: core::ffi::c_int,
    ssl: Box<mbedtls_ssl_context>,
    closed: bool,
}

// SAFETY: the session is only ever used by its single owner.
unsafe impl Send for EspTlsClient {}

impl EspTlsClient {
    pub(super) fn write(&mut self, data: &[u8]) -> Result<usize, SocketError> {
        // SAFETY: ssl is valid and handshaken; data is a valid slice.
        let rc = unsafe { mbedtls_ssl_write(self.ssl.as_mut(), data.as_ptr(), data.len()) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        if rc == MBEDTLS_ERR_SSL_WANT_WRITE {
            return Err(SocketError::WouldBlock);
        }
        let err = errno();
        // lwIP reports a reset or closed peer through the raw send.
        if err == esp_idf_svc::sys::ECONNRESET as i32
            || err == esp_idf_svc::sys::ENOTCONN as i32
            || err == esp_idf_svc::sys::EPIPE as i32
        {
            return Err(SocketError::PeerClosed);
        }
        warn!("TLS(espidf): ssl_write error (rc={}, errno={})", rc, err);
        Err(SocketError::Tls(rc))
    }

    pub(super) fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        // SAFETY: ssl is valid and handshaken; buf is a valid mutable slice.
        let rc = unsafe { mbedtls_ssl_read(self.ssl.as_mut(), buf.as_mut_ptr(), buf.len()) };
        if rc > 0 {
            return Ok(rc as usize);
        }
        if rc == MBEDTLS_ERR_SSL_WANT_READ {
            return Err(SocketError::WouldBlock);
        }
        if rc == MBEDTLS_ERR_SSL_PEER_CLOSE_NOTIFY || rc == 0 {
            return Err(SocketError::PeerClosed);
        }
        warn!("TLS(espidf): ssl_read error (rc={})", rc);
        Err(SocketError::Tls(rc))
    }

    /// Send close_notify once; the socket itself is closed on drop.
    pub(super) fn close_notify(&mut self) {
        if !self.closed {
            self.closed = true;
            // SAFETY: ssl is valid; close_notify is idempotent at the TLS level.
            unsafe {
                mbedtls_ssl_close_notify(self.ssl.as_mut());
            }
        }
    }
}

impl Drop for EspTlsClient {
    fn drop(&mut self) {
        self.close_notify();
        // SAFETY: `ssl` was initialised by `mbedtls_ssl_init`/`mbedtls_ssl_setup`
        // and `fd` is a valid socket; both are freed/closed exactly once here.
        unsafe {
            mbedtls_ssl_free(self.ssl.as_mut());
            lwip_close(self.fd);
        }
    }
}

/// Readiness of the held client's socket.
pub(super) enum Readiness {
    Pending,
    Data,
    Closed,
    Error(i32),
}

/// Non-consuming readiness check on a client socket.
///
/// Peeks the raw socket, so data mbedTLS already decrypted into its own
/// buffer is not seen. Acknowledgements fit in a single record.
pub(super) struct Probe {
    fd: core::ffi::c_int,
}

impl Probe {
    pub(super) fn poll(&self) -> Readiness {
        let mut byte = 0u8;
        // SAFETY: one-byte peek into a stack byte; MSG_DONTWAIT never blocks.
        let rc = unsafe {
            lwip_recv(
                self.fd,
                core::ptr::addr_of_mut!(byte).cast(),
                1,
                (MSG_PEEK | MSG_DONTWAIT) as _,
            )
        };
        match rc {
            n if n > 0 => Readiness::Data,
            0 => Readiness::Closed,
            _ => {
                let err = errno();
                if would_block(err) {
                    Readiness::Pending
                } else {
                    Readiness::Error(err)
                }
            }
        }
    }
}

// ── Listener (socket + TLS config) ───────────────────────────────────────────

/// Loaded X.509 material; mbedTLS references it from the ssl_config.
struct X509Context {
    server_cert: Box<mbedtls_x509_crt>,
    ca_cert: Box<mbedtls_x509_crt>,
    server_key: Box<mbedtls_pk_context>,
}

impl Drop for X509Context {
    fn drop(&mut self) {
        // SAFETY: all fields were initialised by the *_init calls and are
        // freed exactly once.
        unsafe {
            mbedtls_x509_crt_free(self.server_cert.as_mut());
            mbedtls_x509_crt_free(self.ca_cert.as_mut());
            mbedtls_pk_free(self.server_key.as_mut());
        }
    }
}

/// Long-lived listening socket + mbedTLS config + RNG.
///
/// Client sessions reference `conf`; the listener outlives every client
/// because the server never stops listening.
pub(super) struct EspTlsListener {
    fd: core::ffi::c_int,
    conf: Box<mbedtls_ssl_config>,
    entropy: Box<mbedtls_entropy_context>,
    drbg: Box<mbedtls_ctr_drbg_context>,
    x509: Option<X509Context>,
}

// SAFETY: owned and used by the socket event loop thread only.
unsafe impl Send for EspTlsListener {}
// SAFETY: the probe fd is only read by the event loop thread.
unsafe impl Send for Probe {}

impl Drop for EspTlsListener {
    fn drop(&mut self) {
        self.x509 = None;
        // SAFETY: all fields were initialised in `esp_listen` and are
        // freed exactly once.
        unsafe {
            mbedtls_ssl_config_free(self.conf.as_mut());
            mbedtls_ctr_drbg_free(self.drbg.as_mut());
            mbedtls_entropy_free(self.entropy.as_mut());
            if self.fd >= 0 {
                lwip_close(self.fd);
            }
        }
    }
}

/// Create, configure, bind and listen, in that order.
pub(super) fn esp_listen(
    identity: &ServerIdentity,
    trusted_roots: &[u8],
    bind_addr: SocketAddr,
    options: ListenerOptions,
) -> Result<EspTlsListener, SetupError> {
    let mut listener = EspTlsListener {
        fd: -1,
        conf: Box::new(mbedtls_ssl_config::default()),
        entropy: Box::new(mbedtls_entropy_context::default()),
        drbg: Box::new(mbedtls_ctr_drbg_context::default()),
        x509: None,
    };
    // SAFETY: the contexts are Box-owned and initialised before any use;
    // Drop on the partially built listener frees whatever was set up.
    unsafe {
        mbedtls_ssl_config_init(listener.conf.as_mut());
        mbedtls_entropy_init(listener.entropy.as_mut());
        mbedtls_ctr_drbg_init(listener.drbg.as_mut());
    }

    // ── Step 1: socket ────────────────────────────────────────────────────
    let domain = if bind_addr.is_ipv6() { AF_INET6 } else { AF_INET };
    // SAFETY: lwIP socket call with valid domain/type/protocol.
    listener.fd = unsafe { lwip_socket(domain as _, SOCK_STREAM as _, 0) };
    if listener.fd < 0 {
        return Err(SetupError::new(SetupStep::CreateSocket, errno()));
    }

    // ── Step 2: receive timeout ───────────────────────────────────────────
    set_recv_timeout(listener.fd, options.recv_timeout)
        .map_err(|e| SetupError::new(SetupStep::SetRecvTimeout, e))?;

    // Step 3 (event callbacks) is owned by the caller.

    // ── Step 4: TLS identity ──────────────────────────────────────────────
    let cert = nul_terminated(&identity.cert);
    let key = nul_terminated(&identity.key);
    let roots = nul_terminated(trusted_roots);
    let mut x509 = X509Context {
        server_cert: Box::new(mbedtls_x509_crt::default()),
        ca_cert: Box::new(mbedtls_x509_crt::default()),
        server_key: Box::new(mbedtls_pk_context::default()),
    };

    // SAFETY: all pointers come from Box::as_mut() and are valid, aligned
    // and exclusively owned. The calls follow ssl.h / ctr_drbg.h / x509_crt.h.
    unsafe {
        mbedtls_x509_crt_init(x509.server_cert.as_mut());
        mbedtls_x509_crt_init(x509.ca_cert.as_mut());
        mbedtls_pk_init(x509.server_key.as_mut());

        let seed_label = b"ledlink-tls";
        let rc = mbedtls_ctr_drbg_seed(
            listener.drbg.as_mut(),
            Some(mbedtls_entropy_func),
            core::ptr::addr_of_mut!(*listener.entropy).cast(),
            seed_label.as_ptr(),
            seed_label.len(),
        );
        if rc != 0 {
            return Err(SetupError::new(SetupStep::AttachIdentity, rc));
        }

        let rc = mbedtls_ssl_config_defaults(
            listener.conf.as_mut(),
            MBEDTLS_SSL_IS_SERVER as _,
            MBEDTLS_SSL_TRANSPORT_STREAM as _,
            MBEDTLS_SSL_PRESET_DEFAULT as _,
        );
        if rc != 0 {
            return Err(SetupError::new(SetupStep::AttachIdentity, rc));
        }
        mbedtls_ssl_conf_rng(
            listener.conf.as_mut(),
            Some(mbedtls_ctr_drbg_random),
            core::ptr::addr_of_mut!(*listener.drbg).cast(),
        );

        let rc = mbedtls_x509_crt_parse(x509.server_cert.as_mut(), cert.as_ptr(), cert.len());
        if rc != 0 {
            warn!("TLS(espidf): x509_crt_parse(server) failed (rc={})", rc);
            return Err(SetupError::new(SetupStep::AttachIdentity, rc));
        }
        let rc = mbedtls_pk_parse_key(
            x509.server_key.as_mut(),
            key.as_ptr(),
            key.len(),
            core::ptr::null(),
            0,
            Some(mbedtls_ctr_drbg_random),
            core::ptr::addr_of_mut!(*listener.drbg).cast(),
        );
        if rc != 0 {
            warn!("TLS(espidf): pk_parse_key failed (rc={})", rc);
            return Err(SetupError::new(SetupStep::AttachIdentity, rc));
        }
        let rc = mbedtls_ssl_conf_own_cert(
            listener.conf.as_mut(),
            x509.server_cert.as_mut(),
            x509.server_key.as_mut(),
        );
        if rc != 0 {
            return Err(SetupError::new(SetupStep::AttachIdentity, rc));
        }

        // ── Step 5: peer certificate required ─────────────────────────────
        let rc = mbedtls_x509_crt_parse(x509.ca_cert.as_mut(), roots.as_ptr(), roots.len());
        if rc != 0 {
            warn!("TLS(espidf): x509_crt_parse(ca) failed (rc={})", rc);
            return Err(SetupError::new(SetupStep::SetAuthMode, rc));
        }
        mbedtls_ssl_conf_ca_chain(
            listener.conf.as_mut(),
            x509.ca_cert.as_mut(),
            core::ptr::null_mut(),
        );
        mbedtls_ssl_conf_authmode(listener.conf.as_mut(), MBEDTLS_SSL_VERIFY_REQUIRED as _);
    }
    listener.x509 = Some(x509);

    // ── Step 6: bind ──────────────────────────────────────────────────────
    let (addr, len) = to_sockaddr(bind_addr);
    // SAFETY: `addr` is valid for the bind() call.
    let rc = unsafe {
        lwip_bind(
            listener.fd,
            core::ptr::addr_of!(addr).cast::<sockaddr>(),
            len,
        )
    };
    if rc < 0 {
        return Err(SetupError::new(SetupStep::Bind, errno()));
    }

    // ── Step 7: listen ────────────────────────────────────────────────────
    if options.backlog == 0 {
        return Err(SetupError::new(SetupStep::Listen, super::EINVAL));
    }
    // SAFETY: fd is a bound stream socket.
    let rc = unsafe { lwip_listen(listener.fd, i32::from(options.backlog)) };
    if rc < 0 {
        return Err(SetupError::new(SetupStep::Listen, errno()));
    }
    // Accept polling must never block the event loop.
    // SAFETY: F_SETFL + O_NONBLOCK is a valid fcntl for sockets.
    let rc = unsafe { lwip_fcntl(listener.fd, F_SETFL as _, O_NONBLOCK as _) };
    if rc < 0 {
        return Err(SetupError::new(SetupStep::Listen, errno()));
    }

    info!("TLS(espidf): listening on {} (peer certificate required)", bind_addr);
    Ok(listener)
}

/// Non-blocking accept + TLS handshake with client certificate verification.
///
/// Returns `None` if no client is waiting.
pub(super) fn esp_accept(
    listener: &EspTlsListener,
    recv_timeout: Duration,
) -> Option<Result<(EspTlsClient, Probe, SocketAddr), SocketError>> {
    // SAFETY: sockaddr_storage is plain old data.
    let mut peer: sockaddr_storage = unsafe { core::mem::zeroed() };
    let mut peer_len = core::mem::size_of::<sockaddr_storage>() as socklen_t;
    // SAFETY: listener fd is valid and non-blocking; peer/peer_len are valid
    // out-pointers.
    let fd = unsafe {
        lwip_accept(
            listener.fd,
            core::ptr::addr_of_mut!(peer).cast::<sockaddr>(),
            &mut peer_len,
        )
    };
    if fd < 0 {
        let err = errno();
        if would_block(err) {
            return None;
        }
        warn!("TLS(espidf): accept failed (errno={})", err);
        return Some(Err(SocketError::Io(err)));
    }
    let peer = from_sockaddr(&peer).unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));

    Some(handshake(listener, fd, peer, recv_timeout))
}

fn handshake(
    listener: &EspTlsListener,
    fd: core::ffi::c_int,
    peer: SocketAddr,
    recv_timeout: Duration,
) -> Result<(EspTlsClient, Probe, SocketAddr), SocketError> {
    // Non-blocking for the handshake loop.
    // SAFETY: F_SETFL is valid on a connected socket.
    if unsafe { lwip_fcntl(fd, F_SETFL as _, O_NONBLOCK as _) } < 0 {
        let err = errno();
        // SAFETY: fd is owned here and closed once.
        unsafe { lwip_close(fd) };
        return Err(SocketError::Io(err));
    }

    // From here on, EspTlsClient::drop frees the session and closes fd.
    let mut client = EspTlsClient {
        fd,
        ssl: Box::new(mbedtls_ssl_context::default()),
        closed: true,
    };

    // SAFETY: ssl is Box-owned; conf outlives the session (see
    // EspTlsListener). The BIO context is the fd, valid for the session.
    unsafe {
        mbedtls_ssl_init(client.ssl.as_mut());
        let rc = mbedtls_ssl_setup(client.ssl.as_mut(), listener.conf.as_ref());
        if rc != 0 {
            warn!("TLS(espidf): ssl_setup failed (rc={})", rc);
            return Err(SocketError::Tls(rc));
        }
        mbedtls_ssl_set_bio(
            client.ssl.as_mut(),
            fd as usize as *mut core::ffi::c_void,
            Some(bio_send),
            Some(bio_recv),
            None,
        );
    }

    let mut retries = 0u32;
    loop {
        // SAFETY: ssl is initialised, BIO callbacks set, conf valid.
        let rc = unsafe { mbedtls_ssl_handshake(client.ssl.as_mut()) };
        if rc == 0 {
            break;
        }
        if rc == MBEDTLS_ERR_SSL_WANT_READ || rc == MBEDTLS_ERR_SSL_WANT_WRITE {
            retries += 1;
            if retries >= HANDSHAKE_MAX_RETRIES {
                warn!("TLS(espidf): handshake with {} timed out", peer);
                return Err(SocketError::WouldBlock);
            }
            // Yield 1 FreeRTOS tick to allow lwIP to receive in-flight data.
            // SAFETY: vTaskDelay is safe to call from any task context.
            unsafe { vTaskDelay(1) };
            continue;
        }
        // Fatal handshake error (bad or missing client certificate, protocol error).
        warn!("TLS(espidf): handshake with {} failed (rc={})", peer, rc);
        return Err(SocketError::Tls(rc));
    }
    client.closed = false;

    // Back to blocking reads bounded by the receive timeout.
    // SAFETY: clearing all file status flags on a valid socket.
    if unsafe { lwip_fcntl(fd, F_SETFL as _, 0) } < 0 {
        return Err(SocketError::Io(errno()));
    }
    set_recv_timeout(fd, recv_timeout).map_err(SocketError::Io)?;

    Ok((client, Probe { fd }, peer))
}
