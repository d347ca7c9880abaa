//! Unified error types for the LedLink firmware.
//!
//! Every subsystem owns a small `Copy` error enum; all of them convert into
//! the top-level [`Error`] so `main` can treat setup failures uniformly.
//! Runtime socket errors ([`SocketError`]) never reach `main`; the
//! connection state machine classifies them as transient or peer-closed.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fatal startup failure funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The network link could not be brought up.
    BringUp(BringUpError),
    /// The secure listening socket could not be created.
    Setup(SetupError),
    /// Configuration is invalid.
    Config(ConfigError),
    /// TLS identity material could not be loaded.
    Identity(CertStoreError),
    /// Peripheral initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BringUp(e) => write!(f, "bring-up: {e}"),
            Self::Setup(e) => write!(f, "setup: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Identity(e) => write!(f, "identity: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Network link errors
// ---------------------------------------------------------------------------

/// Failure reported by a [`NetworkLink`](crate::app::ports::NetworkLink).
/// The payload is the platform error code (`esp_err_t` on device).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Interface or driver initialisation failed.
    InitFailed(i32),
    /// A single connection attempt failed.
    ConnectFailed(i32),
    /// The link is up but the requested address is not assigned.
    NoAddress,
    /// Credentials are missing or malformed.
    NoCredentials,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed(rc) => write!(f, "interface init failed (rc={rc})"),
            Self::ConnectFailed(rc) => write!(f, "connect failed (rc={rc})"),
            Self::NoAddress => write!(f, "no address assigned"),
            Self::NoCredentials => write!(f, "no network credentials configured"),
        }
    }
}

/// Outcome of a failed [`bring_up`](crate::app::bringup::bring_up).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpError {
    /// The interface could not be initialised; no connect was attempted.
    Init(LinkError),
    /// Every connection attempt failed.
    RetriesExhausted { attempts: u8, last: LinkError },
    /// Connected, but the configured address family is unavailable.
    AddressUnavailable(LinkError),
}

impl fmt::Display for BringUpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(e) => write!(f, "link init: {e}"),
            Self::RetriesExhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts (last: {last})")
            }
            Self::AddressUnavailable(e) => write!(f, "address unavailable: {e}"),
        }
    }
}

impl From<BringUpError> for Error {
    fn from(e: BringUpError) -> Self {
        Self::BringUp(e)
    }
}

// ---------------------------------------------------------------------------
// Listening socket setup errors
// ---------------------------------------------------------------------------

/// The ordered steps of secure listening socket setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    CreateSocket,
    SetRecvTimeout,
    AttachEvents,
    AttachIdentity,
    SetAuthMode,
    Bind,
    Listen,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateSocket => "create socket",
            Self::SetRecvTimeout => "set receive timeout",
            Self::AttachEvents => "attach event callbacks",
            Self::AttachIdentity => "attach TLS identity",
            Self::SetAuthMode => "set TLS auth mode",
            Self::Bind => "bind",
            Self::Listen => "listen",
        };
        f.write_str(name)
    }
}

/// A setup step failed with the given platform code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupError {
    pub step: SetupStep,
    pub code: i32,
}

impl SetupError {
    pub const fn new(step: SetupStep, code: i32) -> Self {
        Self { step, code }
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed (code={})", self.step, self.code)
    }
}

impl From<SetupError> for Error {
    fn from(e: SetupError) -> Self {
        Self::Setup(e)
    }
}

// ---------------------------------------------------------------------------
// Runtime socket errors
// ---------------------------------------------------------------------------

/// Errors from a client socket or the accept path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    /// The remote end closed the connection.
    PeerClosed,
    /// No data within the receive timeout, or the operation would block.
    WouldBlock,
    /// TCP-level failure with the platform errno.
    Io(i32),
    /// TLS handshake or record failure with the TLS library code.
    Tls(i32),
}

impl SocketError {
    /// Peer-closed errors are treated as an implicit disconnect.
    pub fn is_peer_closed(self) -> bool {
        self == Self::PeerClosed
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::WouldBlock => write!(f, "operation timed out"),
            Self::Io(rc) => write!(f, "socket I/O error (errno={rc})"),
            Self::Tls(rc) => write!(f, "TLS error (rc={rc})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field is outside its valid range.
    ValidationFailed(&'static str),
    /// A persisted blob could not be decoded.
    Decode,
    /// The config could not be encoded.
    Encode,
    /// The backing store reported an error code.
    Storage(i32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(field) => write!(f, "invalid value for '{field}'"),
            Self::Decode => write!(f, "stored config could not be decoded"),
            Self::Encode => write!(f, "config could not be encoded"),
            Self::Storage(code) => write!(f, "config store error {code}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Certificate store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStoreError {
    /// The backing store (NVS partition or directory) is unavailable.
    StoreUnavailable,
    /// A required component is missing or empty.
    Missing(&'static str),
    /// A component exceeds its fixed buffer capacity.
    TooLarge(&'static str),
    /// Writing a component failed.
    WriteFailed,
}

impl fmt::Display for CertStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreUnavailable => write!(f, "certificate store unavailable"),
            Self::Missing(key) => write!(f, "'{key}' missing"),
            Self::TooLarge(key) => write!(f, "'{key}' too large"),
            Self::WriteFailed => write!(f, "certificate write failed"),
        }
    }
}

impl From<CertStoreError> for Error {
    fn from(e: CertStoreError) -> Self {
        Self::Identity(e)
    }
}

impl std::error::Error for LinkError {}
impl std::error::Error for BringUpError {}
impl std::error::Error for SetupError {}
impl std::error::Error for SocketError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for CertStoreError {}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_peer_closed_is_peer_closed() {
        assert!(SocketError::PeerClosed.is_peer_closed());
        assert!(!SocketError::WouldBlock.is_peer_closed());
        assert!(!SocketError::Io(104).is_peer_closed());
        assert!(!SocketError::Tls(-0x7880).is_peer_closed());
    }

    #[test]
    fn setup_error_names_the_failing_step() {
        let e = Error::from(SetupError::new(SetupStep::Bind, 98));
        assert_eq!(e.to_string(), "setup: bind failed (code=98)");
    }

    #[test]
    fn retries_exhausted_reports_attempts() {
        let e = BringUpError::RetriesExhausted {
            attempts: 3,
            last: LinkError::ConnectFailed(-1),
        };
        assert_eq!(
            e.to_string(),
            "gave up after 3 attempts (last: connect failed (rc=-1))"
        );
    }
}
