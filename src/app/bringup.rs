//! Network bring-up.
//!
//! [`bring_up`] drives any [`NetworkLink`]: one `init`, then up to
//! `max_attempts` connection attempts back to back. The address it returns
//! is chosen by the build-time [`IpMode`], never both families.

use core::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};

use log::{error, info, warn};

use super::ports::NetworkLink;
use crate::config::IpMode;
use crate::error::BringUpError;

// ───────────────────────────────────────────────────────────────
// Local address
// ───────────────────────────────────────────────────────────────

/// The address the server binds to after bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAddress {
    V4(Ipv4Addr),
    V6LinkLocal { addr: Ipv6Addr, scope_id: u32 },
}

impl LocalAddress {
    /// Bind address for `port`. Link-local IPv6 keeps its interface scope.
    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        match *self {
            Self::V4(ip) => SocketAddr::new(IpAddr::V4(ip), port),
            Self::V6LinkLocal { addr, scope_id } => {
                SocketAddr::V6(SocketAddrV6::new(addr, port, 0, scope_id))
            }
        }
    }
}

impl fmt::Display for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4(ip) => write!(f, "{ip}"),
            Self::V6LinkLocal { addr, scope_id } => write!(f, "{addr}%{scope_id}"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Bring-up
// ───────────────────────────────────────────────────────────────

/// Initialise `link` and connect it, giving up after `max_attempts`
/// consecutive failures.
///
/// There is no delay between attempts beyond what `connect` itself blocks
/// for. Any error returned here is fatal to the caller.
pub fn bring_up<L: NetworkLink>(
    link: &mut L,
    mode: IpMode,
    max_attempts: u8,
) -> Result<LocalAddress, BringUpError> {
    link.init().map_err(|e| {
        error!("Link: interface init failed: {}", e);
        BringUpError::Init(e)
    })?;

    let mut attempts = 0u8;
    let ipv4 = loop {
        attempts += 1;
        match link.connect() {
            Ok(ip) => break ip,
            Err(e) => {
                warn!(
                    "Link: connect attempt {}/{} failed: {}",
                    attempts, max_attempts, e
                );
                if attempts >= max_attempts {
                    error!("Link: giving up after {} attempts", attempts);
                    return Err(BringUpError::RetriesExhausted { attempts, last: e });
                }
            }
        }
    };

    let local = match mode {
        IpMode::V4 => LocalAddress::V4(ipv4),
        IpMode::V6LinkLocal => {
            let (addr, scope_id) = link.ipv6_link_local().map_err(|e| {
                error!("Link: no IPv6 link-local address: {}", e);
                BringUpError::AddressUnavailable(e)
            })?;
            LocalAddress::V6LinkLocal { addr, scope_id }
        }
    };

    info!("Link: up after {} attempt(s), local address {}", attempts, local);
    Ok(local)
}
