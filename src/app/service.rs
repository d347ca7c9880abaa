//! Startup sequence and the command dispatch loop.
//!
//! ```text
//!  startup: validate config ─▶ bring_up ─▶ setup(bind addr) ─▶ socket
//!
//!  run:     ┌─────────────────────────────────────────────┐
//!           ▼                                             │
//!      signal.wait ─▶ ConnectionManager::send_command ────┘
//! ```
//!
//! Both startup stages are fatal: the socket is never set up unless the
//! link came up. The loop itself never exits.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};

use super::bringup::bring_up;
use super::command::CommandValue;
use super::connection::DispatchOutcome;
use super::context::ServerContext;
use super::ports::{NetworkLink, SecureClient};
use crate::config::{IpMode, ServerConfig};
use crate::error::{Error, SetupError};

// ───────────────────────────────────────────────────────────────
// Startup
// ───────────────────────────────────────────────────────────────

/// Validate `config`, bring `link` up, then hand the bind address to
/// `setup`.
///
/// `setup` runs at most once and only after bring-up succeeded. Whatever
/// it builds (the listening socket) is returned to the caller.
pub fn startup<L, S, F>(
    link: &mut L,
    config: &ServerConfig,
    mode: IpMode,
    setup: F,
) -> Result<S, Error>
where
    L: NetworkLink,
    F: FnOnce(SocketAddr) -> Result<S, SetupError>,
{
    config.validate().inspect_err(|e| {
        error!("Startup: invalid configuration: {}", e);
    })?;

    let local = bring_up(link, mode, config.max_link_attempts)?;
    let bind_addr = local.socket_addr(config.port);

    let socket = setup(bind_addr).inspect_err(|e| {
        error!("Startup: secure socket setup failed: {}", e);
    })?;
    info!("Startup: listening on {}", bind_addr);
    Ok(socket)
}

// ───────────────────────────────────────────────────────────────
// Dispatch loop
// ───────────────────────────────────────────────────────────────

/// Forwards signalled commands to the connected client.
pub struct CommandServer<C> {
    ctx: Arc<ServerContext<C>>,
    /// Signal drop count already reported.
    reported_drops: u32,
}

impl<C: SecureClient> CommandServer<C> {
    pub fn new(ctx: Arc<ServerContext<C>>) -> Self {
        Self {
            ctx,
            reported_drops: 0,
        }
    }

    pub fn context(&self) -> &Arc<ServerContext<C>> {
        &self.ctx
    }

    /// Forward one command. Idle commands are discarded silently.
    pub fn dispatch(&self, command: CommandValue) -> DispatchOutcome {
        let outcome = self.ctx.connection.send_command(command);
        match outcome {
            DispatchOutcome::Sent(_) => {}
            DispatchOutcome::Discarded(cmd) => debug!("Dispatch: idle, {:?} dropped", cmd),
            DispatchOutcome::PeerClosed => info!("Dispatch: client gone, back to idle"),
            DispatchOutcome::Failed(e) => warn!("Dispatch: send failed, keeping client: {}", e),
        }
        outcome
    }

    /// Block until the next command arrives, then forward it.
    pub fn dispatch_next(&mut self) -> DispatchOutcome {
        let command = self.ctx.signal.wait_blocking();
        self.report_drops();
        self.dispatch(command)
    }

    /// Forward the pending command, if there is one.
    pub fn try_dispatch(&mut self) -> Option<DispatchOutcome> {
        let command = self.ctx.signal.try_take()?;
        self.report_drops();
        Some(self.dispatch(command))
    }

    /// Serve forever.
    pub fn run(mut self) -> ! {
        info!("Dispatch: waiting for button presses");
        loop {
            self.dispatch_next();
        }
    }

    // Drops are counted in the ISR, which cannot log.
    fn report_drops(&mut self) {
        let dropped = self.ctx.signal.dropped();
        let new = dropped.wrapping_sub(self.reported_drops);
        if new > 0 {
            warn!("Dispatch: {} press(es) dropped while a command was pending", new);
            self.reported_drops = dropped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::command::LedState;
    use crate::app::context::LedMirror;
    use crate::app::ports::{Accepted, ClientId, SocketEvents};
    use crate::error::{BringUpError, LinkError, SetupStep, SocketError};
    use std::cell::Cell;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct WireLog(Arc<Mutex<Vec<u8>>>);

    impl SecureClient for WireLog {
        fn send(&mut self, data: &[u8]) -> Result<usize, SocketError> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn recv(&mut self, _buf: &mut [u8]) -> Result<usize, SocketError> {
            Err(SocketError::WouldBlock)
        }

        fn disconnect(&mut self) {}
    }

    struct DeadLink;

    impl NetworkLink for DeadLink {
        fn init(&mut self) -> Result<(), LinkError> {
            Ok(())
        }

        fn connect(&mut self) -> Result<Ipv4Addr, LinkError> {
            Err(LinkError::ConnectFailed(-1))
        }

        fn ipv6_link_local(&mut self) -> Result<(Ipv6Addr, u32), LinkError> {
            Err(LinkError::NoAddress)
        }
    }

    struct UpLink;

    impl NetworkLink for UpLink {
        fn init(&mut self) -> Result<(), LinkError> {
            Ok(())
        }

        fn connect(&mut self) -> Result<Ipv4Addr, LinkError> {
            Ok(Ipv4Addr::new(10, 0, 0, 7))
        }

        fn ipv6_link_local(&mut self) -> Result<(Ipv6Addr, u32), LinkError> {
            Err(LinkError::NoAddress)
        }
    }

    fn valid_config() -> ServerConfig {
        let mut cfg = ServerConfig::default();
        cfg.ssid.clear();
        cfg.ssid.push_str("lab-net").unwrap();
        cfg.password.clear();
        cfg
    }

    fn server() -> CommandServer<WireLog> {
        let ctx = ServerContext::new(ServerConfig::default(), LedMirror::new());
        CommandServer::new(Arc::new(ctx))
    }

    #[test]
    fn failed_bring_up_never_reaches_setup() {
        let called = Cell::new(false);
        let result = startup(&mut DeadLink, &valid_config(), IpMode::V4, |_| {
            called.set(true);
            Ok(())
        });
        assert!(matches!(
            result,
            Err(Error::BringUp(BringUpError::RetriesExhausted { attempts: 3, .. }))
        ));
        assert!(!called.get());
    }

    #[test]
    fn setup_receives_bind_address() {
        let addr = startup(&mut UpLink, &valid_config(), IpMode::V4, Ok).unwrap();
        assert_eq!(addr, "10.0.0.7:50007".parse().unwrap());
    }

    #[test]
    fn setup_failure_is_fatal() {
        let result: Result<(), _> = startup(&mut UpLink, &valid_config(), IpMode::V4, |_| {
            Err(SetupError::new(SetupStep::Bind, 98))
        });
        assert_eq!(
            result,
            Err(Error::Setup(SetupError::new(SetupStep::Bind, 98)))
        );
    }

    #[test]
    fn invalid_config_stops_before_link() {
        let cfg = ServerConfig {
            port: 0,
            ..valid_config()
        };
        let result = startup(&mut UpLink, &cfg, IpMode::V4, Ok);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn idle_dispatch_discards() {
        let server = server();
        assert_eq!(
            server.dispatch(CommandValue::On),
            DispatchOutcome::Discarded(CommandValue::On)
        );
    }

    #[test]
    fn press_reaches_connected_client() {
        let mut server = server();
        let wire = WireLog::default();
        server.context().on_connect(Ok(Accepted {
            id: ClientId(1),
            peer: "10.0.0.9:5000".parse().unwrap(),
            client: wire.clone(),
        }));

        assert_eq!(server.context().on_button_edge(1_000), Some(CommandValue::On));
        assert_eq!(
            server.dispatch_next(),
            DispatchOutcome::Sent(CommandValue::On)
        );
        assert_eq!(*wire.0.lock().unwrap(), b"1");
    }

    #[test]
    fn try_dispatch_without_pending_is_none() {
        let mut server = server();
        assert_eq!(server.try_dispatch(), None);
    }

    #[test]
    fn drops_are_reported_once() {
        let mut server = server();
        let ctx = Arc::clone(server.context());
        ctx.led.set(LedState::On);
        assert!(ctx.on_button_edge(1_000).is_some());
        assert!(ctx.on_button_edge(2_000).is_none());
        assert_eq!(
            server.try_dispatch(),
            Some(DispatchOutcome::Discarded(CommandValue::Off))
        );
        assert_eq!(server.reported_drops, 1);
        assert_eq!(server.try_dispatch(), None);
    }
}
