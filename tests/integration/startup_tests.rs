//! Startup ordering: bring-up gates socket setup.

use std::cell::Cell;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use ledlink::adapters::network::SimLink;
use ledlink::adapters::tls_transport::{TlsClient, create_and_listen};
use ledlink::app::context::{LedMirror, ServerContext};
use ledlink::app::service::startup;
use ledlink::config::{IpMode, ServerConfig};
use ledlink::error::{BringUpError, Error, LinkError, SetupStep};

use crate::harness::{TRUSTED_ROOTS, identity, options};

fn config() -> ServerConfig {
    let mut cfg = ServerConfig::default();
    cfg.ssid.clear();
    cfg.ssid.push_str("lab-net").unwrap();
    cfg.password.clear();
    cfg.password.push_str("hunter2hunter2").unwrap();
    cfg
}

/// Bind on an ephemeral port of the address bring-up produced.
fn ephemeral(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(addr.ip(), 0)
}

#[test]
fn exhausted_link_never_attempts_setup() {
    let mut link = SimLink::failing(3);
    let attempted = Cell::new(false);

    let result = startup(&mut link, &config(), IpMode::V4, |_| {
        attempted.set(true);
        Ok(())
    });

    assert_eq!(
        result,
        Err(Error::BringUp(BringUpError::RetriesExhausted {
            attempts: 3,
            last: LinkError::ConnectFailed(-1),
        }))
    );
    assert!(!attempted.get());
    assert_eq!(link.connect_calls, 3);
}

#[test]
fn link_init_failure_is_fatal() {
    let mut link = SimLink {
        init_error: Some(LinkError::InitFailed(0x3001)),
        ..SimLink::new()
    };
    let result = startup(&mut link, &config(), IpMode::V4, |_| Ok(()));
    assert_eq!(
        result,
        Err(Error::BringUp(BringUpError::Init(LinkError::InitFailed(0x3001))))
    );
    assert_eq!(link.connect_calls, 0);
}

#[test]
fn recovered_link_brings_up_listener() {
    let mut link = SimLink::failing(2);
    let ctx = Arc::new(ServerContext::<TlsClient>::new(config(), LedMirror::new()));

    let server = startup(&mut link, &config(), IpMode::V4, |addr| {
        assert_eq!(addr.port(), 50007);
        create_and_listen(&identity(), TRUSTED_ROOTS, ephemeral(addr), options(), Arc::clone(&ctx))
    })
    .unwrap();

    assert_eq!(server.local_addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(link.connect_calls, 3);
}

#[test]
fn setup_failure_names_the_step() {
    let mut link = SimLink::new();
    let ctx = Arc::new(ServerContext::<TlsClient>::new(config(), LedMirror::new()));

    let result = startup(&mut link, &config(), IpMode::V4, |addr| {
        create_and_listen(&identity(), b"", ephemeral(addr), options(), Arc::clone(&ctx))
    });

    match result {
        Err(Error::Setup(e)) => assert_eq!(e.step, SetupStep::SetAuthMode),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("setup should fail without trusted roots"),
    }
}
