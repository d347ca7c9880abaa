//! Fuzz target: acknowledgement receive path
//!
//! Feeds arbitrary client payloads through `ConnectionManager::on_receive`
//! and verifies:
//! - No panics, whatever the payload length
//! - The mirror turns on only for the exact acknowledgement
//! - The client stays connected on a successful read
//!
//! cargo fuzz run fuzz_ack_receive

#![no_main]

use std::net::SocketAddr;
use std::sync::Arc;

use ledlink::app::command::{LED_ON_ACK, LedState};
use ledlink::app::connection::{ConnectionManager, RECV_BUFFER_SIZE};
use ledlink::app::context::LedMirror;
use ledlink::app::ports::{Accepted, ClientId, SecureClient, SocketEvents};
use ledlink::error::SocketError;
use libfuzzer_sys::fuzz_target;

/// Hands out `payload` once, truncated to the caller's buffer.
struct OneShot(Vec<u8>);

impl SecureClient for OneShot {
    fn send(&mut self, data: &[u8]) -> Result<usize, SocketError> {
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let n = self.0.len().min(buf.len());
        buf[..n].copy_from_slice(&self.0[..n]);
        Ok(n)
    }

    fn disconnect(&mut self) {}
}

fuzz_target!(|data: &[u8]| {
    let led = Arc::new(LedMirror::new());
    let manager = ConnectionManager::new(Arc::clone(&led));
    let peer: SocketAddr = "10.0.0.2:40000".parse().unwrap();
    manager.on_connect(Ok(Accepted {
        id: ClientId(1),
        peer,
        client: OneShot(data.to_vec()),
    }));

    manager.on_receive(ClientId(1));

    let seen = &data[..data.len().min(RECV_BUFFER_SIZE)];
    let cut = seen.iter().position(|&b| b == 0).unwrap_or(seen.len());
    let expected = if &seen[..cut] == LED_ON_ACK {
        LedState::On
    } else {
        LedState::Off
    };
    assert_eq!(led.get(), expected);
    assert!(manager.is_connected());
});
