//! End-to-end command flow over the simulated socket.

use ledlink::adapters::tls_transport::PumpEvent;
use ledlink::app::command::{CommandValue, LedState};
use ledlink::app::connection::{ConnectionState, DispatchOutcome};
use ledlink::app::ports::ClientId;

use crate::harness::Harness;

#[test]
fn press_is_sent_to_connected_client() {
    let mut h = Harness::new();
    let mut client = h.connect();
    assert_eq!(h.pump_until_event(), PumpEvent::Connected(ClientId(1)));
    assert!(h.ctx.connection.is_connected());

    h.press(1_000);
    assert_eq!(
        h.dispatcher.dispatch_next(),
        DispatchOutcome::Sent(CommandValue::On)
    );
    assert_eq!(client.read_command(), b'1');
}

#[test]
fn acknowledgement_drives_next_command() {
    let mut h = Harness::new();
    let mut client = h.connect();
    h.pump_until_event();

    h.press(1_000);
    h.dispatcher.dispatch_next();
    assert_eq!(client.read_command(), b'1');

    client.ack(b"LED ON ACK");
    assert_eq!(h.pump_until_event(), PumpEvent::Received(ClientId(1)));
    assert_eq!(h.ctx.led.get(), LedState::On);

    h.press(2_000);
    assert_eq!(
        h.dispatcher.dispatch_next(),
        DispatchOutcome::Sent(CommandValue::Off)
    );
    assert_eq!(client.read_command(), b'0');

    client.ack(b"LED OFF ACK");
    h.pump_until_event();
    assert_eq!(h.ctx.led.get(), LedState::Off);
}

#[test]
fn near_miss_acknowledgement_reads_as_off() {
    let mut h = Harness::new();
    let mut client = h.connect();
    h.pump_until_event();
    h.ctx.led.set(LedState::On);

    client.ack(b"led on ack");
    h.pump_until_event();
    assert_eq!(h.ctx.led.get(), LedState::Off);
}

#[test]
fn client_close_returns_to_idle_and_discards() {
    let mut h = Harness::new();
    let client = h.connect();
    h.pump_until_event();
    assert!(h.ctx.connection.is_connected());

    drop(client);
    assert_eq!(h.pump_until_event(), PumpEvent::Disconnected(ClientId(1)));
    assert_eq!(h.ctx.connection.state(), ConnectionState::Idle);

    h.press(1_000);
    assert_eq!(
        h.dispatcher.try_dispatch(),
        Some(DispatchOutcome::Discarded(CommandValue::On))
    );
}

#[test]
fn next_client_is_served_after_release() {
    let mut h = Harness::new();
    let first = h.connect();
    h.pump_until_event();

    // Waits in the backlog while the first client is held.
    let mut second = h.connect();
    for _ in 0..3 {
        assert_eq!(h.server.pump_once(), PumpEvent::Idle);
    }

    drop(first);
    assert_eq!(h.pump_until_event(), PumpEvent::Disconnected(ClientId(1)));
    assert_eq!(h.pump_until_event(), PumpEvent::Connected(ClientId(2)));

    h.press(1_000);
    h.dispatcher.dispatch_next();
    assert_eq!(second.read_command(), b'1');
}

#[test]
fn press_without_client_never_reaches_socket() {
    let mut h = Harness::new();
    h.press(1_000);
    assert_eq!(
        h.dispatcher.dispatch_next(),
        DispatchOutcome::Discarded(CommandValue::On)
    );

    // A client connecting afterwards does not see the stale command.
    let client = h.connect();
    h.pump_until_event();
    client.0.set_nonblocking(true).unwrap();
    let mut byte = [0u8; 1];
    assert!(client.0.peek(&mut byte).is_err());
}
