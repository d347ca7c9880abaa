//! LedLink firmware: main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Button ISR ──▶ CommandSignal ──▶ CommandServer (main task)  │
//! │                                        │ send '1' / '0'      │
//! │                                        ▼                     │
//! │  sock-evt thread: TlsServer ──▶ ConnectionManager ◀── ack    │
//! │                                        │                     │
//! │                                        ▼                     │
//! │                              LedMirror ──▶ StatusLed         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any startup failure is fatal: it is logged and the chip restarts.
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::gpio::PinDriver;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use ledlink::adapters::cert_store::CertStore;
use ledlink::adapters::network::WifiLink;
use ledlink::adapters::nvs::ConfigStore;
use ledlink::adapters::tls_transport::{ListenerOptions, TlsClient, create_and_listen};
use ledlink::app::context::{LedMirror, ServerContext};
use ledlink::app::service::{CommandServer, startup};
use ledlink::config::{IP_MODE, ServerConfig};
use ledlink::drivers::button::install_isr;
use ledlink::drivers::status_led::StatusLed;
use ledlink::drivers::task_pin::Core;
use ledlink::pins;

/// Grace period so the fatal log line reaches the console before reset.
const RESTART_DELAY: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("LedLink v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run() {
        error!("Fatal: {:#}; restarting", e);
        std::thread::sleep(RESTART_DELAY);
        // SAFETY: plain FFI call with no preconditions; it does not return.
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
    Ok(())
}

fn run() -> Result<()> {
    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // ── 2. Config (NVS or defaults) ───────────────────────────
    let config = match ConfigStore::new(nvs.clone()).load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Config load failed ({}), using defaults", e);
            ServerConfig::default()
        }
    };

    // ── 3. TLS identity ───────────────────────────────────────
    let (identity, trusted_roots) = CertStore::new(nvs.clone())
        .load_bundle()
        .context("TLS identity")?
        .into_parts();

    // ── 4. Shared server context ──────────────────────────────
    let led_pin = PinDriver::output(peripherals.pins.gpio2)?;
    info!("LED mirror on GPIO{}", pins::LED_GPIO);
    let led = LedMirror::with_sink(Box::new(StatusLed::new(led_pin)));
    let ctx = Arc::new(ServerContext::new(config.clone(), led));
    // The ISR argument must outlive the registration.
    let ctx: &'static Arc<ServerContext<TlsClient>> = Box::leak(Box::new(ctx));

    // ── 5. Network bring-up, then the secure socket ───────────
    let mut link = WifiLink::new(
        peripherals.modem,
        sysloop,
        Some(nvs),
        &config.ssid,
        &config.password,
    )?;
    let options = ListenerOptions::from_config(&config);
    let server = startup(&mut link, &config, IP_MODE, |bind_addr| {
        create_and_listen(&identity, &trusted_roots, bind_addr, options, Arc::clone(ctx))
    })?;
    // Keep the Wi-Fi driver alive for the life of the firmware.
    core::mem::forget(link);

    server
        .spawn_event_loop(
            Core::Pro,
            pins::SOCKET_TASK_PRIORITY,
            pins::SOCKET_TASK_STACK_KB,
        )
        .context("socket event loop")?;

    // ── 6. Button ISR and dispatch loop ───────────────────────
    install_isr(pins::BUTTON_GPIO, &**ctx)?;

    CommandServer::new(Arc::clone(ctx)).run()
}
