//! LedLink firmware library.
//!
//! A TLS command server that forwards debounced button presses to a single
//! remote client and mirrors the LED state it acknowledges. All
//! ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module, so the library builds and tests on the host.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;
pub mod pins;

pub mod adapters;
pub mod drivers;
