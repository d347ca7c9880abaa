//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the server end to end on
//! the host: the simulated socket on loopback, the scripted network link,
//! and the real connection manager and dispatch loop.

#![cfg(not(target_os = "espidf"))]

mod harness;
mod loopback_tests;
mod startup_tests;
