//! Server core: connection handling, command dispatch and bring-up.
//!
//! Nothing in here touches a socket or a pin directly. The platform is
//! reached through the **port traits** in [`ports`], so the whole core runs
//! on the host against mocks.

pub mod bringup;
pub mod command;
pub mod connection;
pub mod context;
pub mod ports;
pub mod service;
pub mod signal;
