//! GPIO assignments.
//!
//! Single source of truth; drivers reference this module rather than
//! hard-coding pin numbers.

/// Momentary push-button, active-low with pull-up. Falling edge = press.
pub const BUTTON_GPIO: i32 = 0;

/// Mirror LED, active-high.
pub const LED_GPIO: i32 = 2;

// Task layout for the server threads.

/// Socket event loop priority (above the dispatch loop so events are
/// never starved by a blocked send).
pub const SOCKET_TASK_PRIORITY: u8 = 6;
pub const SOCKET_TASK_STACK_KB: usize = 8;
