//! Button interrupt, mirror LED and task helpers.

pub mod button;
pub mod status_led;
pub mod task_pin;
