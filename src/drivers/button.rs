//! ISR-debounced user button.
//!
//! ## Hardware
//!
//! Active-low momentary switch with pull-up. The GPIO fires on every
//! falling edge, bounces included; [`Debouncer::on_raw_edge`] runs inside
//! the interrupt and lets through at most one press per debounce window.
//!
//! ## Window semantics
//!
//! An edge is accepted when no press is in progress and at least
//! `window_ms` have passed since the last accepted press. The in-progress
//! flag is cleared again before `on_raw_edge` returns, so the window
//! re-arms immediately after acceptance rather than on release.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Default debounce window.
pub const DEBOUNCE_TIME_MS: u32 = 100;

pub struct Debouncer {
    window_ms: u32,
    /// Timestamp (ms since boot, wrapping) of the last accepted press.
    last_accepted_ms: AtomicU32,
    in_progress: AtomicBool,
}

impl Debouncer {
    pub const fn new(window_ms: u32) -> Self {
        Self {
            window_ms,
            last_accepted_ms: AtomicU32::new(0),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn window_ms(&self) -> u32 {
        self.window_ms
    }

    /// Feed one raw edge observed at `now_ms`. Returns `true` if it counts
    /// as a press.
    ///
    /// Lock-free; the interrupt controller serialises calls.
    pub fn on_raw_edge(&self, now_ms: u32) -> bool {
        let last = self.last_accepted_ms.load(Ordering::Acquire);
        if now_ms.wrapping_sub(last) < self.window_ms {
            return false;
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.last_accepted_ms.store(now_ms, Ordering::Release);
        self.in_progress.store(false, Ordering::Release);
        true
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_TIME_MS)
    }
}

// ── GPIO interrupt wiring ─────────────────────────────────────

/// Anything that can absorb a raw button edge from interrupt context.
pub trait EdgeHandler: Sync {
    fn on_edge(&self, now_ms: u32);
}

impl<C: Send> EdgeHandler for crate::app::context::ServerContext<C> {
    fn on_edge(&self, now_ms: u32) {
        // The signal result is not needed here; drops are counted.
        let _ = self.on_button_edge(now_ms);
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn button_gpio_isr<H: EdgeHandler>(arg: *mut core::ffi::c_void) {
    // SAFETY: esp_timer_get_time is a RTC counter read; safe in ISR context.
    let now_ms = (unsafe { esp_idf_svc::sys::esp_timer_get_time() } / 1_000) as u32;
    // SAFETY: `arg` was produced from a `&'static H` in `install_isr`.
    let handler = unsafe { &*(arg as *const H) };
    handler.on_edge(now_ms);
}

/// Configure `gpio` as a pulled-up falling-edge input and route its
/// interrupt to `handler`.
#[cfg(target_os = "espidf")]
pub fn install_isr<H: EdgeHandler>(
    gpio: i32,
    handler: &'static H,
) -> Result<(), crate::error::Error> {
    use esp_idf_svc::sys::*;
    use log::info;

    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << gpio,
        mode: gpio_mode_t_GPIO_MODE_INPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_NEGEDGE,
    };

    // SAFETY: called once from main before the dispatch loop. The handler
    // reference is 'static, so the ISR argument outlives the registration.
    unsafe {
        if gpio_config(&cfg) != ESP_OK {
            return Err(crate::error::Error::Init("button GPIO config"));
        }
        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
            return Err(crate::error::Error::Init("GPIO ISR service install"));
        }
        let arg = handler as *const H as *mut core::ffi::c_void;
        if gpio_isr_handler_add(gpio, Some(button_gpio_isr::<H>), arg) != ESP_OK {
            return Err(crate::error::Error::Init("button ISR handler add"));
        }
        gpio_intr_enable(gpio);
    }

    info!("Button: falling-edge ISR installed on GPIO{}", gpio);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_inside_first_window_after_boot_are_rejected() {
        let d = Debouncer::new(100);
        assert!(!d.on_raw_edge(0));
        assert!(!d.on_raw_edge(99));
        assert!(d.on_raw_edge(100));
    }

    #[test]
    fn debounce_filters_rapid_noise() {
        let d = Debouncer::new(100);
        assert!(d.on_raw_edge(1_000));
        assert!(!d.on_raw_edge(1_001));
        assert!(!d.on_raw_edge(1_050));
        assert!(!d.on_raw_edge(1_099));
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let d = Debouncer::new(100);
        assert!(d.on_raw_edge(1_000));
        assert!(d.on_raw_edge(1_100));
        assert!(d.on_raw_edge(1_200));
    }

    #[test]
    fn rejected_edges_do_not_extend_window() {
        let d = Debouncer::new(100);
        assert!(d.on_raw_edge(1_000));
        assert!(!d.on_raw_edge(1_090));
        assert!(d.on_raw_edge(1_100));
    }

    #[test]
    fn survives_timer_wraparound() {
        let d = Debouncer::new(100);
        assert!(d.on_raw_edge(u32::MAX - 10));
        assert!(!d.on_raw_edge(50));
        assert!(d.on_raw_edge(89));
    }
}
