//! Network links beneath the server socket.
//!
//! Both implement [`NetworkLink`] and are driven by
//! [`bring_up`](crate::app::bringup::bring_up).
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: [`WifiLink`] wraps `esp_idf_svc::wifi`
//!   in station mode.
//! - **all other targets**: [`SimLink`], a scripted link for host tests.

#[cfg(not(target_os = "espidf"))]
use std::net::{Ipv4Addr, Ipv6Addr};

#[cfg(not(target_os = "espidf"))]
use log::{info, warn};

#[cfg(not(target_os = "espidf"))]
use crate::app::ports::NetworkLink;
#[cfg(not(target_os = "espidf"))]
use crate::error::LinkError;

// ───────────────────────────────────────────────────────────────
// Wi-Fi station (ESP-IDF)
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::WifiLink;

#[cfg(target_os = "espidf")]
mod esp {
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::time::Duration;

    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::modem::Modem;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
    use log::info;

    use crate::app::ports::NetworkLink;
    use crate::error::LinkError;

    /// Polls for the link-local address after `esp_netif_create_ip6_linklocal`.
    const IP6_POLL_ATTEMPTS: u32 = 50;
    const IP6_POLL_INTERVAL: Duration = Duration::from_millis(100);

    enum Stage {
        Pending {
            modem: Modem,
            sysloop: EspSystemEventLoop,
            nvs: Option<EspDefaultNvsPartition>,
        },
        Ready(BlockingWifi<EspWifi<'static>>),
        Poisoned,
    }

    /// Station-mode Wi-Fi link. The driver is created by `init`.
    pub struct WifiLink {
        stage: Stage,
        ssid: heapless::String<32>,
        password: heapless::String<64>,
    }

    impl WifiLink {
        pub fn new(
            modem: Modem,
            sysloop: EspSystemEventLoop,
            nvs: Option<EspDefaultNvsPartition>,
            ssid: &str,
            password: &str,
        ) -> Result<Self, LinkError> {
            let mut s = heapless::String::new();
            s.push_str(ssid).map_err(|_| LinkError::NoCredentials)?;
            let mut p = heapless::String::new();
            p.push_str(password).map_err(|_| LinkError::NoCredentials)?;
            Ok(Self {
                stage: Stage::Pending {
                    modem,
                    sysloop,
                    nvs,
                },
                ssid: s,
                password: p,
            })
        }

        fn wifi(&mut self) -> Result<&mut BlockingWifi<EspWifi<'static>>, LinkError> {
            match &mut self.stage {
                Stage::Ready(w) => Ok(w),
                _ => Err(LinkError::InitFailed(-1)),
            }
        }
    }

    impl NetworkLink for WifiLink {
        fn init(&mut self) -> Result<(), LinkError> {
            if self.ssid.is_empty() {
                return Err(LinkError::NoCredentials);
            }
            let Stage::Pending {
                modem,
                sysloop,
                nvs,
            } = core::mem::replace(&mut self.stage, Stage::Poisoned)
            else {
                return Err(LinkError::InitFailed(-1));
            };

            let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs)
                .map_err(|e| LinkError::InitFailed(e.code()))?;
            let mut wifi = BlockingWifi::wrap(esp_wifi, sysloop)
                .map_err(|e| LinkError::InitFailed(e.code()))?;

            let auth_method = if self.password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            };
            let config = Configuration::Client(ClientConfiguration {
                ssid: self
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| LinkError::NoCredentials)?,
                password: self
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| LinkError::NoCredentials)?,
                auth_method,
                ..Default::default()
            });
            wifi.set_configuration(&config)
                .map_err(|e| LinkError::InitFailed(e.code()))?;
            wifi.start().map_err(|e| LinkError::InitFailed(e.code()))?;

            info!("Link(espidf): station started, SSID '{}'", self.ssid);
            self.stage = Stage::Ready(wifi);
            Ok(())
        }

        fn connect(&mut self) -> Result<Ipv4Addr, LinkError> {
            let wifi = self.wifi()?;
            wifi.connect().map_err(|e| LinkError::ConnectFailed(e.code()))?;
            wifi.wait_netif_up()
                .map_err(|e| LinkError::ConnectFailed(e.code()))?;
            let ip_info = wifi
                .wifi()
                .sta_netif()
                .get_ip_info()
                .map_err(|_| LinkError::NoAddress)?;
            Ok(ip_info.ip)
        }

        fn ipv6_link_local(&mut self) -> Result<(Ipv6Addr, u32), LinkError> {
            use esp_idf_svc::sys::{
                ESP_OK, esp_ip6_addr_t, esp_netif_create_ip6_linklocal,
                esp_netif_get_ip6_linklocal, esp_netif_get_netif_impl_index,
            };

            let wifi = self.wifi()?;
            let handle = wifi.wifi().sta_netif().handle();

            // SAFETY: `handle` is the live station netif owned by `wifi`.
            let rc = unsafe { esp_netif_create_ip6_linklocal(handle) };
            if rc != ESP_OK {
                return Err(LinkError::ConnectFailed(rc));
            }

            for _ in 0..IP6_POLL_ATTEMPTS {
                let mut ip6 = esp_ip6_addr_t::default();
                // SAFETY: `ip6` is a valid out-pointer for the call.
                let rc = unsafe { esp_netif_get_ip6_linklocal(handle, &mut ip6) };
                if rc == ESP_OK {
                    let mut octets = [0u8; 16];
                    for (chunk, word) in octets.chunks_exact_mut(4).zip(ip6.addr) {
                        // lwIP keeps each word in network byte order.
                        chunk.copy_from_slice(&word.to_ne_bytes());
                    }
                    // SAFETY: same live netif handle as above.
                    let index = unsafe { esp_netif_get_netif_impl_index(handle) };
                    let scope_id = u32::try_from(index).map_err(|_| LinkError::NoAddress)?;
                    return Ok((Ipv6Addr::from(octets), scope_id));
                }
                std::thread::sleep(IP6_POLL_INTERVAL);
            }
            Err(LinkError::NoAddress)
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation link (host)
// ───────────────────────────────────────────────────────────────

/// Scripted link for host runs and tests.
///
/// Fails the first `failures` connect attempts, then succeeds with
/// `ipv4`. Counts every call so tests can assert on the sequence.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone)]
pub struct SimLink {
    pub ipv4: Ipv4Addr,
    pub ipv6: Option<(Ipv6Addr, u32)>,
    pub init_error: Option<LinkError>,
    pub failures: u32,
    pub init_calls: u32,
    pub connect_calls: u32,
}

#[cfg(not(target_os = "espidf"))]
impl SimLink {
    pub fn new() -> Self {
        Self {
            ipv4: Ipv4Addr::LOCALHOST,
            ipv6: Some((Ipv6Addr::LOCALHOST, 0)),
            init_error: None,
            failures: 0,
            init_calls: 0,
            connect_calls: 0,
        }
    }

    /// A link whose first `failures` connect attempts fail.
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            ..Self::new()
        }
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for SimLink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl NetworkLink for SimLink {
    fn init(&mut self) -> Result<(), LinkError> {
        self.init_calls += 1;
        match self.init_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn connect(&mut self) -> Result<Ipv4Addr, LinkError> {
        self.connect_calls += 1;
        if self.connect_calls <= self.failures {
            warn!("Link(sim): simulated connect failure (attempt {})", self.connect_calls);
            return Err(LinkError::ConnectFailed(-1));
        }
        info!("Link(sim): connected (attempt {})", self.connect_calls);
        Ok(self.ipv4)
    }

    fn ipv6_link_local(&mut self) -> Result<(Ipv6Addr, u32), LinkError> {
        self.ipv6.ok_or(LinkError::NoAddress)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
