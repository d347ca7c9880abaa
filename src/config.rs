//! Server configuration parameters
//!
//! All tunable parameters for the LedLink command server.
//! Values can be overridden by a postcard blob stored in NVS.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Address family the server binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpMode {
    V4,
    V6LinkLocal,
}

/// Build-time address policy: the `ipv6` feature selects IPv6 link-local.
#[cfg(feature = "ipv6")]
pub const IP_MODE: IpMode = IpMode::V6LinkLocal;
#[cfg(not(feature = "ipv6"))]
pub const IP_MODE: IpMode = IpMode::V4;

/// Default link connection attempts before bring-up gives up.
pub const MAX_RETRY_COUNT: u8 = 3;

/// Core server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    // --- Listening socket ---
    /// TCP port the server listens on
    pub port: u16,
    /// Pending connections queued by the listening socket
    pub backlog: u16,
    /// Receive timeout applied to client sockets (milliseconds)
    pub recv_timeout_ms: u32,
    /// Socket event loop poll interval (milliseconds)
    pub event_poll_interval_ms: u32,

    // --- Button ---
    /// Minimum spacing between accepted button presses (milliseconds)
    pub debounce_ms: u32,

    // --- Network link ---
    /// Connection attempts before bring-up is abandoned
    pub max_link_attempts: u8,
    /// Wi-Fi station SSID
    pub ssid: heapless::String<32>,
    /// Wi-Fi station password (empty for open networks)
    pub password: heapless::String<64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 50007,
            backlog: 3,
            recv_timeout_ms: 500,
            event_poll_interval_ms: 10,

            debounce_ms: 100,

            max_link_attempts: MAX_RETRY_COUNT,
            ssid: build_time_str(option_env!("WIFI_SSID")),
            password: build_time_str(option_env!("WIFI_PASSWORD")),
        }
    }
}

fn build_time_str<const N: usize>(value: Option<&str>) -> heapless::String<N> {
    let mut s = heapless::String::new();
    // Oversized build-time values are left empty and rejected by validate().
    if s.push_str(value.unwrap_or("")).is_err() {
        s.clear();
    }
    s
}

impl ServerConfig {
    /// Receive timeout as a [`Duration`].
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.recv_timeout_ms))
    }

    /// Event loop poll interval as a [`Duration`].
    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.event_poll_interval_ms))
    }

    /// Reject values that would leave the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ValidationFailed("port"));
        }
        if self.backlog == 0 {
            return Err(ConfigError::ValidationFailed("backlog"));
        }
        if self.recv_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("recv_timeout_ms"));
        }
        if self.event_poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("event_poll_interval_ms"));
        }
        if self.max_link_attempts == 0 {
            return Err(ConfigError::ValidationFailed("max_link_attempts"));
        }
        validate_ssid(&self.ssid)?;
        validate_password(&self.password)?;
        Ok(())
    }

    /// Decode a persisted config blob and validate it.
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }

    /// Encode for persistence.
    pub fn to_postcard(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Encode)
    }
}

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn validate_ssid(ssid: &str) -> Result<(), ConfigError> {
    if ssid.is_empty() || !is_printable_ascii(ssid) {
        return Err(ConfigError::ValidationFailed("ssid"));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ConfigError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 {
        return Err(ConfigError::ValidationFailed("password"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_credentials() -> ServerConfig {
        let mut c = ServerConfig::default();
        c.ssid = heapless::String::try_from("HomeNet").unwrap();
        c.password = heapless::String::try_from("password1").unwrap();
        c
    }

    #[test]
    fn default_config_is_sane() {
        let c = ServerConfig::default();
        assert_eq!(c.port, 50007);
        assert_eq!(c.max_link_attempts, MAX_RETRY_COUNT);
        assert!(c.backlog > 0);
        assert!(c.recv_timeout_ms > 0);
        assert!(c.debounce_ms > 0);
    }

    #[test]
    fn credentials_make_default_valid() {
        assert_eq!(with_credentials().validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_port_and_backlog() {
        let mut c = with_credentials();
        c.port = 0;
        assert_eq!(c.validate(), Err(ConfigError::ValidationFailed("port")));

        let mut c = with_credentials();
        c.backlog = 0;
        assert_eq!(c.validate(), Err(ConfigError::ValidationFailed("backlog")));
    }

    #[test]
    fn rejects_zero_link_attempts() {
        let mut c = with_credentials();
        c.max_link_attempts = 0;
        assert_eq!(
            c.validate(),
            Err(ConfigError::ValidationFailed("max_link_attempts"))
        );
    }

    #[test]
    fn rejects_missing_ssid_and_short_password() {
        let mut c = with_credentials();
        c.ssid.clear();
        assert_eq!(c.validate(), Err(ConfigError::ValidationFailed("ssid")));

        let mut c = with_credentials();
        c.password = heapless::String::try_from("short").unwrap();
        assert_eq!(c.validate(), Err(ConfigError::ValidationFailed("password")));
    }

    #[test]
    fn accepts_open_network() {
        let mut c = with_credentials();
        c.password.clear();
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn serde_roundtrip() {
        let c = with_credentials();
        let json = serde_json::to_string(&c).unwrap();
        let c2: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn postcard_roundtrip_validates() {
        let c = with_credentials();
        let bytes = c.to_postcard().unwrap();
        assert_eq!(ServerConfig::from_postcard(&bytes), Ok(c));

        let mut bad = with_credentials();
        bad.port = 0;
        let bytes = bad.to_postcard().unwrap();
        assert_eq!(
            ServerConfig::from_postcard(&bytes),
            Err(ConfigError::ValidationFailed("port"))
        );
    }

    #[test]
    fn garbage_blob_is_a_decode_error() {
        assert_eq!(
            ServerConfig::from_postcard(&[0xFF, 0xFF, 0xFF]),
            Err(ConfigError::Decode)
        );
    }

    #[test]
    fn durations_follow_millisecond_fields() {
        let c = ServerConfig::default();
        assert_eq!(c.recv_timeout(), Duration::from_millis(500));
        assert_eq!(c.event_poll_interval(), Duration::from_millis(10));
    }
}
