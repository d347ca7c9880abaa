//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter         | Implements       | Connects to                  |
//! |-----------------|------------------|------------------------------|
//! | `cert_store`    |                  | NVS `certs` / PEM directory  |
//! | `network`       | NetworkLink      | ESP-IDF Wi-Fi STA / sim link |
//! | `nvs`           |                  | NVS / in-memory config blob  |
//! | `tls_transport` | SecureClient     | lwIP + mbedTLS / `std::net`  |

pub mod cert_store;
pub mod network;
pub mod nvs;
pub mod tls_transport;
