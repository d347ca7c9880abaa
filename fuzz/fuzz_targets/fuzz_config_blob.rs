//! Fuzz target: persisted `ServerConfig` blob
//!
//! Decodes arbitrary bytes as a stored config and verifies:
//! - No panics under arbitrary byte inputs
//! - Anything that decodes also passes validation
//! - A decoded config re-encodes to a blob that decodes to itself
//!
//! cargo fuzz run fuzz_config_blob

#![no_main]

use ledlink::config::ServerConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(config) = ServerConfig::from_postcard(data) else {
        return;
    };
    assert!(config.validate().is_ok());

    let blob = config.to_postcard().expect("valid config must encode");
    assert_eq!(ServerConfig::from_postcard(&blob), Ok(config));
});
