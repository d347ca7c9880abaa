//! Persisted [`ServerConfig`] in NVS.
//!
//! The config lives as one postcard blob under `ledlink::srvcfg`. A missing
//! blob yields the build-time defaults; a blob that fails to decode or
//! validate is an error, so a corrupted store is never silently replaced.
//! `save` validates before anything is written.

use log::info;

use crate::config::ServerConfig;
use crate::error::ConfigError;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
const CONFIG_NAMESPACE: &[u8] = b"ledlink\0";
#[cfg(target_os = "espidf")]
const CONFIG_KEY: &[u8] = b"srvcfg\0";

#[cfg(not(target_os = "espidf"))]
const CONFIG_KEY: &str = "ledlink::srvcfg";

const MAX_BLOB_SIZE: usize = 256;

pub struct ConfigStore {
    /// Held so the default partition stays initialised while we use it.
    #[cfg(target_os = "espidf")]
    _partition: esp_idf_svc::nvs::EspDefaultNvsPartition,

    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<&'static str, Vec<u8>>>,
}

impl ConfigStore {
    #[cfg(target_os = "espidf")]
    pub fn new(partition: esp_idf_svc::nvs::EspDefaultNvsPartition) -> Self {
        Self {
            _partition: partition,
        }
    }

    /// In-memory store for host runs.
    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        info!("ConfigStore: simulation backend");
        Self {
            store: std::cell::RefCell::new(HashMap::new()),
        }
    }

    /// Load the stored config, or the defaults when nothing was saved.
    pub fn load(&self) -> Result<ServerConfig, ConfigError> {
        match self.platform_read()? {
            Some(bytes) => {
                let cfg = ServerConfig::from_postcard(&bytes)?;
                info!("ConfigStore: loaded config ({} bytes)", bytes.len());
                Ok(cfg)
            }
            None => {
                info!("ConfigStore: no stored config, using defaults");
                Ok(ServerConfig::default())
            }
        }
    }

    /// Validate and persist `config`.
    pub fn save(&self, config: &ServerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = config.to_postcard()?;
        if bytes.len() > MAX_BLOB_SIZE {
            return Err(ConfigError::Encode);
        }
        self.platform_write(&bytes)?;
        info!("ConfigStore: config saved ({} bytes)", bytes.len());
        Ok(())
    }

    // ── Platform-specific access ─────────────────────────────

    /// Open the config namespace, run `f` with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        // SAFETY: the namespace is NUL-terminated and `handle` is a valid
        // out-pointer.
        let ret = unsafe { nvs_open(CONFIG_NAMESPACE.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        // SAFETY: `handle` was opened above and is not used afterwards.
        unsafe {
            nvs_close(handle);
        }
        result
    }

    #[cfg(target_os = "espidf")]
    fn platform_read(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let result = Self::with_nvs_handle(false, |handle| {
            let mut size: usize = 0;

            // First call: get size
            // SAFETY: a null buffer asks NVS for the blob length only.
            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    CONFIG_KEY.as_ptr() as *const _,
                    core::ptr::null_mut(),
                    &mut size,
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            if size == 0 || size > MAX_BLOB_SIZE {
                return Err(ESP_ERR_NVS_INVALID_LENGTH);
            }

            let mut buf = vec![0u8; size];
            // SAFETY: `buf` holds `size` writable bytes.
            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    CONFIG_KEY.as_ptr() as *const _,
                    buf.as_mut_ptr() as *mut _,
                    &mut size,
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            buf.truncate(size);
            Ok(buf)
        });

        match result {
            Ok(bytes) => Ok(Some(bytes)),
            // A namespace that was never written cannot be opened read-only.
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(None),
            Err(e) if e == ESP_ERR_NVS_INVALID_LENGTH => Err(ConfigError::Decode),
            Err(e) => {
                log::warn!("ConfigStore: NVS read error {}", e);
                Err(ConfigError::Storage(e))
            }
        }
    }

    #[cfg(target_os = "espidf")]
    fn platform_write(&self, bytes: &[u8]) -> Result<(), ConfigError> {
        Self::with_nvs_handle(true, |handle| {
            // SAFETY: key is NUL-terminated, `bytes` is valid for its length.
            let ret = unsafe {
                nvs_set_blob(
                    handle,
                    CONFIG_KEY.as_ptr() as *const _,
                    bytes.as_ptr() as *const _,
                    bytes.len(),
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            // SAFETY: `handle` is open read-write.
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        })
        .map_err(|e| {
            log::warn!("ConfigStore: NVS write error {}", e);
            ConfigError::Storage(e)
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_read(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        Ok(self.store.borrow().get(CONFIG_KEY).cloned())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_write(&self, bytes: &[u8]) -> Result<(), ConfigError> {
        self.store.borrow_mut().insert(CONFIG_KEY, bytes.to_vec());
        Ok(())
    }

    /// Overwrite the raw blob, bypassing validation.
    #[cfg(all(test, not(target_os = "espidf")))]
    fn put_raw(&self, bytes: &[u8]) {
        self.store.borrow_mut().insert(CONFIG_KEY, bytes.to_vec());
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}
