//! Process-wide SDK runtime
//!
//! HCNetSDK keeps global state (worker threads, socket pools, timing
//! policies) that must be set up before any login and torn down at process
//! exit. [`SdkRuntime`] is the explicit owner of that state: create it once,
//! share it with sessions through an `Arc`, and call [`SdkRuntime::shutdown`]
//! (or drop the last reference) when done.
//!
//! The runtime is not re-entrant. With the native backend only one runtime
//! may exist per process, since the vendor library's state is global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::sdk::DeviceSdk;

/// Global timing policies applied at initialisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u32,
    /// Connection attempts before giving up
    pub connect_retries: u32,
    /// Interval between automatic reconnect attempts in milliseconds
    pub reconnect_interval_ms: u32,
    /// Automatic reconnect setting passed to the SDK (non-zero enables it)
    pub reconnect_retries: u32,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2000,
            connect_retries: 1,
            reconnect_interval_ms: 10_000,
            reconnect_retries: 1,
        }
    }
}

/// Initialised device SDK.
pub struct SdkRuntime {
    sdk: Arc<dyn DeviceSdk>,
    config: SdkConfig,
    initialized: AtomicBool,
}

impl std::fmt::Debug for SdkRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkRuntime")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl SdkRuntime {
    /// Initialise `sdk` with the default timing policies
    /// (2000 ms connect timeout, 1 retry; 10 s reconnect interval).
    pub fn init(sdk: Arc<dyn DeviceSdk>) -> Result<Arc<Self>> {
        Self::init_with(sdk, SdkConfig::default())
    }

    /// Initialise `sdk` with explicit timing policies.
    pub fn init_with(sdk: Arc<dyn DeviceSdk>, config: SdkConfig) -> Result<Arc<Self>> {
        if !sdk.init() {
            let code = sdk.last_error();
            return Err(Error::SdkInit { code });
        }

        if !sdk.set_connect_time(config.connect_timeout_ms, config.connect_retries) {
            warn!(code = sdk.last_error(), "Failed to set SDK connect timeout");
        }
        if !sdk.set_reconnect(config.reconnect_interval_ms, config.reconnect_retries) {
            warn!(code = sdk.last_error(), "Failed to set SDK reconnect policy");
        }

        info!(
            "Device SDK initialised (connect timeout {}ms x{}, reconnect every {}ms)",
            config.connect_timeout_ms, config.connect_retries, config.reconnect_interval_ms
        );

        Ok(Arc::new(Self {
            sdk,
            config,
            initialized: AtomicBool::new(true),
        }))
    }

    /// Load HCNetSDK from `path` (or the platform default name) and initialise it.
    #[cfg(feature = "native")]
    pub fn load(path: Option<&std::path::Path>, config: SdkConfig) -> Result<Arc<Self>> {
        let sdk = match path {
            Some(path) => crate::sdk::native::HcNetSdk::load_from(path)?,
            None => crate::sdk::native::HcNetSdk::load()?,
        };
        Self::init_with(Arc::new(sdk), config)
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// The SDK, if the runtime has not been shut down.
    pub(crate) fn sdk(&self) -> Result<&dyn DeviceSdk> {
        if self.is_initialized() {
            Ok(self.sdk.as_ref())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Last error code recorded by the SDK on the calling thread.
    pub fn last_error_code(&self) -> u32 {
        self.sdk.last_error()
    }

    /// Release process-wide SDK state. Idempotent; never fails.
    ///
    /// Sessions still holding this runtime fail with
    /// [`Error::NotInitialized`] afterwards, and their teardown skips the SDK.
    pub fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        if !self.sdk.cleanup() {
            warn!(code = self.sdk.last_error(), "Device SDK cleanup reported failure");
        }
        info!("Device SDK shut down");
    }
}

impl Drop for SdkRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
