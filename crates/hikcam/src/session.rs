//! Device login sessions
//!
//! A [`DeviceSession`] is one authenticated connection to a camera or NVR.
//! Lifecycle:
//!
//! ```text
//! new ──login()──▶ logged in ──start_stream()──▶ streaming
//!  ▲                  │  ▲                          │
//!  └────logout()──────┘  └──────stop_stream()───────┘
//! ```
//!
//! `logout()` from any state stops the stream first. Dropping the session
//! runs `logout()`, so handles are released on every exit path.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::credentials::Credentials;
use crate::dispatch::{DispatchSnapshot, FrameConsumer};
use crate::error::{Error, Result};
use crate::frame::FramePacket;
use crate::runtime::SdkRuntime;
use crate::sdk::{DeviceInfo, JpegParams, StreamVariant};
use crate::stream::StreamController;

/// Scratch buffer handed to the SDK for still capture (50 MiB).
pub const STILL_CAPTURE_BUFFER_SIZE: usize = 50 * 1024 * 1024;

/// One device login and its live stream.
pub struct DeviceSession {
    runtime: Arc<SdkRuntime>,
    credentials: Credentials,
    session_handle: Option<i32>,
    device: Option<DeviceInfo>,
    stream: StreamController,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("credentials", &self.credentials)
            .field("session_handle", &self.session_handle)
            .field("stream", &self.stream)
            .finish()
    }
}

impl DeviceSession {
    pub fn new(runtime: Arc<SdkRuntime>, credentials: Credentials) -> Self {
        Self {
            runtime,
            credentials,
            session_handle: None,
            device: None,
            stream: StreamController::new(),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn username(&self) -> &str {
        self.credentials.username()
    }

    pub fn password(&self) -> &str {
        self.credentials.password()
    }

    pub fn device_address(&self) -> &str {
        self.credentials.device_address()
    }

    pub fn port(&self) -> u16 {
        self.credentials.port()
    }

    pub fn session_handle(&self) -> Option<i32> {
        self.session_handle
    }

    pub fn is_logged_in(&self) -> bool {
        self.session_handle.is_some()
    }

    /// Metadata reported by the device at login.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    pub fn stream(&self) -> &StreamController {
        &self.stream
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_active()
    }

    pub fn stream_handle(&self) -> Option<i32> {
        self.stream.handle()
    }

    pub fn stream_stats(&self) -> Option<DispatchSnapshot> {
        self.stream.stats()
    }

    /// Log in to the device. Blocks until the device answers or the SDK
    /// connect timeout expires.
    ///
    /// Credentials are validated before anything is sent. Logging in again
    /// while logged in releases the previous session first.
    pub fn login(&mut self) -> Result<()> {
        let request = self.credentials.encode()?;
        self.runtime.sdk()?;

        if self.session_handle.is_some() {
            debug!("Already logged in, releasing previous session");
            self.logout();
        }
        let sdk = self.runtime.sdk()?;

        info!(
            "Logging in to {}:{} as {}",
            self.credentials.device_address(),
            self.credentials.port(),
            self.credentials.username()
        );

        let mut device = DeviceInfo::default();
        let handle = sdk.login(&request, &mut device);
        if handle < 0 {
            let code = sdk.last_error();
            warn!(address = %self.credentials.device_address(), code, "Login failed");
            return Err(Error::Login { code });
        }

        info!(
            "Logged in to {} (serial {}, start channel {}), handle {}",
            self.credentials.device_address(),
            device.serial_number,
            device.start_channel,
            handle
        );
        self.session_handle = Some(handle);
        self.device = Some(device);
        Ok(())
    }

    /// Log out. Idempotent and never fails.
    ///
    /// Stops any active stream, asks the SDK to end the session, then clears
    /// local state whatever the SDK reported.
    pub fn logout(&mut self) {
        let sdk = self.runtime.sdk().ok();
        self.stream.stop(sdk);

        let Some(handle) = self.session_handle.take() else {
            return;
        };
        self.device = None;

        match sdk {
            Some(sdk) => {
                if !sdk.logout(handle) {
                    warn!(handle, code = sdk.last_error(), "SDK reported failure logging out");
                }
            }
            None => debug!(handle, "SDK not initialised, skipping native logout"),
        }
        info!("Logged out of {}", self.credentials.device_address());
    }

    fn channel(&self) -> i32 {
        self.device
            .as_ref()
            .map(|d| i32::from(d.start_channel))
            .unwrap_or_default()
    }

    /// Start live view of the device's start channel.
    ///
    /// `consumer` runs on the SDK delivery thread for every header and body
    /// chunk. An active stream is stopped before the new one starts.
    pub fn start_stream<F>(&mut self, consumer: F, variant: StreamVariant) -> Result<i32>
    where
        F: Fn(FramePacket) + Send + Sync + 'static,
    {
        self.start_stream_with(Arc::new(consumer), variant)
    }

    /// [`DeviceSession::start_stream`] with a shared consumer.
    pub fn start_stream_with(
        &mut self,
        consumer: FrameConsumer,
        variant: StreamVariant,
    ) -> Result<i32> {
        let sdk = self.runtime.sdk()?;
        let session = self.session_handle.ok_or(Error::NotLoggedIn)?;
        let channel = self.channel();
        self.stream.start(sdk, session, channel, consumer, variant)
    }

    /// Stop live view. No-op if nothing is streaming; never fails.
    pub fn stop_stream(&mut self) {
        let sdk = self.runtime.sdk().ok();
        self.stream.stop(sdk);
    }

    /// Grab a JPEG still from the start channel without a live stream.
    /// Blocks until the device returns the picture.
    pub fn capture_jpeg(&self) -> Result<Bytes> {
        self.capture_jpeg_with(JpegParams::default())
    }

    /// [`DeviceSession::capture_jpeg`] with explicit picture parameters.
    pub fn capture_jpeg_with(&self, params: JpegParams) -> Result<Bytes> {
        let sdk = self.runtime.sdk()?;
        let session = self.session_handle.ok_or(Error::NotLoggedIn)?;
        let channel = self.channel();

        let mut buffer = vec![0u8; STILL_CAPTURE_BUFFER_SIZE];
        let Some(size) = sdk.capture_jpeg(session, channel, &params, &mut buffer) else {
            let code = sdk.last_error();
            warn!(channel, code, "Still capture failed");
            return Err(Error::Capture { code });
        };

        buffer.truncate(size);
        debug!(channel, size, "Captured JPEG still");
        Ok(Bytes::from(buffer))
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.logout();
    }
}
