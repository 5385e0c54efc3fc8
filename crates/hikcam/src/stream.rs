//! Live stream control
//!
//! A [`StreamController`] owns at most one live-view handle. Starting a new
//! stream always tears down the previous one first, and the dispatcher
//! registration lives exactly as long as the handle it serves.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dispatch::{DispatchSnapshot, FrameConsumer, FrameDispatcher, Registration};
use crate::error::{Error, Result};
use crate::sdk::{DeviceSdk, PreviewRequest, StreamVariant};

struct ActiveStream {
    handle: i32,
    variant: StreamVariant,
    registration: Registration,
}

/// Zero-or-one active live stream for a device session.
#[derive(Default)]
pub struct StreamController {
    active: Option<ActiveStream>,
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("handle", &self.handle())
            .field("variant", &self.variant())
            .finish()
    }
}

impl StreamController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// SDK handle of the active stream.
    pub fn handle(&self) -> Option<i32> {
        self.active.as_ref().map(|a| a.handle)
    }

    pub fn variant(&self) -> Option<StreamVariant> {
        self.active.as_ref().map(|a| a.variant)
    }

    /// Dispatch counters of the active stream.
    pub fn stats(&self) -> Option<DispatchSnapshot> {
        self.active
            .as_ref()
            .map(|a| a.registration.dispatcher().stats().snapshot())
    }

    /// Start live view of `channel` on `session`, replacing any active stream.
    ///
    /// The dispatcher is registered before the SDK is asked to play, since
    /// the first callback may arrive before `start_preview` returns.
    pub(crate) fn start(
        &mut self,
        sdk: &dyn DeviceSdk,
        session: i32,
        channel: i32,
        consumer: FrameConsumer,
        variant: StreamVariant,
    ) -> Result<i32> {
        if self.is_active() {
            debug!("Replacing active stream");
            self.stop(Some(sdk));
        }

        let registration = Registration::new(Arc::new(FrameDispatcher::new(consumer)));
        let request = PreviewRequest::live(channel, variant);

        let handle = sdk.start_preview(session, &request, registration.target());
        if handle < 0 {
            let code = sdk.last_error();
            warn!(channel, %variant, code, "Failed to start live stream");
            return Err(Error::StreamStart { code });
        }

        info!("Live stream started: channel {} ({} stream), handle {}", channel, variant, handle);
        self.active = Some(ActiveStream {
            handle,
            variant,
            registration,
        });
        Ok(handle)
    }

    /// Stop the active stream, if any. Never fails.
    ///
    /// Local state is cleared and the dispatcher deregistered whatever the
    /// SDK reports. With `sdk` set to `None` (runtime already shut down) the
    /// native stop is skipped. A callback already in flight may still run to
    /// completion after this returns.
    pub(crate) fn stop(&mut self, sdk: Option<&dyn DeviceSdk>) {
        let Some(active) = self.active.take() else {
            return;
        };

        match sdk {
            Some(sdk) => {
                if !sdk.stop_preview(active.handle) {
                    warn!(
                        handle = active.handle,
                        code = sdk.last_error(),
                        "SDK reported failure stopping live stream"
                    );
                }
            }
            None => debug!(handle = active.handle, "SDK not initialised, skipping native stop"),
        }

        let stats = active.registration.dispatcher().stats().snapshot();
        info!(
            "Live stream {} stopped: {} packets, {} bytes",
            active.handle,
            stats.delivered(),
            stats.bytes
        );
    }
}
