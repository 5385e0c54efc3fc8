//! Frame dispatch across the native callback boundary
//!
//! HCNetSDK delivers live data by calling a C function pointer on one of its
//! own threads, passing back an opaque user context. The buffer it hands over
//! is only valid for the duration of that call.
//!
//! The context we give the SDK is an integer token, not a pointer. Tokens map
//! to [`FrameDispatcher`]s in a process-wide registry; a [`Registration`]
//! guard inserts the entry on stream start and removes it on drop. The
//! trampoline clones the dispatcher's `Arc` out of the registry before doing
//! any work, so a callback that arrives after the stream was stopped finds no
//! entry and is ignored instead of touching freed memory.

use std::collections::HashMap;
use std::os::raw::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::frame::{FrameKind, FramePacket};
use crate::sdk::DeliveryTarget;

/// Consumer invoked for every classified frame, on the SDK delivery thread.
///
/// It must return quickly: there is no buffering between the SDK and the
/// consumer, so a slow consumer stalls delivery of subsequent frames.
pub type FrameConsumer = Arc<dyn Fn(FramePacket) + Send + Sync>;

/// Counters for one stream's dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    headers: AtomicU64,
    bodies: AtomicU64,
    bytes: AtomicU64,
    empty: AtomicU64,
    unknown: AtomicU64,
    panics: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    /// Header packets delivered to the consumer
    pub headers: u64,
    /// Body packets delivered to the consumer
    pub bodies: u64,
    /// Payload bytes delivered to the consumer
    pub bytes: u64,
    /// Callbacks with a null or zero-length buffer
    pub empty: u64,
    /// Callbacks with an unrecognised data type tag
    pub unknown: u64,
    /// Consumer invocations that panicked
    pub panics: u64,
}

impl DispatchSnapshot {
    /// Packets handed to the consumer.
    pub fn delivered(&self) -> u64 {
        self.headers + self.bodies
    }
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            headers: self.headers.load(Ordering::Relaxed),
            bodies: self.bodies.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

/// Copies, classifies and forwards SDK buffers to a consumer.
pub struct FrameDispatcher {
    consumer: FrameConsumer,
    stats: DispatchStats,
}

impl std::fmt::Debug for FrameDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDispatcher")
            .field("stats", &self.stats)
            .finish()
    }
}

impl FrameDispatcher {
    pub fn new(consumer: FrameConsumer) -> Self {
        Self {
            consumer,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Handle one delivery from the SDK.
    ///
    /// # Safety
    ///
    /// Unless `buffer` is null, it must be valid for reads of `size` bytes for
    /// the duration of this call.
    pub unsafe fn dispatch_raw(&self, data_type: u32, buffer: *const u8, size: u32) {
        if buffer.is_null() || size == 0 {
            self.stats.empty.fetch_add(1, Ordering::Relaxed);
            return;
        }
        // SAFETY: non-null and valid for `size` bytes per the caller contract.
        let data = unsafe { std::slice::from_raw_parts(buffer, size as usize) };
        self.dispatch(data_type, data);
    }

    /// Copy `data` into an owned buffer and hand it to the consumer if the
    /// tag is recognised. Empty deliveries and unknown tags are dropped.
    pub fn dispatch(&self, data_type: u32, data: &[u8]) {
        if data.is_empty() {
            self.stats.empty.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let Some(kind) = FrameKind::from_tag(data_type) else {
            self.stats.unknown.fetch_add(1, Ordering::Relaxed);
            trace!(data_type, len = data.len(), "Dropping frame with unknown data type");
            return;
        };

        let packet = FramePacket {
            kind,
            payload: Bytes::copy_from_slice(data),
        };
        let len = packet.payload.len() as u64;

        let consumer = &self.consumer;
        if panic::catch_unwind(AssertUnwindSafe(|| consumer(packet))).is_err() {
            self.stats.panics.fetch_add(1, Ordering::Relaxed);
            error!(?kind, len, "Frame consumer panicked, frame dropped");
            return;
        }

        self.stats.bytes.fetch_add(len, Ordering::Relaxed);
        match kind {
            FrameKind::Header => {
                self.stats.headers.fetch_add(1, Ordering::Relaxed);
                debug!(len, "Stream header delivered");
            }
            FrameKind::Body => {
                let bodies = self.stats.bodies.fetch_add(1, Ordering::Relaxed) + 1;
                if bodies % 100 == 0 {
                    debug!(
                        "Live stream: {} chunks, {} bytes total",
                        bodies,
                        self.stats.bytes.load(Ordering::Relaxed)
                    );
                }
            }
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────

type Registry = RwLock<HashMap<u64, Arc<FrameDispatcher>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn lookup(token: u64) -> Option<Arc<FrameDispatcher>> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&token)
        .cloned()
}

/// Keeps a dispatcher reachable from the SDK callback while alive.
///
/// Dropping the registration removes the dispatcher from the registry;
/// callbacks already running keep their own `Arc` until they return.
#[derive(Debug)]
pub struct Registration {
    token: u64,
    dispatcher: Arc<FrameDispatcher>,
}

impl Registration {
    /// Register `dispatcher` under a fresh token.
    pub fn new(dispatcher: Arc<FrameDispatcher>) -> Self {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        registry()
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, Arc::clone(&dispatcher));
        trace!(token, "Frame dispatcher registered");
        Self { token, dispatcher }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn dispatcher(&self) -> &Arc<FrameDispatcher> {
        &self.dispatcher
    }

    /// Callback and context to pass to `start_preview`.
    pub fn target(&self) -> DeliveryTarget {
        DeliveryTarget {
            callback: real_data_callback,
            context: self.token as usize as *mut c_void,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        registry()
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.token);
        trace!(token = self.token, "Frame dispatcher deregistered");
    }
}

/// Whether a dispatcher is currently registered under `token`.
pub fn is_registered(token: u64) -> bool {
    lookup(token).is_some()
}

/// Real-data callback installed with `NET_DVR_RealPlay_V40`.
///
/// Runs on the SDK delivery thread. Never unwinds into the SDK.
pub unsafe extern "system" fn real_data_callback(
    stream_handle: i32,
    data_type: u32,
    buffer: *mut u8,
    size: u32,
    user: *mut c_void,
) {
    let token = user as usize as u64;
    let Some(dispatcher) = lookup(token) else {
        trace!(stream_handle, token, "Callback for a stopped stream, ignoring");
        return;
    };

    // SAFETY: the SDK guarantees `buffer` holds `size` bytes until we return.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        dispatcher.dispatch_raw(data_type, buffer, size)
    }));
    if outcome.is_err() {
        error!(stream_handle, "Frame dispatch panicked");
    }
}

// ── Channel bridge ───────────────────────────────────────────────────

/// Consumer that forwards frames into a bounded tokio channel.
///
/// Sending blocks the delivery thread while the channel is full, so a slow
/// receiver applies backpressure to the SDK. Once the receiver is dropped,
/// frames are discarded.
pub fn frame_channel(capacity: usize) -> (FrameConsumer, mpsc::Receiver<FramePacket>) {
    let (tx, rx) = mpsc::channel(capacity);
    let reported = AtomicBool::new(false);
    let consumer: FrameConsumer = Arc::new(move |packet: FramePacket| {
        if tx.blocking_send(packet).is_err() && !reported.swap(true, Ordering::Relaxed) {
            info!("Frame receiver dropped, discarding frames");
        }
    });
    (consumer, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::{NET_DVR_AUDIOSTREAMDATA, NET_DVR_STREAMDATA, NET_DVR_SYSHEAD};
    use std::sync::Mutex;

    fn recording() -> (FrameConsumer, Arc<Mutex<Vec<FramePacket>>>) {
        let seen: Arc<Mutex<Vec<FramePacket>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let consumer: FrameConsumer = Arc::new(move |p: FramePacket| sink.lock().unwrap().push(p));
        (consumer, seen)
    }

    #[test]
    fn test_zero_size_never_reaches_consumer() {
        let (consumer, seen) = recording();
        let dispatcher = FrameDispatcher::new(consumer);
        let data = [1u8, 2, 3];

        unsafe { dispatcher.dispatch_raw(NET_DVR_STREAMDATA, data.as_ptr(), 0) };

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().snapshot().empty, 1);
    }

    #[test]
    fn test_null_buffer_never_reaches_consumer() {
        let (consumer, seen) = recording();
        let dispatcher = FrameDispatcher::new(consumer);

        unsafe { dispatcher.dispatch_raw(NET_DVR_STREAMDATA, std::ptr::null(), 4096) };

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().snapshot().empty, 1);
    }

    #[test]
    fn test_stream_data_is_copied_as_body() {
        let (consumer, seen) = recording();
        let dispatcher = FrameDispatcher::new(consumer);
        let mut data: Vec<u8> = (0..=255).collect();

        unsafe {
            dispatcher.dispatch_raw(NET_DVR_STREAMDATA, data.as_ptr(), data.len() as u32)
        };
        // Source buffer is reused by the SDK after the callback returns
        data.fill(0xEE);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, FrameKind::Body);
        assert_eq!(seen[0].payload.len(), 256);
        assert_eq!(&seen[0].payload[..], &(0..=255).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn test_system_header_is_classified_as_header() {
        let (consumer, seen) = recording();
        let dispatcher = FrameDispatcher::new(consumer);

        dispatcher.dispatch(NET_DVR_SYSHEAD, b"IMKH\x01\x02");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind, FrameKind::Header);
        assert_eq!(&seen[0].payload[..], b"IMKH\x01\x02");
    }

    #[test]
    fn test_unknown_tag_is_dropped_silently() {
        let (consumer, seen) = recording();
        let dispatcher = FrameDispatcher::new(consumer);

        dispatcher.dispatch(NET_DVR_AUDIOSTREAMDATA, b"audio");
        dispatcher.dispatch(9999, b"future");

        assert!(seen.lock().unwrap().is_empty());
        let stats = dispatcher.stats().snapshot();
        assert_eq!(stats.unknown, 2);
        assert_eq!(stats.delivered(), 0);
    }

    #[test]
    fn test_stats_track_delivered_bytes() {
        let (consumer, _seen) = recording();
        let dispatcher = FrameDispatcher::new(consumer);

        dispatcher.dispatch(NET_DVR_SYSHEAD, &[0u8; 40]);
        dispatcher.dispatch(NET_DVR_STREAMDATA, &[0u8; 1000]);
        dispatcher.dispatch(NET_DVR_STREAMDATA, &[0u8; 500]);

        let stats = dispatcher.stats().snapshot();
        assert_eq!(stats.headers, 1);
        assert_eq!(stats.bodies, 2);
        assert_eq!(stats.bytes, 1540);
    }

    #[test]
    fn test_panicking_consumer_is_contained() {
        let consumer: FrameConsumer = Arc::new(|_: FramePacket| panic!("consumer bug"));
        let dispatcher = FrameDispatcher::new(consumer);

        dispatcher.dispatch(NET_DVR_STREAMDATA, b"data");
        dispatcher.dispatch(NET_DVR_STREAMDATA, b"data");

        let stats = dispatcher.stats().snapshot();
        assert_eq!(stats.panics, 2);
        assert_eq!(stats.bodies, 0);
    }

    #[test]
    fn test_registered_target_routes_to_dispatcher() {
        let (consumer, seen) = recording();
        let registration = Registration::new(Arc::new(FrameDispatcher::new(consumer)));
        let target = registration.target();

        target.deliver(5, NET_DVR_STREAMDATA, b"frame");

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(is_registered(registration.token()));
    }

    #[test]
    fn test_late_callback_after_deregistration_is_ignored() {
        let (consumer, seen) = recording();
        let registration = Registration::new(Arc::new(FrameDispatcher::new(consumer)));
        let target = registration.target();
        let token = registration.token();

        drop(registration);
        target.deliver(5, NET_DVR_STREAMDATA, b"late frame");

        assert!(seen.lock().unwrap().is_empty());
        assert!(!is_registered(token));
    }

    #[test]
    fn test_tokens_are_unique_and_non_zero() {
        let (consumer, _) = recording();
        let a = Registration::new(Arc::new(FrameDispatcher::new(Arc::clone(&consumer))));
        let b = Registration::new(Arc::new(FrameDispatcher::new(consumer)));
        assert_ne!(a.token(), 0);
        assert_ne!(a.token(), b.token());
    }

    #[test]
    fn test_callback_with_null_context_is_ignored() {
        let (consumer, seen) = recording();
        let _registration = Registration::new(Arc::new(FrameDispatcher::new(consumer)));
        let data = b"frame";

        unsafe {
            real_data_callback(
                1,
                NET_DVR_STREAMDATA,
                data.as_ptr() as *mut u8,
                data.len() as u32,
                std::ptr::null_mut(),
            )
        };

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_frame_channel_forwards_from_delivery_thread() {
        let (consumer, mut rx) = frame_channel(8);
        let dispatcher = Arc::new(FrameDispatcher::new(consumer));

        let d = Arc::clone(&dispatcher);
        std::thread::spawn(move || {
            d.dispatch(NET_DVR_SYSHEAD, b"head");
            d.dispatch(NET_DVR_STREAMDATA, b"body");
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first, FramePacket::header(Bytes::from_static(b"head")));
        assert_eq!(second, FramePacket::body(Bytes::from_static(b"body")));
    }
}
