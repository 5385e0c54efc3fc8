//! In-memory device SDK
//!
//! Behaves like a single reachable camera: logins succeed with handle 1
//! unless scripted otherwise, every call is recorded, and live data can be
//! pushed through the registered callback either inline ([`MockSdk::emit`])
//! or from a dedicated delivery thread ([`MockSdk::start_feed`]), the way the
//! vendor SDK's own threads would.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};

use super::{
    DeliveryTarget, DeviceInfo, DeviceSdk, JpegParams, LoginRequest, PreviewRequest,
    NET_DVR_STREAMDATA, NET_DVR_SYSHEAD,
};

/// A call received by the mock, in order of arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdkCall {
    Init,
    Cleanup,
    SetConnectTime { timeout_ms: u32, retries: u32 },
    SetReconnect { interval_ms: u32, retries: u32 },
    Login { address: String, username: String, port: u16 },
    Logout { session: i32 },
    StartPreview { session: i32, request: PreviewRequest },
    StopPreview { stream: i32 },
    CaptureJpeg { session: i32, channel: i32 },
}

struct MockState {
    calls: Vec<SdkCall>,
    last_error: u32,
    init_error: Option<u32>,
    login: Result<i32, u32>,
    stream_error: Option<u32>,
    capture: Result<Vec<u8>, u32>,
    teardown_ok: bool,
    device: DeviceInfo,
    next_stream: i32,
    targets: HashMap<i32, DeliveryTarget>,
    active: HashSet<i32>,
}

/// Scriptable stand-in for HCNetSDK.
pub struct MockSdk {
    state: Mutex<MockState>,
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockSdk")
            .field("calls", &state.calls.len())
            .field("active_streams", &state.active.len())
            .finish()
    }
}

impl MockSdk {
    /// A device with one analog channel starting at 1.
    pub fn new() -> Self {
        Self::with_device(DeviceInfo {
            serial_number: "DS-2CD2143G2-I20240101AAWRF00000000".to_string(),
            start_channel: 1,
            channel_count: 1,
            start_digital_channel: 33,
            ip_channel_count: 0,
            device_type: 31,
        })
    }

    /// A device reporting `device` at login.
    pub fn with_device(device: DeviceInfo) -> Self {
        Self {
            state: Mutex::new(MockState {
                calls: Vec::new(),
                last_error: 0,
                init_error: None,
                login: Ok(1),
                stream_error: None,
                capture: Ok(Vec::new()),
                teardown_ok: true,
                device,
                next_stream: 0,
                targets: HashMap::new(),
                active: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scripting ────────────────────────────────────────────────────

    /// Make `init` fail with `code`.
    pub fn fail_init(&self, code: u32) {
        self.lock().init_error = Some(code);
    }

    /// Make `login` return `handle`.
    pub fn set_login_handle(&self, handle: i32) {
        self.lock().login = Ok(handle);
    }

    /// Make `login` return -1 with `code` as the last error.
    pub fn fail_login(&self, code: u32) {
        self.lock().login = Err(code);
    }

    /// Make `start_preview` return -1 with `code` as the last error.
    pub fn fail_stream_start(&self, code: u32) {
        self.lock().stream_error = Some(code);
    }

    /// Picture returned by `capture_jpeg`.
    pub fn set_capture_image(&self, image: Vec<u8>) {
        self.lock().capture = Ok(image);
    }

    /// Make `capture_jpeg` fail with `code`.
    pub fn fail_capture(&self, code: u32) {
        self.lock().capture = Err(code);
    }

    /// Make `logout`, `stop_preview` and `cleanup` report failure.
    pub fn fail_teardown(&self, code: u32) {
        let mut state = self.lock();
        state.teardown_ok = false;
        state.last_error = code;
    }

    pub fn set_last_error(&self, code: u32) {
        self.lock().last_error = code;
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// Every call received so far.
    pub fn calls(&self) -> Vec<SdkCall> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&SdkCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Streams started and not yet stopped.
    pub fn active_streams(&self) -> Vec<i32> {
        let mut streams: Vec<i32> = self.lock().active.iter().copied().collect();
        streams.sort_unstable();
        streams
    }

    // ── Delivery ─────────────────────────────────────────────────────

    /// Deliver one chunk on the calling thread if `stream` is active.
    ///
    /// Returns false if the stream is not active.
    pub fn emit(&self, stream: i32, data_type: u32, data: &[u8]) -> bool {
        let target = {
            let state = self.lock();
            if !state.active.contains(&stream) {
                return false;
            }
            state.targets.get(&stream).copied()
        };
        match target {
            Some(target) => {
                target.deliver(stream, data_type, data);
                true
            }
            None => false,
        }
    }

    /// Deliver one chunk through the callback `stream` was started with,
    /// even if it has been stopped since. Models a callback that was already
    /// in flight when `stop_preview` returned.
    pub fn emit_late(&self, stream: i32, data_type: u32, data: &[u8]) -> bool {
        let target = self.lock().targets.get(&stream).copied();
        match target {
            Some(target) => {
                target.deliver(stream, data_type, data);
                true
            }
            None => false,
        }
    }

    /// Start a delivery thread that sends a system header followed by body
    /// chunks every `config.interval` until the stream stops or the feed is
    /// stopped.
    pub fn start_feed(self: &Arc<Self>, stream: i32, config: FeedConfig) -> MockFeed {
        let stop = Arc::new(AtomicBool::new(false));
        let sdk = Arc::clone(self);
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("mock-sdk-delivery".into())
            .spawn(move || run_feed(&sdk, stream, &config, &stop_flag))
            .ok();

        MockFeed { stop, handle }
    }
}

/// Synthetic stream shape for [`MockSdk::start_feed`].
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Delay between body chunks
    pub interval: Duration,
    /// Size of each body chunk in bytes
    pub chunk_size: usize,
    /// Stop after this many body chunks (None = until stopped)
    pub max_chunks: Option<u64>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(40), // 25fps
            chunk_size: 8 * 1024,
            max_chunks: None,
        }
    }
}

/// Handle to a running mock delivery thread.
pub struct MockFeed {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl MockFeed {
    /// Stop the feed and return the number of body chunks delivered.
    pub fn stop(mut self) -> u64 {
        self.stop.store(true, Ordering::Relaxed);
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or(0)
    }

    /// Wait for the feed to end by itself (stream stopped or `max_chunks`).
    pub fn join(mut self) -> u64 {
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for MockFeed {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Header chunk the mock sends first: a 40-byte "IMKH" media header.
pub fn mock_header() -> Vec<u8> {
    let mut header = b"IMKH".to_vec();
    header.extend_from_slice(&[0x01, 0x01, 0x00, 0x00, 0x02, 0x00, 0x00, 0x01]);
    header.resize(40, 0);
    header
}

fn mock_body(seq: u64, size: usize) -> Vec<u8> {
    // MPEG-PS pack start code followed by a sequence-dependent pattern
    let mut body = vec![0x00, 0x00, 0x01, 0xBA];
    body.extend_from_slice(&seq.to_be_bytes());
    body.resize(size.max(12), (seq & 0xFF) as u8);
    body
}

fn run_feed(sdk: &MockSdk, stream: i32, config: &FeedConfig, stop: &AtomicBool) -> u64 {
    if !sdk.emit(stream, NET_DVR_SYSHEAD, &mock_header()) {
        debug!(stream, "Mock feed: stream not active");
        return 0;
    }
    info!(stream, "Mock delivery thread started");

    let mut sent = 0u64;
    while !stop.load(Ordering::Relaxed) {
        if config.max_chunks.is_some_and(|max| sent >= max) {
            break;
        }
        std::thread::sleep(config.interval);
        if !sdk.emit(stream, NET_DVR_STREAMDATA, &mock_body(sent, config.chunk_size)) {
            break;
        }
        sent += 1;
    }

    info!(stream, "Mock delivery thread finished after {} chunks", sent);
    sent
}

fn from_fixed(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

impl DeviceSdk for MockSdk {
    fn init(&self) -> bool {
        let mut state = self.lock();
        state.calls.push(SdkCall::Init);
        match state.init_error {
            Some(code) => {
                state.last_error = code;
                false
            }
            None => true,
        }
    }

    fn cleanup(&self) -> bool {
        let mut state = self.lock();
        state.calls.push(SdkCall::Cleanup);
        state.teardown_ok
    }

    fn set_connect_time(&self, timeout_ms: u32, retries: u32) -> bool {
        self.lock()
            .calls
            .push(SdkCall::SetConnectTime { timeout_ms, retries });
        true
    }

    fn set_reconnect(&self, interval_ms: u32, retries: u32) -> bool {
        self.lock()
            .calls
            .push(SdkCall::SetReconnect { interval_ms, retries });
        true
    }

    fn login(&self, request: &LoginRequest, device: &mut DeviceInfo) -> i32 {
        let mut state = self.lock();
        state.calls.push(SdkCall::Login {
            address: from_fixed(&request.device_address),
            username: from_fixed(&request.username),
            port: request.port,
        });
        let login = state.login;
        match login {
            Ok(handle) => {
                *device = state.device.clone();
                handle
            }
            Err(code) => {
                state.last_error = code;
                -1
            }
        }
    }

    fn logout(&self, session: i32) -> bool {
        let mut state = self.lock();
        state.calls.push(SdkCall::Logout { session });
        state.teardown_ok
    }

    fn start_preview(&self, session: i32, request: &PreviewRequest, target: DeliveryTarget) -> i32 {
        let mut state = self.lock();
        state.calls.push(SdkCall::StartPreview {
            session,
            request: *request,
        });
        if let Some(code) = state.stream_error {
            state.last_error = code;
            return -1;
        }
        let stream = state.next_stream;
        state.next_stream += 1;
        state.targets.insert(stream, target);
        state.active.insert(stream);
        stream
    }

    fn stop_preview(&self, stream: i32) -> bool {
        let mut state = self.lock();
        state.calls.push(SdkCall::StopPreview { stream });
        state.active.remove(&stream);
        state.teardown_ok
    }

    fn capture_jpeg(
        &self,
        session: i32,
        channel: i32,
        _params: &JpegParams,
        buffer: &mut [u8],
    ) -> Option<usize> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.calls.push(SdkCall::CaptureJpeg { session, channel });
        match &state.capture {
            Ok(image) if image.len() <= buffer.len() => {
                buffer[..image.len()].copy_from_slice(image);
                Some(image.len())
            }
            Ok(_) => {
                // NET_DVR_NOENOUGH_BUF
                state.last_error = 43;
                None
            }
            Err(code) => {
                state.last_error = *code;
                None
            }
        }
    }

    fn last_error(&self) -> u32 {
        self.lock().last_error
    }
}
