//! Session lifecycle tests against the in-memory SDK
//!
//! Drives `SdkRuntime` → `DeviceSession` → `StreamController` → dispatcher
//! end to end, with live data pushed from the mock's own delivery thread.
//!
//! Run: `cargo test -p hikcam --test session`

#![cfg(feature = "mock-sdk")]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hikcam::sdk::mock::{mock_header, FeedConfig, MockSdk, SdkCall};
use hikcam::sdk::{PreviewRequest, NET_DVR_STREAMDATA};
use hikcam::{
    frame_channel, CredentialField, Credentials, DeviceSession, EncodingError, Error, FrameKind,
    FramePacket, SdkRuntime, StreamVariant,
};

// ── Shared helpers ───────────────────────────────────────────────────

fn runtime(mock: &Arc<MockSdk>) -> Arc<SdkRuntime> {
    SdkRuntime::init(mock.clone()).unwrap()
}

fn logged_in(mock: &Arc<MockSdk>) -> DeviceSession {
    let mut session = DeviceSession::new(
        runtime(mock),
        Credentials::new("admin", "hik12345", "192.168.1.64"),
    );
    session.login().unwrap();
    session
}

fn preview_calls(mock: &MockSdk) -> Vec<SdkCall> {
    mock.calls()
        .into_iter()
        .filter(|c| matches!(c, SdkCall::StartPreview { .. } | SdkCall::StopPreview { .. }))
        .collect()
}

fn collector() -> (Arc<Mutex<Vec<FramePacket>>>, impl Fn(FramePacket) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |packet: FramePacket| sink.lock().unwrap().push(packet))
}

// ── Login ────────────────────────────────────────────────────────────

#[test]
fn login_sends_credentials_and_stores_handle() {
    let mock = Arc::new(MockSdk::new());
    let session = logged_in(&mock);

    assert_eq!(session.session_handle(), Some(1));
    assert!(mock.calls().contains(&SdkCall::Login {
        address: "192.168.1.64".into(),
        username: "admin".into(),
        port: 8000,
    }));
}

#[test]
fn login_uses_configured_port() {
    let mock = Arc::new(MockSdk::new());
    let mut session = DeviceSession::new(
        runtime(&mock),
        Credentials::new("admin", "pw", "nvr.local").with_port(8001),
    );

    session.login().unwrap();

    assert_eq!(mock.count(|c| matches!(c, SdkCall::Login { port: 8001, .. })), 1);
}

#[test]
fn login_failure_reports_sdk_code() {
    let mock = Arc::new(MockSdk::new());
    mock.fail_login(7);
    let mut session = DeviceSession::new(runtime(&mock), Credentials::new("admin", "bad", "10.0.0.2"));

    let err = session.login().unwrap_err();

    assert!(matches!(err, Error::Login { code: 7 }));
    assert_eq!(err.code(), Some(7));
    assert!(!session.is_logged_in());
}

#[test]
fn oversized_credentials_never_reach_sdk() {
    let mock = Arc::new(MockSdk::new());
    let mut session = DeviceSession::new(
        runtime(&mock),
        Credentials::new("u".repeat(65), "pw", "10.0.0.2"),
    );

    let err = session.login().unwrap_err();

    assert!(matches!(
        err,
        Error::Encoding(EncodingError::TooLong {
            field: CredentialField::Username,
            len: 65,
            capacity: 64,
        })
    ));
    assert_eq!(mock.count(|c| matches!(c, SdkCall::Login { .. })), 0);
}

#[test]
fn logout_twice_is_safe() {
    let mock = Arc::new(MockSdk::new());
    let mut session = logged_in(&mock);

    session.logout();
    assert_eq!(session.session_handle(), None);
    session.logout();

    assert_eq!(mock.count(|c| matches!(c, SdkCall::Logout { .. })), 1);
}

#[test]
fn logout_clears_state_when_sdk_fails() {
    let mock = Arc::new(MockSdk::new());
    let mut session = logged_in(&mock);
    session.start_stream(|_| {}, StreamVariant::Main).unwrap();
    mock.fail_teardown(3);

    session.logout();

    assert!(!session.is_logged_in());
    assert!(!session.is_streaming());
}

// ── Streaming ────────────────────────────────────────────────────────

#[test]
fn stream_variant_selects_preview_stream_type() {
    let mock = Arc::new(MockSdk::new());
    let mut session = logged_in(&mock);

    session.start_stream(|_| {}, StreamVariant::from_sub_stream(true)).unwrap();
    session.start_stream(|_| {}, StreamVariant::from_sub_stream(false)).unwrap();

    let types: Vec<u32> = mock
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            SdkCall::StartPreview { request, .. } => Some(request.variant.as_u32()),
            _ => None,
        })
        .collect();
    assert_eq!(types, vec![1, 0]);
}

#[test]
fn second_start_stops_previous_stream_first() {
    let mock = Arc::new(MockSdk::new());
    let mut session = logged_in(&mock);

    let first = session.start_stream(|_| {}, StreamVariant::Main).unwrap();
    let second = session.start_stream(|_| {}, StreamVariant::Sub).unwrap();

    assert_ne!(first, second);
    assert_eq!(session.stream_handle(), Some(second));
    assert_eq!(
        preview_calls(&mock),
        vec![
            SdkCall::StartPreview {
                session: 1,
                request: PreviewRequest::live(1, StreamVariant::Main),
            },
            SdkCall::StopPreview { stream: first },
            SdkCall::StartPreview {
                session: 1,
                request: PreviewRequest::live(1, StreamVariant::Sub),
            },
        ]
    );
    assert_eq!(mock.active_streams(), vec![second]);
}

#[test]
fn stop_stream_without_stream_is_noop() {
    let mock = Arc::new(MockSdk::new());
    let mut session = logged_in(&mock);
    let before = mock.calls().len();

    session.stop_stream();

    assert_eq!(mock.calls().len(), before);
}

#[test]
fn stream_start_failure_leaves_session_idle() {
    let mock = Arc::new(MockSdk::new());
    mock.fail_stream_start(10);
    let mut session = logged_in(&mock);

    let err = session.start_stream(|_| {}, StreamVariant::Main).unwrap_err();

    assert!(matches!(err, Error::StreamStart { code: 10 }));
    assert!(!session.is_streaming());
    assert!(session.is_logged_in());
}

#[test]
fn frames_reach_consumer_in_order() {
    let mock = Arc::new(MockSdk::new());
    let mut session = logged_in(&mock);
    let (seen, consumer) = collector();

    let handle = session.start_stream(consumer, StreamVariant::Main).unwrap();
    let feed = mock.start_feed(
        handle,
        FeedConfig {
            interval: Duration::from_millis(1),
            chunk_size: 64,
            max_chunks: Some(5),
        },
    );
    assert_eq!(feed.join(), 5);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 6);
    assert_eq!(seen[0].kind, FrameKind::Header);
    assert_eq!(&seen[0].payload[..], &mock_header()[..]);
    assert!(seen[1..].iter().all(|p| p.kind == FrameKind::Body && p.len() == 64));

    let stats = session.stream_stats().unwrap();
    assert_eq!(stats.headers, 1);
    assert_eq!(stats.bodies, 5);
}

#[test]
fn no_delivery_after_stop() {
    let mock = Arc::new(MockSdk::new());
    let mut session = logged_in(&mock);
    let (seen, consumer) = collector();

    let handle = session.start_stream(consumer, StreamVariant::Main).unwrap();
    assert!(mock.emit(handle, NET_DVR_STREAMDATA, b"live"));
    session.stop_stream();

    // Inactive streams get nothing, and a callback already in flight is ignored
    assert!(!mock.emit(handle, NET_DVR_STREAMDATA, b"stopped"));
    assert!(mock.emit_late(handle, NET_DVR_STREAMDATA, b"late"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(&seen[0].payload[..], b"live");
}

#[tokio::test(flavor = "multi_thread")]
async fn frame_channel_bridges_delivery_thread() {
    let mock = Arc::new(MockSdk::new());
    let mut session = logged_in(&mock);
    let (consumer, mut rx) = frame_channel(16);

    let handle = session.start_stream_with(consumer, StreamVariant::Sub).unwrap();
    let feed = mock.start_feed(
        handle,
        FeedConfig {
            interval: Duration::from_millis(1),
            chunk_size: 128,
            max_chunks: Some(3),
        },
    );

    let mut packets = Vec::new();
    while packets.len() < 4 {
        let packet = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for frames")
            .expect("channel closed");
        packets.push(packet);
    }

    assert_eq!(tokio::task::spawn_blocking(move || feed.join()).await.unwrap(), 3);
    assert!(packets[0].is_header());
    assert!(packets[1..].iter().all(|p| !p.is_header()));
}

// ── Runtime & teardown ───────────────────────────────────────────────

/// Start a free-running feed, wait for frames to flow, then run `stop` while
/// the delivery thread is still sending. Returns (seen at stop, seen after the
/// feed ended, body chunks the feed sent).
fn stop_during_delivery(stop: impl FnOnce(&mut DeviceSession)) -> (usize, usize, u64) {
    let mock = Arc::new(MockSdk::new());
    let mut session = logged_in(&mock);
    let (seen, consumer) = collector();

    let handle = session.start_stream(consumer, StreamVariant::Main).unwrap();
    let feed = mock.start_feed(
        handle,
        FeedConfig {
            interval: Duration::from_micros(50),
            chunk_size: 32,
            max_chunks: None,
        },
    );

    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.lock().unwrap().len() < 20 {
        assert!(Instant::now() < deadline, "feed never started delivering");
        std::thread::sleep(Duration::from_millis(1));
    }

    stop(&mut session);
    let at_stop = seen.lock().unwrap().len();
    assert!(!session.is_streaming());
    assert!(mock.active_streams().is_empty());

    // The feed notices the stream is gone and ends by itself
    let sent = feed.join();
    let after = seen.lock().unwrap().len();
    (at_stop, after, sent)
}

#[test]
fn stop_stream_during_live_delivery() {
    let (at_stop, after, sent) = stop_during_delivery(|s| s.stop_stream());

    assert!(after - at_stop <= 1, "{} frames after stop", after - at_stop);
    assert!(after as u64 <= sent + 1);
}

#[test]
fn logout_during_live_delivery() {
    let (at_stop, after, sent) = stop_during_delivery(|s| s.logout());

    assert!(after - at_stop <= 1, "{} frames after logout", after - at_stop);
    assert!(after as u64 <= sent + 1);
}


#[test]
fn drop_releases_stream_and_session() {
    let mock = Arc::new(MockSdk::new());
    let mut session = logged_in(&mock);
    let handle = session.start_stream(|_| {}, StreamVariant::Main).unwrap();

    drop(session);

    let calls = mock.calls();
    let tail = &calls[calls.len() - 3..];
    assert_eq!(
        tail,
        &[
            SdkCall::StopPreview { stream: handle },
            SdkCall::Logout { session: 1 },
            SdkCall::Cleanup,
        ]
    );
}

#[test]
fn session_never_logged_in_never_logs_out() {
    let mock = Arc::new(MockSdk::new());
    let mut session = DeviceSession::new(runtime(&mock), Credentials::new("admin", "pw", "10.0.0.2"));

    session.logout();
    drop(session);

    assert_eq!(mock.count(|c| matches!(c, SdkCall::Logout { .. })), 0);
    assert_eq!(mock.count(|c| matches!(c, SdkCall::StopPreview { .. })), 0);
    assert_eq!(mock.count(|c| matches!(c, SdkCall::Cleanup)), 1);
}

#[test]
fn failed_login_drop_never_logs_out() {
    let mock = Arc::new(MockSdk::new());
    mock.fail_login(1);
    let mut session = DeviceSession::new(runtime(&mock), Credentials::new("admin", "bad", "10.0.0.2"));

    assert!(session.login().is_err());
    drop(session);

    assert_eq!(mock.count(|c| matches!(c, SdkCall::Logout { .. })), 0);
}

#[test]
fn session_outliving_runtime_fails_not_initialized() {
    let mock = Arc::new(MockSdk::new());
    let rt = runtime(&mock);
    let mut session = DeviceSession::new(Arc::clone(&rt), Credentials::new("admin", "pw", "10.0.0.2"));
    session.login().unwrap();

    rt.shutdown();

    assert!(matches!(
        session.start_stream(|_| {}, StreamVariant::Main),
        Err(Error::NotInitialized)
    ));
    assert!(matches!(session.capture_jpeg(), Err(Error::NotInitialized)));
    session.logout();
    assert_eq!(mock.count(|c| matches!(c, SdkCall::Logout { .. })), 0);
}

#[test]
fn capture_while_streaming() {
    let mock = Arc::new(MockSdk::new());
    mock.set_capture_image(vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9]);
    let mut session = logged_in(&mock);
    session.start_stream(|_| {}, StreamVariant::Main).unwrap();

    let jpeg = session.capture_jpeg().unwrap();

    assert_eq!(jpeg.len(), 5);
    assert!(session.is_streaming());
}
