//! Device SDK boundary
//!
//! Everything this crate needs from HCNetSDK goes through the [`DeviceSdk`]
//! trait. Calls keep the SDK's own conventions (negative handles, `false`
//! returns, a thread-local last-error code); turning those sentinels into
//! [`crate::Error`] values is the caller's job, not the backend's.
//!
//! Backends:
//! - [`native::HcNetSdk`] loads the vendor shared library at runtime (`native` feature)
//! - [`mock::MockSdk`] is an in-memory device with its own delivery thread (`mock-sdk` feature)

#[cfg(feature = "native")]
pub mod native;

#[cfg(feature = "mock-sdk")]
pub mod mock;

use std::os::raw::c_void;

/// Maximum byte length of the device address field (`NET_DVR_DEV_ADDRESS_MAX_LEN`).
pub const DEV_ADDRESS_MAX_LEN: usize = 129;
/// Maximum byte length of the user name field (`NET_DVR_LOGIN_USERNAME_MAX_LEN`).
pub const LOGIN_USERNAME_MAX_LEN: usize = 64;
/// Maximum byte length of the password field (`NET_DVR_LOGIN_PASSWD_MAX_LEN`).
pub const LOGIN_PASSWD_MAX_LEN: usize = 64;
/// Length of the serial number reported at login.
pub const SERIALNO_LEN: usize = 48;

/// Real-data callback tag: system header (stream initialisation metadata).
pub const NET_DVR_SYSHEAD: u32 = 1;
/// Real-data callback tag: encoded stream data.
pub const NET_DVR_STREAMDATA: u32 = 2;
/// Real-data callback tag: audio-only stream data.
pub const NET_DVR_AUDIOSTREAMDATA: u32 = 3;
/// Real-data callback tag: private (vendor) data.
pub const NET_DVR_PRIVATE_DATA: u32 = 112;

/// Signature of the real-data callback handed to `NET_DVR_RealPlay_V40`.
///
/// Arguments: stream handle, data type tag, buffer, buffer size, user context.
pub type RealDataCallback =
    unsafe extern "system" fn(i32, u32, *mut u8, u32, *mut c_void);

/// Encoded login parameters, one fixed-capacity buffer per string field.
///
/// Buffers are zero-filled past the encoded bytes; a field that fills its
/// whole buffer carries no terminator, as the SDK structure allows.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub device_address: [u8; DEV_ADDRESS_MAX_LEN],
    pub username: [u8; LOGIN_USERNAME_MAX_LEN],
    pub password: [u8; LOGIN_PASSWD_MAX_LEN],
    pub port: u16,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("device_address", &trim_nul(&self.device_address))
            .field("username", &trim_nul(&self.username))
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

impl LoginRequest {
    /// Encoded address bytes without the zero padding.
    pub fn address_bytes(&self) -> &[u8] {
        trim_nul(&self.device_address)
    }

    /// Encoded user name bytes without the zero padding.
    pub fn username_bytes(&self) -> &[u8] {
        trim_nul(&self.username)
    }
}

fn trim_nul(buf: &[u8]) -> &[u8] {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    &buf[..end]
}

/// Device metadata returned by a successful login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device serial number
    pub serial_number: String,
    /// First analog channel number; live view and capture target this channel
    pub start_channel: u8,
    /// Number of analog channels
    pub channel_count: u8,
    /// First digital (IP) channel number
    pub start_digital_channel: u8,
    /// Number of digital (IP) channels
    pub ip_channel_count: u16,
    /// Vendor device type code
    pub device_type: u16,
}

/// Which encoding of the channel to fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StreamVariant {
    /// Full-resolution main stream
    #[default]
    Main,
    /// Lower resolution/bitrate sub-stream
    Sub,
}

impl StreamVariant {
    /// Pick the variant from a "sub-stream?" flag.
    pub fn from_sub_stream(is_sub_stream: bool) -> Self {
        if is_sub_stream {
            StreamVariant::Sub
        } else {
            StreamVariant::Main
        }
    }

    /// `dwStreamType` value.
    pub fn as_u32(&self) -> u32 {
        match self {
            StreamVariant::Main => 0,
            StreamVariant::Sub => 1,
        }
    }
}

impl std::fmt::Display for StreamVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamVariant::Main => write!(f, "main"),
            StreamVariant::Sub => write!(f, "sub"),
        }
    }
}

/// Transport link mode (`dwLinkMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Tcp,
    Udp,
    Multicast,
    Rtp,
    RtpRtsp,
    RtspHttp,
}

impl LinkMode {
    pub fn as_u32(&self) -> u32 {
        match self {
            LinkMode::Tcp => 0,
            LinkMode::Udp => 1,
            LinkMode::Multicast => 2,
            LinkMode::Rtp => 3,
            LinkMode::RtpRtsp => 4,
            LinkMode::RtspHttp => 5,
        }
    }
}

/// Application-layer streaming protocol (`byProtoType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    Private,
    Rtsp,
}

impl StreamProtocol {
    pub fn as_u8(&self) -> u8 {
        match self {
            StreamProtocol::Private => 0,
            StreamProtocol::Rtsp => 1,
        }
    }
}

/// Live-view request passed to `start_preview`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewRequest {
    pub channel: i32,
    pub variant: StreamVariant,
    pub link_mode: LinkMode,
    pub protocol: StreamProtocol,
    pub blocking: bool,
}

impl PreviewRequest {
    /// Live view over UDP/RTSP with blocking fetch, the only mode the session uses.
    pub fn live(channel: i32, variant: StreamVariant) -> Self {
        Self {
            channel,
            variant,
            link_mode: LinkMode::Udp,
            protocol: StreamProtocol::Rtsp,
            blocking: true,
        }
    }
}

/// JPEG still-capture parameters (`NET_DVR_JPEGPARA`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JpegParams {
    /// Picture size code (0 = CIF, 0xff = auto)
    pub size: u16,
    /// Picture quality (0 = best, 1 = better, 2 = average)
    pub quality: u16,
}

/// Where the SDK should deliver real-time data: a callback plus an opaque
/// context value the SDK passes back on every invocation.
#[derive(Clone, Copy)]
pub struct DeliveryTarget {
    pub callback: RealDataCallback,
    pub context: *mut c_void,
}

// SAFETY: `context` is an opaque integer token, never dereferenced; the
// callback is a plain function pointer.
unsafe impl Send for DeliveryTarget {}
unsafe impl Sync for DeliveryTarget {}

impl std::fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTarget")
            .field("context", &(self.context as usize))
            .finish()
    }
}

impl DeliveryTarget {
    /// Invoke the callback the way the SDK delivery thread does.
    pub fn deliver(&self, stream_handle: i32, data_type: u32, data: &[u8]) {
        // SAFETY: the callback only reads `data.len()` bytes from the pointer,
        // and `data` outlives the call.
        unsafe {
            (self.callback)(
                stream_handle,
                data_type,
                data.as_ptr() as *mut u8,
                data.len() as u32,
                self.context,
            )
        }
    }
}

/// Calls consumed from the vendor device SDK.
///
/// Implementations must be callable from any thread. Failure is reported the
/// way HCNetSDK reports it: `false`, a negative handle or `None`, with the
/// reason available from [`DeviceSdk::last_error`].
pub trait DeviceSdk: Send + Sync {
    /// `NET_DVR_Init`
    fn init(&self) -> bool;

    /// `NET_DVR_Cleanup`
    fn cleanup(&self) -> bool;

    /// `NET_DVR_SetConnectTime`
    fn set_connect_time(&self, timeout_ms: u32, retries: u32) -> bool;

    /// `NET_DVR_SetReconnect`
    fn set_reconnect(&self, interval_ms: u32, retries: u32) -> bool;

    /// `NET_DVR_Login_V40`: returns the session handle, negative on failure.
    fn login(&self, request: &LoginRequest, device: &mut DeviceInfo) -> i32;

    /// `NET_DVR_Logout`
    fn logout(&self, session: i32) -> bool;

    /// `NET_DVR_RealPlay_V40`: returns the stream handle, negative on failure.
    fn start_preview(&self, session: i32, request: &PreviewRequest, target: DeliveryTarget) -> i32;

    /// `NET_DVR_StopRealPlay`
    fn stop_preview(&self, stream: i32) -> bool;

    /// `NET_DVR_CaptureJPEGPicture_NEW`: returns the picture size written into `buffer`.
    fn capture_jpeg(
        &self,
        session: i32,
        channel: i32,
        params: &JpegParams,
        buffer: &mut [u8],
    ) -> Option<usize>;

    /// `NET_DVR_GetLastError`
    fn last_error(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_variant_codes() {
        assert_eq!(StreamVariant::Main.as_u32(), 0);
        assert_eq!(StreamVariant::Sub.as_u32(), 1);
        assert_eq!(StreamVariant::from_sub_stream(true), StreamVariant::Sub);
        assert_eq!(StreamVariant::from_sub_stream(false), StreamVariant::Main);
        assert_eq!(StreamVariant::default(), StreamVariant::Main);
    }

    #[test]
    fn test_live_preview_uses_udp_rtsp_blocking() {
        let req = PreviewRequest::live(33, StreamVariant::Sub);
        assert_eq!(req.channel, 33);
        assert_eq!(req.link_mode.as_u32(), 1);
        assert_eq!(req.protocol.as_u8(), 1);
        assert!(req.blocking);
    }

    #[test]
    fn test_login_request_debug_hides_password() {
        let mut req = LoginRequest {
            device_address: [0; DEV_ADDRESS_MAX_LEN],
            username: [0; LOGIN_USERNAME_MAX_LEN],
            password: [0; LOGIN_PASSWD_MAX_LEN],
            port: 8000,
        };
        req.password[..6].copy_from_slice(b"secret");
        req.username[..5].copy_from_slice(b"admin");

        let dbg = format!("{:?}", req);
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("<redacted>"));
        assert_eq!(req.username_bytes(), b"admin");
    }
}
