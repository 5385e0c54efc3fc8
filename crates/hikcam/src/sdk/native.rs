//! HCNetSDK binding, loaded at runtime via `libloading`.
//!
//! Covers the calls needed for login, live view and JPEG capture. Structure
//! layouts follow `HCNetSDK.h`; all exported functions use the platform
//! system calling convention (`__stdcall` on 32-bit Windows).

use std::ffi::c_void;
use std::os::raw::c_char;
use std::path::Path;

use libloading::Library;
use tracing::{debug, info};

use super::{
    DeliveryTarget, DeviceInfo, DeviceSdk, JpegParams, LoginRequest, PreviewRequest,
    RealDataCallback, DEV_ADDRESS_MAX_LEN, LOGIN_PASSWD_MAX_LEN, LOGIN_USERNAME_MAX_LEN,
    SERIALNO_LEN,
};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Structures
// ---------------------------------------------------------------------------

type LoginResultCallback = unsafe extern "system" fn(i32, u32, *mut c_void, *mut c_void);

/// `NET_DVR_USER_LOGIN_INFO`
#[repr(C)]
#[allow(dead_code)]
struct NetDvrUserLoginInfo {
    device_address: [u8; DEV_ADDRESS_MAX_LEN],
    use_transport: u8,
    port: u16,
    user_name: [u8; LOGIN_USERNAME_MAX_LEN],
    password: [u8; LOGIN_PASSWD_MAX_LEN],
    login_result_cb: Option<LoginResultCallback>,
    user: *mut c_void,
    use_async_login: i32,
    proxy_type: u8,
    use_utc_time: u8,
    login_mode: u8,
    https: u8,
    proxy_id: i32,
    verify_mode: u8,
    reserved: [u8; 119],
}

/// `NET_DVR_DEVICEINFO_V30`
#[repr(C)]
#[allow(dead_code)]
#[derive(Clone, Copy)]
struct NetDvrDeviceInfoV30 {
    serial_number: [u8; SERIALNO_LEN],
    alarm_in_port_num: u8,
    alarm_out_port_num: u8,
    disk_num: u8,
    dvr_type: u8,
    chan_num: u8,
    start_chan: u8,
    audio_chan_num: u8,
    ip_chan_num: u8,
    zero_chan_num: u8,
    main_proto: u8,
    sub_proto: u8,
    support: u8,
    support1: u8,
    support2: u8,
    dev_type: u16,
    support3: u8,
    multi_stream_proto: u8,
    start_d_chan: u8,
    start_d_talk_chan: u8,
    high_d_chan_num: u8,
    support4: u8,
    language_type: u8,
    voice_in_chan_num: u8,
    start_voice_in_chan_no: u8,
    support5: u8,
    support6: u8,
    mirror_chan_num: u8,
    start_mirror_chan_no: u16,
    support7: u8,
    reserved: u8,
}

/// `NET_DVR_DEVICEINFO_V40`
#[repr(C)]
#[allow(dead_code)]
struct NetDvrDeviceInfoV40 {
    device_v30: NetDvrDeviceInfoV30,
    support_lock: u8,
    retry_login_time: u8,
    password_level: u8,
    proxy_type: u8,
    surplus_lock_time: u32,
    char_encode_type: u8,
    support_dev5: u8,
    support: u8,
    login_mode: u8,
    oem_code: u32,
    residual_validity: i32,
    residual_validity_flag: u8,
    single_start_d_talk_chan: u8,
    single_d_talk_chan_nums: u8,
    password_reset_level: u8,
    support_stream_encrypt: u8,
    market_type: u8,
    reserved: [u8; 238],
}

/// `NET_DVR_PREVIEWINFO`
#[repr(C)]
#[allow(dead_code)]
struct NetDvrPreviewInfo {
    channel: i32,
    stream_type: u32,
    link_mode: u32,
    play_wnd: *mut c_void,
    blocked: i32,
    passback_record: i32,
    preview_mode: u8,
    stream_id: [u8; 32],
    proto_type: u8,
    reserved1: u8,
    video_coding_type: u8,
    display_buf_num: u32,
    npq_mode: u8,
    recv_meta_data: u8,
    data_type: u8,
    reserved: [u8; 213],
}

/// `NET_DVR_JPEGPARA`
#[repr(C)]
#[allow(dead_code)]
struct NetDvrJpegPara {
    pic_size: u16,
    pic_quality: u16,
}

/// # Safety
///
/// `T` must be one of the POD structures above, for which all-zero bytes are
/// valid (null pointers, `None` callbacks, zero integers).
unsafe fn zeroed<T>() -> T {
    unsafe { std::mem::zeroed() }
}

impl From<&NetDvrDeviceInfoV40> for DeviceInfo {
    fn from(raw: &NetDvrDeviceInfoV40) -> Self {
        let v30 = &raw.device_v30;
        let serial_end = v30
            .serial_number
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SERIALNO_LEN);
        DeviceInfo {
            serial_number: String::from_utf8_lossy(&v30.serial_number[..serial_end]).into_owned(),
            start_channel: v30.start_chan,
            channel_count: v30.chan_num,
            start_digital_channel: v30.start_d_chan,
            ip_channel_count: u16::from(v30.high_d_chan_num) << 8 | u16::from(v30.ip_chan_num),
            device_type: v30.dev_type,
        }
    }
}

// ---------------------------------------------------------------------------
// Function table
// ---------------------------------------------------------------------------

type InitFn = unsafe extern "system" fn() -> i32;
type CleanupFn = unsafe extern "system" fn() -> i32;
type SetConnectTimeFn = unsafe extern "system" fn(u32, u32) -> i32;
type SetReconnectFn = unsafe extern "system" fn(u32, i32) -> i32;
type LoginV40Fn =
    unsafe extern "system" fn(*mut NetDvrUserLoginInfo, *mut NetDvrDeviceInfoV40) -> i32;
type LogoutFn = unsafe extern "system" fn(i32) -> i32;
type RealPlayV40Fn = unsafe extern "system" fn(
    i32,
    *mut NetDvrPreviewInfo,
    Option<RealDataCallback>,
    *mut c_void,
) -> i32;
type StopRealPlayFn = unsafe extern "system" fn(i32) -> i32;
type CaptureJpegNewFn =
    unsafe extern "system" fn(i32, i32, *mut NetDvrJpegPara, *mut c_char, u32, *mut u32) -> i32;
type GetLastErrorFn = unsafe extern "system" fn() -> u32;

struct HcNetApi {
    init: InitFn,
    cleanup: CleanupFn,
    set_connect_time: SetConnectTimeFn,
    set_reconnect: SetReconnectFn,
    login_v40: LoginV40Fn,
    logout: LogoutFn,
    real_play_v40: RealPlayV40Fn,
    stop_real_play: StopRealPlayFn,
    capture_jpeg_new: CaptureJpegNewFn,
    get_last_error: GetLastErrorFn,
}

/// Dynamically loaded HCNetSDK.
pub struct HcNetSdk {
    api: HcNetApi,
    /// Must outlive every function pointer in `api`.
    _lib: Library,
}

// SAFETY: HCNetSDK entry points are documented as thread-safe; the error
// code is kept per calling thread by the SDK itself.
unsafe impl Send for HcNetSdk {}
unsafe impl Sync for HcNetSdk {}

impl std::fmt::Debug for HcNetSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HcNetSdk").field("loaded", &true).finish()
    }
}

impl HcNetSdk {
    /// Platform library name.
    pub fn library_name() -> &'static str {
        if cfg!(windows) {
            "HCNetSDK.dll"
        } else {
            "libhcnetsdk.so"
        }
    }

    /// Load HCNetSDK from the system library search path.
    pub fn load() -> Result<Self> {
        let lib_name = Self::library_name();
        info!(library = %lib_name, "Loading HCNetSDK");

        // SAFETY: loading the vendor SDK runs its initialisers, which only
        // register internal state.
        let lib = unsafe { Library::new(lib_name) }.map_err(|e| {
            Error::SdkLoad(format!("failed to load {lib_name}: {e}. Is HCNetSDK installed?"))
        })?;
        Self::load_functions(lib)
    }

    /// Load HCNetSDK from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Loading HCNetSDK from custom path");

        // SAFETY: the caller asserts `path` is an HCNetSDK build.
        let lib = unsafe { Library::new(path) }
            .map_err(|e| Error::SdkLoad(format!("failed to load {}: {e}", path.display())))?;
        Self::load_functions(lib)
    }

    fn load_functions(lib: Library) -> Result<Self> {
        // SAFETY: each type matches the prototype in HCNetSDK.h.
        let api = unsafe {
            HcNetApi {
                init: symbol(&lib, b"NET_DVR_Init\0")?,
                cleanup: symbol(&lib, b"NET_DVR_Cleanup\0")?,
                set_connect_time: symbol(&lib, b"NET_DVR_SetConnectTime\0")?,
                set_reconnect: symbol(&lib, b"NET_DVR_SetReconnect\0")?,
                login_v40: symbol(&lib, b"NET_DVR_Login_V40\0")?,
                logout: symbol(&lib, b"NET_DVR_Logout\0")?,
                real_play_v40: symbol(&lib, b"NET_DVR_RealPlay_V40\0")?,
                stop_real_play: symbol(&lib, b"NET_DVR_StopRealPlay\0")?,
                capture_jpeg_new: symbol(&lib, b"NET_DVR_CaptureJPEGPicture_NEW\0")?,
                get_last_error: symbol(&lib, b"NET_DVR_GetLastError\0")?,
            }
        };
        debug!("HCNetSDK symbols resolved");
        Ok(Self { api, _lib: lib })
    }
}

/// Copy a function pointer out of `lib`.
///
/// # Safety
///
/// `T` must be the function pointer type of the exported symbol.
unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Result<T> {
    let printable = String::from_utf8_lossy(&name[..name.len().saturating_sub(1)]).into_owned();
    unsafe { lib.get::<T>(name) }
        .map(|s| *s)
        .map_err(|e| Error::SdkLoad(format!("missing symbol {printable}: {e}")))
}

impl DeviceSdk for HcNetSdk {
    fn init(&self) -> bool {
        unsafe { (self.api.init)() != 0 }
    }

    fn cleanup(&self) -> bool {
        unsafe { (self.api.cleanup)() != 0 }
    }

    fn set_connect_time(&self, timeout_ms: u32, retries: u32) -> bool {
        unsafe { (self.api.set_connect_time)(timeout_ms, retries) != 0 }
    }

    fn set_reconnect(&self, interval_ms: u32, retries: u32) -> bool {
        unsafe { (self.api.set_reconnect)(interval_ms, retries as i32) != 0 }
    }

    fn login(&self, request: &LoginRequest, device: &mut DeviceInfo) -> i32 {
        // SAFETY: POD structure.
        let mut info: NetDvrUserLoginInfo = unsafe { zeroed() };
        info.device_address = request.device_address;
        info.port = request.port;
        info.user_name = request.username;
        info.password = request.password;

        let mut raw_device: NetDvrDeviceInfoV40 = unsafe { zeroed() };

        // SAFETY: both structures are owned locals that outlive the call.
        let handle = unsafe { (self.api.login_v40)(&mut info, &mut raw_device) };
        if handle >= 0 {
            *device = DeviceInfo::from(&raw_device);
        }
        handle
    }

    fn logout(&self, session: i32) -> bool {
        unsafe { (self.api.logout)(session) != 0 }
    }

    fn start_preview(&self, session: i32, request: &PreviewRequest, target: DeliveryTarget) -> i32 {
        // SAFETY: POD structure.
        let mut info: NetDvrPreviewInfo = unsafe { zeroed() };
        info.channel = request.channel;
        info.stream_type = request.variant.as_u32();
        info.link_mode = request.link_mode.as_u32();
        info.blocked = i32::from(request.blocking);
        info.proto_type = request.protocol.as_u8();

        // SAFETY: `info` is copied by the SDK during the call; the callback
        // is a plain function and the context an opaque token.
        unsafe {
            (self.api.real_play_v40)(session, &mut info, Some(target.callback), target.context)
        }
    }

    fn stop_preview(&self, stream: i32) -> bool {
        unsafe { (self.api.stop_real_play)(stream) != 0 }
    }

    fn capture_jpeg(
        &self,
        session: i32,
        channel: i32,
        params: &JpegParams,
        buffer: &mut [u8],
    ) -> Option<usize> {
        let mut para = NetDvrJpegPara {
            pic_size: params.size,
            pic_quality: params.quality,
        };
        let capacity = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        let mut returned = 0u32;

        // SAFETY: the SDK writes at most `capacity` bytes into `buffer`.
        let ok = unsafe {
            (self.api.capture_jpeg_new)(
                session,
                channel,
                &mut para,
                buffer.as_mut_ptr() as *mut c_char,
                capacity,
                &mut returned,
            ) != 0
        };
        ok.then(|| (returned as usize).min(buffer.len()))
    }

    fn last_error(&self) -> u32 {
        unsafe { (self.api.get_last_error)() }
    }
}
