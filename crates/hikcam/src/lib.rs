//! hikcam - Session and live-stream manager for Hikvision devices
//!
//! Wraps the vendor HCNetSDK with owned handles and typed errors:
//!
//! - **[`SdkRuntime`]**: process-wide SDK initialisation and timing policies
//! - **[`DeviceSession`]**: one device login, still capture, live view
//! - **[`StreamController`]**: zero-or-one live stream per session
//! - **[`FrameDispatcher`]**: native data callback to [`FramePacket`]s
//!
//! Feature flags pick the SDK backend:
//!
//! - **`native`**: load HCNetSDK at runtime through `libloading`
//! - **`mock-sdk`**: in-memory device with its own delivery thread (no hardware needed)

mod credentials;
mod dispatch;
mod error;
mod frame;
mod runtime;
mod session;
mod stream;

// SDK boundary: trait, request types, backends
pub mod sdk;

pub use credentials::{Credentials, DEFAULT_PORT};
pub use dispatch::{
    frame_channel, is_registered, real_data_callback, DispatchSnapshot, DispatchStats,
    FrameConsumer, FrameDispatcher, Registration,
};
pub use error::{CredentialField, EncodingError, Error, Result};
pub use frame::{FrameKind, FramePacket};
pub use runtime::{SdkConfig, SdkRuntime};
pub use sdk::{DeviceInfo, DeviceSdk, JpegParams, StreamVariant};
pub use session::{DeviceSession, STILL_CAPTURE_BUFFER_SIZE};
pub use stream::StreamController;
