//! Error types
//!
//! Every SDK failure that HCNetSDK signals with a sentinel (`false`, a
//! negative handle) is surfaced here with the SDK's last-error code attached.

use thiserror::Error;

/// Errors returned by control-plane operations.
///
/// Teardown (`logout`, `stop_stream`, `shutdown`) never returns these.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load device SDK: {0}")]
    SdkLoad(String),

    #[error("device SDK initialisation failed (code {code})")]
    SdkInit { code: u32 },

    #[error("device SDK is not initialised")]
    NotInitialized,

    #[error("invalid credential: {0}")]
    Encoding(#[from] EncodingError),

    #[error("no active device session, call login() first")]
    NotLoggedIn,

    #[error("login failed (code {code})")]
    Login { code: u32 },

    #[error("failed to start live stream (code {code})")]
    StreamStart { code: u32 },

    #[error("still capture failed (code {code})")]
    Capture { code: u32 },
}

impl Error {
    /// SDK error code carried by this error, if any.
    pub fn code(&self) -> Option<u32> {
        match self {
            Error::SdkInit { code }
            | Error::Login { code }
            | Error::StreamStart { code }
            | Error::Capture { code } => Some(*code),
            _ => None,
        }
    }
}

/// Credential fields with a fixed encoded capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    DeviceAddress,
    Username,
    Password,
}

impl std::fmt::Display for CredentialField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialField::DeviceAddress => write!(f, "device address"),
            CredentialField::Username => write!(f, "username"),
            CredentialField::Password => write!(f, "password"),
        }
    }
}

/// A credential that cannot be encoded into its fixed login buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("{field} is {len} bytes, limit is {capacity}")]
    TooLong {
        field: CredentialField,
        len: usize,
        capacity: usize,
    },

    #[error("{field} contains a NUL byte at offset {offset}")]
    EmbeddedNul { field: CredentialField, offset: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
