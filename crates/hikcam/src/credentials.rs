//! Device credentials and their fixed-size login encoding

use crate::error::{CredentialField, EncodingError};
use crate::sdk::{LoginRequest, DEV_ADDRESS_MAX_LEN, LOGIN_PASSWD_MAX_LEN, LOGIN_USERNAME_MAX_LEN};

/// Default HCNetSDK service port.
pub const DEFAULT_PORT: u16 = 8000;

/// Login credentials for one device. Immutable after construction.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
    device_address: String,
    port: u16,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("device_address", &self.device_address)
            .field("port", &self.port)
            .finish()
    }
}

impl Credentials {
    /// Credentials on the default port (8000).
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        device_address: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            device_address: device_address.into(),
            port: DEFAULT_PORT,
        }
    }

    /// Same credentials on a different port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Device address, usually an IP.
    pub fn device_address(&self) -> &str {
        &self.device_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Encode every field into its fixed login buffer.
    ///
    /// Fields are UTF-8. A field longer than its buffer, or one containing a
    /// NUL byte (which the SDK would read as an early terminator), is rejected.
    pub fn encode(&self) -> Result<LoginRequest, EncodingError> {
        Ok(LoginRequest {
            device_address: encode_field::<DEV_ADDRESS_MAX_LEN>(
                CredentialField::DeviceAddress,
                &self.device_address,
            )?,
            username: encode_field::<LOGIN_USERNAME_MAX_LEN>(
                CredentialField::Username,
                &self.username,
            )?,
            password: encode_field::<LOGIN_PASSWD_MAX_LEN>(
                CredentialField::Password,
                &self.password,
            )?,
            port: self.port,
        })
    }
}

fn encode_field<const N: usize>(
    field: CredentialField,
    value: &str,
) -> Result<[u8; N], EncodingError> {
    let bytes = value.as_bytes();
    if bytes.len() > N {
        return Err(EncodingError::TooLong {
            field,
            len: bytes.len(),
            capacity: N,
        });
    }
    if let Some(offset) = bytes.iter().position(|&b| b == 0) {
        return Err(EncodingError::EmbeddedNul { field, offset });
    }

    let mut buf = [0u8; N];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}
