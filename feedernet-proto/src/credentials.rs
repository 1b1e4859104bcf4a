//! WiFi credentials entered by the operator.
//!
//! The frame codec accepts any strings. [`Credentials::validate`] is the
//! stricter check a front end applies before sending, following IEEE 802.11
//! and WPA2 limits.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11.
pub const MAX_SSID_LEN: usize = 32;

/// Minimum WPA2 passphrase length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Maximum WPA2 passphrase length.
pub const MAX_PASSWORD_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("SSID cannot be empty")]
    SsidEmpty,
    #[error("SSID too long: {len} bytes (max {max})")]
    SsidTooLong { len: usize, max: usize },
    #[error("password too short: {len} bytes (min {min})")]
    PasswordTooShort { len: usize, min: usize },
    #[error("password too long: {len} bytes (max {max})")]
    PasswordTooLong { len: usize, max: usize },
    #[error("missing SSID in credentials file")]
    MissingSsid,
    #[error("missing password in credentials file")]
    MissingPassword,
}

/// SSID and password for the feeder's WiFi network. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    ssid: String,
    password: String,
}

impl Credentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// Parse a credentials file: SSID on line 1, password on line 2.
    pub fn from_lines(content: &str) -> Result<Self, CredentialsError> {
        let mut lines = content.lines();
        let ssid = lines.next().ok_or(CredentialsError::MissingSsid)?.trim();
        let password = lines
            .next()
            .ok_or(CredentialsError::MissingPassword)?
            .trim();
        Ok(Self::new(ssid, password))
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Open networks have no password.
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    pub fn validate(&self) -> Result<(), CredentialsError> {
        if self.ssid.is_empty() {
            return Err(CredentialsError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(CredentialsError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        if !self.password.is_empty() && self.password.len() < MIN_PASSWORD_LEN {
            return Err(CredentialsError::PasswordTooShort {
                len: self.password.len(),
                min: MIN_PASSWORD_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(CredentialsError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }

        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"****")
            .finish()
    }
}
