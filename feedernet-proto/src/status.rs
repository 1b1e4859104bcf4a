//! Status codes reported by the feeder over the status-update characteristic.
//!
//! The feeder notifies plain UTF-8 strings such as `STATUS_WIFI_FOUND` while
//! it works through the credentials it received. Codes this crate does not
//! know about are still surfaced, as warnings, so newer firmware does not
//! break older apps.

use std::fmt;

pub const STATUS_WIFI_FOUND: &str = "STATUS_WIFI_FOUND";
pub const STATUS_WIFI_CONN: &str = "STATUS_WIFI_CONN";
pub const STATUS_WIFI_IP: &str = "STATUS_WIFI_IP";
pub const STATUS_ACN_CONN: &str = "STATUS_ACN_CONN";
pub const STATUS_PN_CONN: &str = "STATUS_PN_CONN";
pub const STATUS_SUCCESS: &str = "STATUS_SUCCESS";
pub const ERROR_MQTT_CONN: &str = "ERROR_MQTT_CONN";
pub const ERROR_ACN_CONN: &str = "ERROR_ACN_CONN";
pub const ERROR_WIFI_FOUND: &str = "ERROR_WIFI_FOUND";
pub const ERROR_WIFI_CONN: &str = "ERROR_WIFI_CONN";

const VOCABULARY: &[(&str, &str)] = &[
    (STATUS_WIFI_FOUND, "WiFi network found"),
    (STATUS_WIFI_CONN, "Connected to WiFi"),
    (STATUS_WIFI_IP, "Obtained IP address"),
    (STATUS_ACN_CONN, "Connected to ACN"),
    (STATUS_PN_CONN, "Connected to PubNub"),
    (STATUS_SUCCESS, "Connected to FeederNet"),
    (ERROR_MQTT_CONN, "Could not connect to MQTT broker"),
    (ERROR_ACN_CONN, "Could not connect to ACN"),
    (ERROR_WIFI_FOUND, "WiFi network not found"),
    (ERROR_WIFI_CONN, "Could not connect to WiFi"),
];

/// How a status should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Severity {
    /// Provisioning is progressing
    Info,
    /// Unrecognised code
    Warning,
    /// The feeder gave up
    Error,
    /// The feeder reached FeederNet
    Success,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Success => "success",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded status notification
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StatusEntry {
    pub code: String,
    pub label: String,
    pub severity: Severity,
}

impl StatusEntry {
    fn unknown(code: &str) -> Self {
        Self {
            code: code.to_string(),
            label: format!("Unknown Status: {code}"),
            severity: Severity::Warning,
        }
    }

    /// Nothing more will follow: the feeder either made it or gave up.
    pub fn is_terminal(&self) -> bool {
        matches!(self.severity, Severity::Success | Severity::Error)
    }

    pub fn is_known(&self) -> bool {
        lookup(&self.code).is_some()
    }
}

impl fmt::Display for StatusEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty status payload")]
    Empty,
    #[error("status payload is not valid UTF-8")]
    NotUtf8,
}

/// Look up a code in the known vocabulary.
pub fn lookup(code: &str) -> Option<StatusEntry> {
    VOCABULARY
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(known, label)| StatusEntry {
            code: known.to_string(),
            label: label.to_string(),
            severity: severity_of(known),
        })
}

fn severity_of(code: &str) -> Severity {
    if code == STATUS_SUCCESS {
        Severity::Success
    } else if code.contains("ERROR") {
        Severity::Error
    } else {
        Severity::Info
    }
}

/// Decode a raw status payload.
///
/// Trailing NULs (C strings from firmware) and surrounding whitespace are
/// ignored.
pub fn try_decode(raw: &[u8]) -> Result<StatusEntry, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8)?;
    let code = text.trim_end_matches('\0').trim();
    if code.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(lookup(code).unwrap_or_else(|| StatusEntry::unknown(code)))
}

/// Decode a raw status payload, treating anything undecodable as "no status yet".
pub fn decode(raw: &[u8]) -> Option<StatusEntry> {
    match try_decode(raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            log::debug!("ignoring status payload {raw:02x?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success() {
        let entry = decode(b"STATUS_SUCCESS").unwrap();
        assert_eq!(entry.severity, Severity::Success);
        assert_eq!(entry.label, "Connected to FeederNet");
        assert!(entry.is_terminal());
    }

    #[test]
    fn errors() {
        let entry = decode(b"ERROR_WIFI_CONN").unwrap();
        assert_eq!(entry.severity, Severity::Error);
        assert!(entry.is_terminal());

        for code in [ERROR_MQTT_CONN, ERROR_ACN_CONN, ERROR_WIFI_FOUND] {
            assert_eq!(decode(code.as_bytes()).unwrap().severity, Severity::Error);
        }
    }

    #[test]
    fn progress_codes_are_info() {
        for code in [
            STATUS_WIFI_FOUND,
            STATUS_WIFI_CONN,
            STATUS_WIFI_IP,
            STATUS_ACN_CONN,
            STATUS_PN_CONN,
        ] {
            let entry = decode(code.as_bytes()).unwrap();
            assert_eq!(entry.severity, Severity::Info, "{code}");
            assert!(entry.is_known());
            assert!(!entry.is_terminal());
        }
    }

    #[test]
    fn unknown_code_is_warning() {
        let entry = decode(b"XYZ_UNKNOWN").unwrap();
        assert_eq!(entry.severity, Severity::Warning);
        assert!(entry.label.contains("XYZ_UNKNOWN"));
        assert_eq!(entry.label, "Unknown Status: XYZ_UNKNOWN");
        assert!(!entry.is_known());
    }

    #[test]
    fn unknown_error_code_is_still_warning() {
        let entry = decode(b"ERROR_NEW_THING").unwrap();
        assert_eq!(entry.severity, Severity::Warning);
    }

    #[test]
    fn empty_is_none() {
        assert_eq!(decode(&[]), None);
        assert_eq!(try_decode(&[]), Err(DecodeError::Empty));
        assert_eq!(try_decode(b"\0\0"), Err(DecodeError::Empty));
    }

    #[test]
    fn invalid_utf8_is_none() {
        assert_eq!(decode(&[0xc3, 0x28]), None);
        assert_eq!(try_decode(&[0xc3, 0x28]), Err(DecodeError::NotUtf8));
    }

    #[test]
    fn trailing_nul_ignored() {
        let entry = decode(b"STATUS_WIFI_IP\0").unwrap();
        assert_eq!(entry.code, STATUS_WIFI_IP);
        assert_eq!(entry.label, "Obtained IP address");
    }

    #[test]
    fn display() {
        let entry = decode(b"ERROR_WIFI_FOUND").unwrap();
        assert_eq!(entry.to_string(), "[error] WiFi network not found");
    }
}
