//! FeederNet wire protocol - credential framing, status codes and GATT identifiers
//!
//! Everything in this crate is pure: no radio, no I/O. The BLE controller
//! and the command line tool both build on it, and firmware tests can use
//! [`frame::Reassembler`] to check what a feeder would receive.

pub mod ble;
pub mod credentials;
pub mod frame;
pub mod status;

pub use credentials::{Credentials, CredentialsError};
pub use frame::{
    BEGIN, BLOCK_END, CredentialChunk, DEFAULT_CHUNK_SIZE, DecodedFrame, END, Field, FrameError,
    RECORD_SEPARATOR, Reassembler, encode, encode_bytes,
};
pub use status::{DecodeError, Severity, StatusEntry, decode as decode_status};
