//! Credential framing and chunking.
//!
//! Feeders read WiFi credentials from a single write-without-response
//! characteristic that accepts at most 20 bytes per write and has no notion
//! of message boundaries. A credential message is therefore one framed
//! buffer, cut into chunks:
//!
//! ```text
//! [BEGIN] b64(ssid) [RS] b64(password) [RS] b64(token) [END]
//! ```
//!
//! The buffer is split every `chunk_size` bytes. Every chunk except the last
//! gets a trailing `BLOCK_END` byte; the last chunk ends with `END` already.
//! Fields are base64 encoded, so none of the control bytes can appear inside
//! them.
//!
//! # Example
//!
//! ```
//! use feedernet_proto::frame::{DEFAULT_CHUNK_SIZE, Reassembler, encode};
//!
//! let chunks = encode("MyHomeNetwork", "SuperSecret123", "foobar", DEFAULT_CHUNK_SIZE).unwrap();
//! assert_eq!(chunks.len(), 3);
//!
//! let mut reassembler = Reassembler::new();
//! let mut decoded = None;
//! for chunk in &chunks {
//!     decoded = reassembler.push(chunk.as_bytes()).unwrap();
//! }
//! assert_eq!(decoded.unwrap().ssid, "MyHomeNetwork");
//! ```

use std::fmt;

use data_encoding::BASE64;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Start of credential transmission.
pub const BEGIN: u8 = 0x02;

/// Separates ssid, password and token.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Appended to every chunk that is followed by another one.
pub const BLOCK_END: u8 = 0x17;

/// Last byte of the logical message.
pub const END: u8 = 0x04;

/// Payload bytes per chunk. Leaves room for `BLOCK_END` in a 20 byte write.
pub const DEFAULT_CHUNK_SIZE: usize = 19;

/// Upper bound on a reassembled message.
pub const MAX_FRAME_SIZE: usize = 1024;

const _: () = assert!(DEFAULT_CHUNK_SIZE < crate::ble::MAX_WRITE_SIZE);

/// The three fields of a credential message, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Ssid,
    Password,
    Token,
}

impl Field {
    pub const ALL: [Field; 3] = [Field::Ssid, Field::Password, Field::Token];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Ssid => "ssid",
            Field::Password => "password",
            Field::Token => "token",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("{field} is not valid UTF-8")]
    InvalidInput { field: Field },
    #[error("chunk size must be at least one byte")]
    InvalidChunkSize,
    #[error("message does not start with BEGIN (0x02)")]
    MissingBegin,
    #[error("message does not end with END (0x04)")]
    MissingEnd,
    #[error("expected 3 fields, found {found}")]
    FieldCount { found: usize },
    #[error("{field} is not valid base64")]
    InvalidBase64 { field: Field },
    #[error("message exceeds {max} bytes")]
    Overflow { max: usize },
}

/// One write's worth of a credential message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialChunk {
    bytes: Vec<u8>,
    more: bool,
}

impl CredentialChunk {
    fn new(payload: &[u8], more: bool) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.extend_from_slice(payload);
        if more {
            bytes.push(BLOCK_END);
        }
        Self { bytes, more }
    }

    /// Bytes to hand to the transport, marker included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The slice of the framed message carried by this chunk, without marker.
    pub fn payload(&self) -> &[u8] {
        if self.more {
            &self.bytes[..self.bytes.len() - 1]
        } else {
            &self.bytes
        }
    }

    /// True when another chunk follows this one.
    pub fn has_more(&self) -> bool {
        self.more
    }

    pub fn is_last(&self) -> bool {
        !self.more
    }

    /// Wire length, marker included.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encode credentials into chunks of at most `chunk_size` payload bytes.
pub fn encode(
    ssid: &str,
    password: &str,
    token: &str,
    chunk_size: usize,
) -> Result<Vec<CredentialChunk>, FrameError> {
    encode_bytes(ssid.as_bytes(), password.as_bytes(), token.as_bytes(), chunk_size)
}

/// Like [`encode`], for fields that arrive as raw bytes.
///
/// Every field must be valid UTF-8; the first one that isn't is reported as
/// [`FrameError::InvalidInput`].
pub fn encode_bytes(
    ssid: &[u8],
    password: &[u8],
    token: &[u8],
    chunk_size: usize,
) -> Result<Vec<CredentialChunk>, FrameError> {
    if chunk_size == 0 {
        return Err(FrameError::InvalidChunkSize);
    }
    for (field, bytes) in Field::ALL.into_iter().zip([ssid, password, token]) {
        std::str::from_utf8(bytes).map_err(|_| FrameError::InvalidInput { field })?;
    }

    let message = frame_message(ssid, password, token);
    Ok(split(&message, chunk_size))
}

fn frame_message(ssid: &[u8], password: &[u8], token: &[u8]) -> Vec<u8> {
    let size = 4 + [ssid, password, token]
        .iter()
        .map(|f| BASE64.encode_len(f.len()))
        .sum::<usize>();

    let mut buf = Vec::with_capacity(size);
    buf.push(BEGIN);
    buf.extend_from_slice(BASE64.encode(ssid).as_bytes());
    buf.push(RECORD_SEPARATOR);
    buf.extend_from_slice(BASE64.encode(password).as_bytes());
    buf.push(RECORD_SEPARATOR);
    buf.extend_from_slice(BASE64.encode(token).as_bytes());
    buf.push(END);
    buf
}

fn split(message: &[u8], chunk_size: usize) -> Vec<CredentialChunk> {
    let count = message.len().div_ceil(chunk_size);
    message
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, payload)| CredentialChunk::new(payload, i + 1 < count))
        .collect()
}

/// A complete credential message as the feeder sees it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DecodedFrame {
    pub ssid: String,
    pub password: String,
    pub token: String,
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("ssid", &self.ssid)
            .field("password", &"****")
            .field("token", &self.token)
            .finish()
    }
}

/// Parse one complete framed message (`BEGIN` through `END`, no chunk markers).
pub fn decode_message(message: &[u8]) -> Result<DecodedFrame, FrameError> {
    let body = message
        .strip_prefix(&[BEGIN])
        .ok_or(FrameError::MissingBegin)?;
    let body = body.strip_suffix(&[END]).ok_or(FrameError::MissingEnd)?;

    let fields: Vec<&[u8]> = body.split(|b| *b == RECORD_SEPARATOR).collect();
    let [ssid, password, token] = fields.as_slice() else {
        return Err(FrameError::FieldCount {
            found: fields.len(),
        });
    };

    Ok(DecodedFrame {
        ssid: decode_field(Field::Ssid, ssid)?,
        password: decode_field(Field::Password, password)?,
        token: decode_field(Field::Token, token)?,
    })
}

fn decode_field(field: Field, encoded: &[u8]) -> Result<String, FrameError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|_| FrameError::InvalidBase64 { field })?;
    String::from_utf8(bytes).map_err(|_| FrameError::InvalidInput { field })
}

/// Rebuilds credential messages from chunks, the way the feeder does.
///
/// Chunks ending in `BLOCK_END` are buffered without the marker. The first
/// chunk whose content ends in `END` completes the message. After a
/// completed message or an error the reassembler starts over.
pub struct Reassembler {
    buffer: Vec<u8>,
    max_frame: usize,
}

impl fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reassembler")
            .field("pending", &self.pending())
            .field("max_frame", &self.max_frame)
            .finish()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_SIZE)
    }

    pub fn with_limit(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame,
        }
    }

    /// Bytes buffered for the message in progress.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.zeroize();
    }

    /// Feed one chunk exactly as it was written to the characteristic.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<DecodedFrame>, FrameError> {
        let (content, more) = match chunk.split_last() {
            Some((&BLOCK_END, rest)) => (rest, true),
            Some(_) => (chunk, false),
            None => return Ok(None),
        };

        if self.buffer.is_empty() && content.first().is_some_and(|b| *b != BEGIN) {
            return Err(FrameError::MissingBegin);
        }
        if self.buffer.len() + content.len() > self.max_frame {
            self.reset();
            return Err(FrameError::Overflow {
                max: self.max_frame,
            });
        }

        self.buffer.extend_from_slice(content);
        if more || self.buffer.last() != Some(&END) {
            return Ok(None);
        }

        let result = decode_message(&self.buffer);
        self.reset();
        result.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[CredentialChunk]) -> DecodedFrame {
        let mut reassembler = Reassembler::new();
        let (last, rest) = chunks.split_last().unwrap();
        for chunk in rest {
            assert_eq!(reassembler.push(chunk.as_bytes()), Ok(None));
        }
        reassembler.push(last.as_bytes()).unwrap().unwrap()
    }

    #[test]
    fn single_chunk_has_no_block_end() {
        let chunks = encode("a", "b", "c", 64).unwrap();
        assert_eq!(chunks.len(), 1);

        let mut expected = vec![BEGIN];
        expected.extend_from_slice(b"YQ==");
        expected.push(RECORD_SEPARATOR);
        expected.extend_from_slice(b"Yg==");
        expected.push(RECORD_SEPARATOR);
        expected.extend_from_slice(b"Yw==");
        expected.push(END);

        assert_eq!(chunks[0].as_bytes(), expected.as_slice());
        assert!(chunks[0].is_last());
        assert!(!chunks[0].as_bytes().contains(&BLOCK_END));
    }

    #[test]
    fn multi_chunk_home_network() {
        let chunks = encode("MyHomeNetwork", "SuperSecret123", "foobar", 19).unwrap();
        // 1 + 20 + 1 + 20 + 1 + 8 + 1 = 52 bytes -> 19 + 19 + 14
        assert_eq!(chunks.len(), 3);

        for chunk in &chunks[..2] {
            assert_eq!(chunk.payload().len(), 19);
            assert_eq!(chunk.len(), 20);
            assert_eq!(chunk.as_bytes().last(), Some(&BLOCK_END));
            assert!(chunk.has_more());
        }
        let last = &chunks[2];
        assert_eq!(last.payload().len(), 14);
        assert_eq!(last.as_bytes().last(), Some(&END));
        assert!(!last.as_bytes().contains(&BLOCK_END));

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.payload().to_vec()).collect();
        let mut expected = vec![BEGIN];
        expected.extend_from_slice(b"TXlIb21lTmV0d29yaw==");
        expected.push(RECORD_SEPARATOR);
        expected.extend_from_slice(b"U3VwZXJTZWNyZXQxMjM=");
        expected.push(RECORD_SEPARATOR);
        expected.extend_from_slice(b"Zm9vYmFy");
        expected.push(END);
        assert_eq!(joined, expected);
    }

    #[test]
    fn payload_never_exceeds_chunk_size() {
        for chunk_size in 1..=25 {
            let chunks = encode("network", "password1", "foobar", chunk_size).unwrap();
            let (last, rest) = chunks.split_last().unwrap();
            for chunk in rest {
                assert!(chunk.payload().len() <= chunk_size);
                assert_eq!(chunk.len(), chunk.payload().len() + 1);
                assert_eq!(chunk.as_bytes().last(), Some(&BLOCK_END));
            }
            assert!(last.payload().len() <= chunk_size);
            assert_eq!(last.as_bytes().last(), Some(&END));
        }
    }

    #[test]
    fn exact_boundary_leaves_last_chunk_unmarked() {
        // BEGIN RS RS END with empty fields is exactly four bytes
        let chunks = encode("", "", "", 4).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].as_bytes(),
            &[BEGIN, RECORD_SEPARATOR, RECORD_SEPARATOR, END]
        );

        let chunks = encode("", "", "", 2).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_bytes(), &[BEGIN, RECORD_SEPARATOR, BLOCK_END]);
        assert_eq!(chunks[1].as_bytes(), &[RECORD_SEPARATOR, END]);
    }

    #[test]
    fn empty_fields_are_legal() {
        let chunks = encode("", "", "foobar", DEFAULT_CHUNK_SIZE).unwrap();
        let decoded = reassemble(&chunks);
        assert_eq!(decoded.ssid, "");
        assert_eq!(decoded.password, "");
        assert_eq!(decoded.token, "foobar");
    }

    #[test]
    fn round_trip_printable_ascii() {
        let printable: String = (0x20u8..0x7f).map(char::from).collect();
        let samples = [
            ("MyHomeNetwork", "SuperSecret123"),
            ("x", ""),
            ("cafe wifi", "p@ss w0rd!"),
            (printable.as_str(), printable.as_str()),
            ("\\\"quoted\"", "~`{}[]|"),
        ];

        for chunk_size in [1, 2, 3, 7, 19, 20, 64, 512] {
            for (ssid, password) in samples {
                let chunks = encode(ssid, password, "foobar", chunk_size).unwrap();
                let decoded = reassemble(&chunks);
                assert_eq!(decoded.ssid, ssid);
                assert_eq!(decoded.password, password);
                assert_eq!(decoded.token, "foobar");
            }
        }
    }

    #[test]
    fn round_trip_unicode() {
        let chunks = encode("Café ☕", "пароль", "foobar", 5).unwrap();
        let decoded = reassemble(&chunks);
        assert_eq!(decoded.ssid, "Café ☕");
        assert_eq!(decoded.password, "пароль");
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode("net", "secret", "foobar", 7).unwrap();
        let b = encode("net", "secret", "foobar", 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        assert_eq!(
            encode("net", "secret", "foobar", 0),
            Err(FrameError::InvalidChunkSize)
        );
    }

    #[test]
    fn non_utf8_field_rejected() {
        let result = encode_bytes(b"net", &[0xff, 0xfe], b"foobar", 19);
        assert_eq!(
            result,
            Err(FrameError::InvalidInput {
                field: Field::Password
            })
        );
    }

    #[test]
    fn reassembler_debug_hides_buffered_bytes() {
        let chunks = encode("MyHomeNetwork", "SuperSecret123", "foobar", 19).unwrap();
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(chunks[0].as_bytes()), Ok(None));
        assert_eq!(reassembler.push(chunks[1].as_bytes()), Ok(None));

        let shown = format!("{reassembler:?}");
        assert_eq!(shown, "Reassembler { pending: 38, max_frame: 1024 }");
        assert!(!shown.contains("U3VwZXJTZWNyZXQ"));
    }

    #[test]
    fn reassembler_requires_begin() {
        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(b"YQ==\x04"), Err(FrameError::MissingBegin));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn reassembler_counts_fields() {
        let mut reassembler = Reassembler::new();
        let message = [BEGIN, b'Y', b'Q', b'=', b'=', RECORD_SEPARATOR, END];
        assert_eq!(
            reassembler.push(&message),
            Err(FrameError::FieldCount { found: 2 })
        );
    }

    #[test]
    fn reassembler_rejects_bad_base64() {
        let mut reassembler = Reassembler::new();
        let mut message = vec![BEGIN];
        message.extend_from_slice(b"YQ==");
        message.push(RECORD_SEPARATOR);
        message.extend_from_slice(b"!!");
        message.push(RECORD_SEPARATOR);
        message.push(END);
        assert_eq!(
            reassembler.push(&message),
            Err(FrameError::InvalidBase64 {
                field: Field::Password
            })
        );
    }

    #[test]
    fn reassembler_enforces_limit_and_recovers() {
        let mut reassembler = Reassembler::with_limit(16);
        let chunks = encode("MyHomeNetwork", "SuperSecret123", "foobar", 10).unwrap();
        let mut result = Ok(None);
        for chunk in &chunks {
            result = reassembler.push(chunk.as_bytes());
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(FrameError::Overflow { max: 16 }));
        assert_eq!(reassembler.pending(), 0);

        let chunks = encode("a", "b", "c", 4).unwrap();
        let mut decoded = None;
        for chunk in &chunks {
            decoded = reassembler.push(chunk.as_bytes()).unwrap();
        }
        assert_eq!(decoded.unwrap().ssid, "a");
    }

    #[test]
    fn decode_message_requires_end() {
        let message = [BEGIN, RECORD_SEPARATOR, RECORD_SEPARATOR];
        assert_eq!(decode_message(&message), Err(FrameError::MissingEnd));
    }

    #[test]
    fn debug_hides_password() {
        let chunks = encode("net", "hunter22", "foobar", 64).unwrap();
        let decoded = reassemble(&chunks);
        assert!(!format!("{decoded:?}").contains("hunter22"));
    }
}
