//! Conversions between text and bytes.
//!
//! Everything that crosses a [`PatternStream`](crate::PatternStream) or a
//! [`ShellProcess`](crate::ShellProcess) is a [`Payload`]: either text or raw
//! bytes. The distinction matters only for the shell adapter, which appends a
//! newline to text but passes bytes through untouched.

use crate::error::{Error, Result};
use std::borrow::Cow;

/// Text or binary data handed to a writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<'a> {
    Text(Cow<'a, str>),
    Binary(Cow<'a, [u8]>),
}

impl Payload<'_> {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Payload::Text(_))
    }
}

impl<'a> From<&'a str> for Payload<'a> {
    fn from(value: &'a str) -> Self {
        Payload::Text(Cow::Borrowed(value))
    }
}

impl From<String> for Payload<'static> {
    fn from(value: String) -> Self {
        Payload::Text(Cow::Owned(value))
    }
}

impl<'a> From<&'a String> for Payload<'a> {
    fn from(value: &'a String) -> Self {
        Payload::Text(Cow::Borrowed(value.as_str()))
    }
}

impl<'a> From<&'a [u8]> for Payload<'a> {
    fn from(value: &'a [u8]) -> Self {
        Payload::Binary(Cow::Borrowed(value))
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Payload<'a> {
    fn from(value: &'a [u8; N]) -> Self {
        Payload::Binary(Cow::Borrowed(&value[..]))
    }
}

impl From<Vec<u8>> for Payload<'static> {
    fn from(value: Vec<u8>) -> Self {
        Payload::Binary(Cow::Owned(value))
    }
}

impl<'a> From<&'a Vec<u8>> for Payload<'a> {
    fn from(value: &'a Vec<u8>) -> Self {
        Payload::Binary(Cow::Borrowed(value.as_slice()))
    }
}

/// Encodes `value` as UTF-8 bytes, appending `terminator` when one is given.
///
/// Binary input is passed through with the terminator appended the same way.
pub fn to_bytes<'a>(value: impl Into<Payload<'a>>, terminator: Option<&[u8]>) -> Vec<u8> {
    let value = value.into();
    let terminator = terminator.unwrap_or_default();
    let mut bytes = Vec::with_capacity(value.as_bytes().len() + terminator.len());
    bytes.extend_from_slice(value.as_bytes());
    bytes.extend_from_slice(terminator);
    bytes
}

/// Decodes binary input as strict UTF-8. Text input is returned unchanged.
pub fn to_str<'a>(value: impl Into<Payload<'a>>) -> Result<String> {
    match value.into() {
        Payload::Text(text) => Ok(text.into_owned()),
        Payload::Binary(bytes) => match String::from_utf8(bytes.into_owned()) {
            Ok(text) => Ok(text),
            Err(e) => Err(Error::Decoding {
                position: e.utf8_error().valid_up_to(),
            }),
        },
    }
}

/// How malformed UTF-8 is handled by [`Utf8Decoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Fail with [`Error::Decoding`].
    Strict,
    /// Substitute U+FFFD for each malformed sequence.
    #[default]
    Replace,
}

/// Incremental UTF-8 decoder.
///
/// A multi-byte sequence split across two reads is held back until the rest
/// of it arrives, so callers can feed arbitrary chunk boundaries.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    mode: DecodeMode,
    pending: Vec<u8>,
    offset: usize,
}

impl Utf8Decoder {
    pub fn new(mode: DecodeMode) -> Self {
        Self {
            mode,
            pending: Vec::new(),
            offset: 0,
        }
    }

    /// Decodes `input`, keeping an incomplete trailing sequence for the next
    /// call. With `last` set, an incomplete tail is treated as malformed.
    pub fn decode(&mut self, input: &[u8], last: bool) -> Result<String> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(input);

        let mut out = String::with_capacity(buf.len());
        let mut rest = &buf[..];
        while !rest.is_empty() {
            let err = match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    self.offset += rest.len();
                    break;
                }
                Err(err) => err,
            };

            let valid = err.valid_up_to();
            out.push_str(&String::from_utf8_lossy(&rest[..valid]));
            self.offset += valid;
            rest = &rest[valid..];

            let bad_len = match err.error_len() {
                Some(len) => len,
                None if !last => {
                    self.pending = rest.to_vec();
                    break;
                }
                None => rest.len(),
            };

            if self.mode == DecodeMode::Strict {
                let position = self.offset;
                self.offset += rest.len();
                return Err(Error::Decoding { position });
            }
            out.push(char::REPLACEMENT_CHARACTER);
            self.offset += bad_len;
            rest = &rest[bad_len..];
        }

        Ok(out)
    }

    /// Number of bytes held back waiting for the rest of a sequence.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
