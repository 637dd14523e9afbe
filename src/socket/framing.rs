//! Wire codec for chat messages.
//!
//! One frame per message:
//!
//! ```text
//! [u16 BE length] [length bytes of encoded text]
//! ```
//!
//! This is the layout of the JVM `DataOutputStream.writeUTF` primitive the
//! Android peers use. Outgoing text is standard UTF-8 by default, or the
//! JVM's "modified UTF-8" with [`TextEncoding::ModifiedUtf8`] (NUL as
//! `C0 80`, supplementary characters as two 3-byte surrogate sequences).
//! Incoming frames are decoded in either form.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::LENGTH_PREFIX_SIZE;
use crate::error::ChatError;

/// How outgoing text is turned into frame bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    /// Standard UTF-8.
    #[default]
    Utf8,
    /// JVM modified UTF-8, byte-identical to `DataOutputStream.writeUTF`.
    ModifiedUtf8,
}

impl TextEncoding {
    /// Encoded length of `text` in bytes, without the length prefix.
    pub fn encoded_len(self, text: &str) -> usize {
        match self {
            Self::Utf8 => text.len(),
            Self::ModifiedUtf8 => text
                .encode_utf16()
                .map(|unit| match unit {
                    0x0001..=0x007F => 1,
                    0x0000 | 0x0080..=0x07FF => 2,
                    _ => 3,
                })
                .sum(),
        }
    }
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Utf8 => write!(f, "utf8"),
            Self::ModifiedUtf8 => write!(f, "modified-utf8"),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "modified-utf8" | "modified-utf-8" | "java" => Ok(Self::ModifiedUtf8),
            other => anyhow::bail!("unknown text encoding '{other}' (expected utf8 or modified-utf8)"),
        }
    }
}

/// Encode `text` into one wire frame.
///
/// # Errors
///
/// Returns [`ChatError::FrameTooLarge`] if the encoded text exceeds 65535
/// bytes. Nothing is produced in that case, so nothing can be partially
/// written.
pub fn encode_message(text: &str, encoding: TextEncoding) -> Result<Vec<u8>, ChatError> {
    let len = encoding.encoded_len(text);
    let Ok(length) = u16::try_from(len) else {
        return Err(ChatError::FrameTooLarge { len });
    };

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + len);
    buf.extend_from_slice(&length.to_be_bytes());
    match encoding {
        TextEncoding::Utf8 => buf.extend_from_slice(text.as_bytes()),
        TextEncoding::ModifiedUtf8 => push_modified_utf8(&mut buf, text),
    }
    Ok(buf)
}

fn push_modified_utf8(buf: &mut Vec<u8>, text: &str) {
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => buf.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                buf.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                buf.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                buf.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                buf.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                buf.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
}

/// Decode the body of one frame (the bytes after the length prefix).
///
/// # Errors
///
/// Returns [`ChatError::FrameDecode`] for truncated or invalid sequences and
/// for unpaired surrogates.
pub fn decode_message(body: &[u8]) -> Result<String, ChatError> {
    // Modified-UTF-8 forms are exactly what strict UTF-8 rejects.
    match std::str::from_utf8(body) {
        Ok(text) => Ok(text.to_owned()),
        Err(_) => decode_modified_utf8(body),
    }
}

fn decode_modified_utf8(body: &[u8]) -> Result<String, ChatError> {
    let mut units: Vec<u16> = Vec::with_capacity(body.len());
    let mut i = 0;

    while i < body.len() {
        let lead = body[i];
        match lead {
            0x00..=0x7F => {
                units.push(u16::from(lead));
                i += 1;
            }
            0xC0..=0xDF => {
                let b1 = continuation(body, i + 1)?;
                units.push((u16::from(lead & 0x1F) << 6) | u16::from(b1));
                i += 2;
            }
            0xE0..=0xEF => {
                let b1 = continuation(body, i + 1)?;
                let b2 = continuation(body, i + 2)?;
                units.push((u16::from(lead & 0x0F) << 12) | (u16::from(b1) << 6) | u16::from(b2));
                i += 3;
            }
            // Standard 4-byte UTF-8 mixed in with modified forms.
            0xF0..=0xF7 => {
                let b1 = continuation(body, i + 1)?;
                let b2 = continuation(body, i + 2)?;
                let b3 = continuation(body, i + 3)?;
                let code = (u32::from(lead & 0x07) << 18)
                    | (u32::from(b1) << 12)
                    | (u32::from(b2) << 6)
                    | u32::from(b3);
                let ch = char::from_u32(code).ok_or_else(|| {
                    ChatError::FrameDecode(format!("invalid code point U+{code:X} at byte {i}"))
                })?;
                let mut pair = [0u16; 2];
                units.extend_from_slice(ch.encode_utf16(&mut pair));
                i += 4;
            }
            _ => {
                return Err(ChatError::FrameDecode(format!(
                    "invalid lead byte 0x{lead:02x} at byte {i}"
                )));
            }
        }
    }

    String::from_utf16(&units).map_err(|e| ChatError::FrameDecode(e.to_string()))
}

/// Payload bits of the continuation byte at `at`.
fn continuation(body: &[u8], at: usize) -> Result<u8, ChatError> {
    match body.get(at) {
        Some(&byte) if byte & 0xC0 == 0x80 => Ok(byte & 0x3F),
        Some(&byte) => Err(ChatError::FrameDecode(format!(
            "invalid continuation byte 0x{byte:02x} at byte {at}"
        ))),
        None => Err(ChatError::FrameDecode(
            "truncated multi-byte sequence".to_string(),
        )),
    }
}

/// Incremental frame decoder that handles partial reads.
///
/// Push bytes via [`FrameDecoder::push`], then pull complete messages with
/// [`FrameDecoder::next_message`] until it returns `None`. Each frame is
/// decoded on its own, so a malformed frame never costs the frames before it.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder with empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Buffer bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete frame off the buffer and decode it.
    ///
    /// Returns `None` until a whole frame is buffered. A frame that fails to
    /// decode is consumed and reported as [`ChatError::FrameDecode`].
    pub fn next_message(&mut self) -> Option<Result<String, ChatError>> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return None;
        }

        let length = usize::from(u16::from_be_bytes([self.buf[0], self.buf[1]]));
        let total = LENGTH_PREFIX_SIZE + length;
        if self.buf.len() < total {
            return None; // Incomplete frame, wait for more data
        }

        let message = decode_message(&self.buf[LENGTH_PREFIX_SIZE..total]);
        self.buf.drain(..total);
        Some(message)
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
