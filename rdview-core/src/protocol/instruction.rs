//! Gateway instructions and their text codec.
//!
//! ## Wire format
//!
//! ```text
//! instruction := element ("," element)* ";"
//! element     := LENGTH "." VALUE
//! ```
//!
//! The first element is the opcode, the rest are arguments. `LENGTH`
//! counts Unicode scalar values of `VALUE`, not bytes. An empty opcode
//! marks an internal tunnel instruction (tunnel uuid, pings).

use std::fmt;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::ViewerError;

/// Upper bound for a single buffered instruction.
pub const MAX_INSTRUCTION_SIZE: usize = 8 * 1024 * 1024;

/// Longest accepted element length prefix.
const MAX_LENGTH_DIGITS: usize = 10;

// ── Instruction ──────────────────────────────────────────────────

/// A single protocol instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: String,
    pub args: Vec<String>,
}

impl Instruction {
    pub fn new<I, S>(opcode: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            opcode: opcode.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// An instruction without arguments (`nop`, `disconnect`).
    pub fn bare(opcode: impl Into<String>) -> Self {
        Self {
            opcode: opcode.into(),
            args: Vec::new(),
        }
    }

    /// An internal tunnel instruction (empty opcode).
    pub fn internal<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(String::new(), args)
    }

    pub fn is_internal(&self) -> bool {
        self.opcode.is_empty()
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.opcode.chars().count(), self.opcode)?;
        for arg in &self.args {
            write!(f, ",{}.{}", arg.chars().count(), arg)?;
        }
        f.write_str(";")
    }
}

// ── InstructionCodec ─────────────────────────────────────────────

/// Streaming codec for [`Instruction`]s.
///
/// WebSocket frames usually carry whole instructions, but the decoder
/// tolerates instructions split across frames and returns `Ok(None)`
/// until the terminating `;` arrives.
#[derive(Debug, Default)]
pub struct InstructionCodec;

impl InstructionCodec {
    pub fn new() -> Self {
        Self
    }

    fn incomplete(src: &BytesMut) -> Result<Option<Instruction>, ViewerError> {
        if src.len() > MAX_INSTRUCTION_SIZE {
            return Err(ViewerError::InstructionTooLarge {
                size: src.len(),
                max: MAX_INSTRUCTION_SIZE,
            });
        }
        Ok(None)
    }
}

/// Byte width of a UTF-8 sequence from its lead byte.
fn utf8_width(lead: u8) -> Result<usize, ViewerError> {
    match lead {
        0x00..=0x7F => Ok(1),
        0xC0..=0xDF => Ok(2),
        0xE0..=0xEF => Ok(3),
        0xF0..=0xF7 => Ok(4),
        _ => Err(ViewerError::InvalidUtf8),
    }
}

fn parse_length(digits: &[u8]) -> Result<usize, ViewerError> {
    if digits.is_empty()
        || digits.len() > MAX_LENGTH_DIGITS
        || !digits.iter().all(u8::is_ascii_digit)
    {
        return Err(ViewerError::InvalidLength(
            String::from_utf8_lossy(digits).into_owned(),
        ));
    }
    // All ASCII digits, so this cannot fail.
    let text = std::str::from_utf8(digits).map_err(|_| ViewerError::InvalidUtf8)?;
    text.parse()
        .map_err(|_| ViewerError::InvalidLength(text.to_string()))
}

impl Decoder for InstructionCodec {
    type Item = Instruction;
    type Error = ViewerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut elements: Vec<String> = Vec::new();
        let mut pos = 0;

        loop {
            let Some(dot) = src[pos..].iter().position(|&b| b == b'.').map(|i| pos + i) else {
                // Validate the partial length prefix early so garbage is
                // rejected without waiting for more input.
                let pending = &src[pos..];
                if pending.len() > MAX_LENGTH_DIGITS || !pending.iter().all(u8::is_ascii_digit) {
                    return Err(ViewerError::InvalidLength(
                        String::from_utf8_lossy(pending).into_owned(),
                    ));
                }
                return Self::incomplete(src);
            };

            let len = parse_length(&src[pos..dot])?;

            let start = dot + 1;
            let mut cursor = start;
            for _ in 0..len {
                let Some(&lead) = src.get(cursor) else {
                    return Self::incomplete(src);
                };
                cursor += utf8_width(lead)?;
            }
            if cursor >= src.len() {
                return Self::incomplete(src);
            }

            let value = std::str::from_utf8(&src[start..cursor])
                .map_err(|_| ViewerError::InvalidUtf8)?;
            elements.push(value.to_owned());

            match src[cursor] {
                b',' => pos = cursor + 1,
                b';' => {
                    src.advance(cursor + 1);
                    let mut elements = elements.into_iter();
                    let opcode = elements.next().unwrap_or_default();
                    return Ok(Some(Instruction {
                        opcode,
                        args: elements.collect(),
                    }));
                }
                other => return Err(ViewerError::InvalidTerminator(other as char)),
            }
        }
    }
}
