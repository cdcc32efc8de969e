//! Line discipline for the UART diagnostic console.
//!
//! Bytes from the UART are assembled into [`ConsoleLine`]s for the main loop;
//! command responses come back through a [`ReplyWriter`] that cuts the
//! rendered text into [`ReplyLine`]s for the transmitter.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::fmt;
use core::mem;

use heapless::{String, Vec};
use kwl_core::diag::grammar::MAX_LINE_LEN;

/// Longest response line; longer output is truncated.
pub const REPLY_LINE_LEN: usize = 128;

pub type ConsoleLine = String<MAX_LINE_LEN>;
pub type ReplyLine = String<REPLY_LINE_LEN>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineError {
    /// The line grew past [`MAX_LINE_LEN`]; input is dropped up to the next line end.
    Overflow,
    InvalidUtf8,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineError::Overflow => write!(f, "line longer than {MAX_LINE_LEN} bytes"),
            LineError::InvalidUtf8 => f.write_str("line is not valid UTF-8"),
        }
    }
}

/// Collects received bytes until CR or LF.
#[derive(Default)]
pub struct LineAssembler {
    buffer: Vec<u8, MAX_LINE_LEN>,
    discarding: bool,
}

impl LineAssembler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            discarding: false,
        }
    }

    /// Feeds one byte. Returns the finished line when `byte` ends a non-empty one.
    ///
    /// # Errors
    ///
    /// Reports a line that overflowed or is not UTF-8; the assembler is ready
    /// for the next line either way.
    pub fn ingest(&mut self, byte: u8) -> Result<Option<ConsoleLine>, LineError> {
        match byte {
            b'\r' | b'\n' => {
                let bytes = mem::take(&mut self.buffer);
                if mem::replace(&mut self.discarding, false) || bytes.is_empty() {
                    return Ok(None);
                }
                ConsoleLine::from_utf8(bytes)
                    .map(Some)
                    .map_err(|_| LineError::InvalidUtf8)
            }
            0x08 | 0x7f => {
                self.buffer.pop();
                Ok(None)
            }
            _ if self.discarding => Ok(None),
            value => {
                if self.buffer.push(value).is_err() {
                    self.buffer.clear();
                    self.discarding = true;
                    return Err(LineError::Overflow);
                }
                Ok(None)
            }
        }
    }
}

/// `fmt::Write` sink that hands every completed line to `emit`.
pub struct ReplyWriter<F> {
    line: ReplyLine,
    emit: F,
    truncated: bool,
}

impl<F> ReplyWriter<F>
where
    F: FnMut(ReplyLine),
{
    pub fn new(emit: F) -> Self {
        Self {
            line: ReplyLine::new(),
            emit,
            truncated: false,
        }
    }

    /// Emits a trailing partial line. Returns `true` if any line was cut short.
    pub fn finish(mut self) -> bool {
        if !self.line.is_empty() {
            (self.emit)(mem::take(&mut self.line));
        }
        self.truncated
    }
}

impl<F> fmt::Write for ReplyWriter<F>
where
    F: FnMut(ReplyLine),
{
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if ch == '\n' {
                (self.emit)(mem::take(&mut self.line));
            } else if self.line.push(ch).is_err() {
                self.truncated = true;
            }
        }
        Ok(())
    }
}
