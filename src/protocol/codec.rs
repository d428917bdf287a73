//! Line framing for the worker's byte streams.
//!
//! The worker writes newline-delimited text on stdout and stderr. Pipe reads
//! return arbitrary chunks, so a line may be split across several reads and a
//! single read may carry many lines. [`LineFramer`] buffers the tail fragment
//! until its terminating newline arrives.

use serde::Serialize;

/// Error type for encoding outgoing messages.
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    /// The message could not be serialized.
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The serialized message contained a raw newline and cannot be framed.
    #[error("Serialized message contains a line break")]
    EmbeddedNewline,
}

/// Serialize a message as one line of JSON terminated by `\n`.
///
/// # Errors
///
/// Returns `CodecError::Serialize` if serialization fails.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, CodecError> {
    let mut line = serde_json::to_string(message)?;
    if line.contains('\n') {
        return Err(CodecError::EmbeddedNewline);
    }
    line.push('\n');
    Ok(line)
}

/// Longest line kept by default. Longer lines are dropped.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Incremental splitter from byte chunks to complete text lines.
///
/// Lines are split on `\n`; a trailing `\r` is removed. Invalid UTF-8 is
/// replaced rather than rejected, since stderr may carry arbitrary bytes.
/// A line growing past the limit is discarded up to its newline.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Bytes at the front of `buf` already known to contain no newline.
    scanned: usize,
    limit: usize,
    /// Dropping the remainder of an oversized line.
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            limit,
            discarding: false,
        }
    }

    /// Append a chunk read from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let offset = self.buf[self.scanned..].iter().position(|b| *b == b'\n');
            let Some(offset) = offset else {
                if self.buf.len() > self.limit {
                    tracing::warn!(
                        bytes = self.buf.len(),
                        limit = self.limit,
                        "Discarding oversized line from worker"
                    );
                    self.buf.clear();
                    self.discarding = true;
                }
                self.scanned = self.buf.len();
                return None;
            };

            let end = self.scanned + offset;
            let mut line: Vec<u8> = self.buf.drain(..=end).collect();
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
    }

    /// Take the unterminated fragment left at end of stream.
    ///
    /// Returns `None` if nothing is buffered.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            self.buf.clear();
            return None;
        }
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        let text = String::from_utf8_lossy(&rest);
        Some(text.trim_end_matches('\r').to_string())
    }

    /// Number of bytes waiting for a line terminator.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Default substrings of worker diagnostics that are too noisy for operators.
pub const DEFAULT_NOISE_PATTERNS: &[&str] = &[
    "DeprecationWarning",
    "FutureWarning",
    "file_cache is only supported with oauth2client",
    "warnings.warn(",
];

/// Denylist of noisy log substrings.
///
/// Suppressed lines are hidden from operator logging only; they still reach
/// the readiness detector.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    patterns: Vec<String>,
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_PATTERNS.iter().map(|s| (*s).to_string()))
    }
}

impl NoiseFilter {
    #[must_use]
    pub fn new(patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            patterns: patterns.into_iter().filter(|p| !p.is_empty()).collect(),
        }
    }

    /// Returns true if the line should not be logged.
    #[must_use]
    pub fn is_noise(&self, line: &str) -> bool {
        self.patterns.iter().any(|p| line.contains(p.as_str()))
    }
}
