//! Framing for the transcoder's stdout.
//!
//! The transcoder writes newline-terminated lines. Lines starting with `::`
//! are control frames (`::COMMAND:arg:arg`); everything else is log output.
//! Lines may arrive split across reads; the codec keeps the unread tail at
//! the front of its buffer and refuses lines longer than its limit.

use bytes::BytesMut;
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::codec::Decoder;

use super::ready::ManifestReady;

/// Control-frame prefix
pub const CONTROL_PREFIX: &str = "::";

/// Line written to the transcoder's stdin once its output is being consumed
pub const START_COMMAND: &[u8] = b"::START\n";

const MANIFEST_READY: &str = "MANIFEST_READY";

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("transcoder line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscoderFrame {
    ManifestReady(ManifestReady),
    /// Well-formed control frame with a command this server does not handle
    UnknownCommand { command: String, args: Vec<String> },
    /// Control frame whose arguments could not be parsed
    MalformedControl { line: String, reason: String },
    Log(String),
}

/// Line decoder for transcoder stdout, usable with `FramedRead`.
#[derive(Debug, Clone)]
pub struct TranscoderCodec {
    max_line_length: usize,
    /// Bytes already scanned for a newline, so rescans start past them
    next_index: usize,
}

impl TranscoderCodec {
    #[must_use]
    pub const fn new(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            next_index: 0,
        }
    }

    #[must_use]
    pub const fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl Decoder for TranscoderCodec {
    type Item = TranscoderFrame;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // A line of exactly max_line_length bytes still needs room for '\n'.
        let read_to = buf.len().min(self.max_line_length.saturating_add(1));

        if let Some(offset) = buf[self.next_index..read_to]
            .iter()
            .position(|b| *b == b'\n')
        {
            let newline_index = self.next_index + offset;
            self.next_index = 0;
            let line = buf.split_to(newline_index + 1);
            return Ok(Some(parse_line(&line[..line.len() - 1])));
        }

        if buf.len() > self.max_line_length {
            return Err(FrameError::LineTooLong {
                limit: self.max_line_length,
            });
        }

        self.next_index = read_to;
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        // Unterminated final line
        self.next_index = 0;
        let line = buf.split_to(buf.len());
        Ok(Some(parse_line(&line)))
    }
}

fn parse_line(raw: &[u8]) -> TranscoderFrame {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);

    let Some(control) = line.strip_prefix(CONTROL_PREFIX) else {
        return TranscoderFrame::Log(line.into_owned());
    };

    let (command, rest) = control.split_once(':').unwrap_or((control, ""));
    match command {
        MANIFEST_READY => parse_manifest_ready(&line, rest),
        _ => TranscoderFrame::UnknownCommand {
            command: command.to_string(),
            args: if rest.is_empty() {
                Vec::new()
            } else {
                rest.split(':').map(str::to_string).collect()
            },
        },
    }
}

/// `MANIFEST_READY:<relative-path>:<integer-duration-seconds>`; the duration
/// is taken from the last field so paths may contain ':'.
fn parse_manifest_ready(line: &str, args: &str) -> TranscoderFrame {
    let malformed = |reason: &str| TranscoderFrame::MalformedControl {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let Some((path, duration)) = args.rsplit_once(':') else {
        return malformed("expected <path>:<duration>");
    };
    if path.is_empty() {
        return malformed("empty manifest path");
    }
    let Ok(duration_seconds) = duration.trim().parse::<u64>() else {
        return malformed("duration is not an integer number of seconds");
    };

    TranscoderFrame::ManifestReady(ManifestReady {
        path: PathBuf::from(path),
        duration_seconds,
    })
}
