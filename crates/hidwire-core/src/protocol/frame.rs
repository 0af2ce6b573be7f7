//! Frame codec: splits a logical message into channel-sized frames.
//!
//! Wire format (report size `R`):
//! ```text
//! start frame:        [id:1][flags:1][total_len:2 LE][chunk: up to R-4]
//! continuation frame: [id:1][0x03:1][chunk: up to R-2]
//! ```
//! `flags` bit 7 marks a start frame; bits 0-6 carry the [`MessageKind`].
//! `total_len` is the length of the whole message, not of the first chunk.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::message_id::MessageId;

// ── Framing constants ─────────────────────────────────────────────────────────

/// Header size of a start frame: id + flags + 2-byte total length.
pub const START_HEADER_SIZE: usize = 4;

/// Header size of a continuation frame: id + marker.
pub const CONTINUATION_HEADER_SIZE: usize = 2;

/// Bit 7 of the flags byte marks a start frame.
pub const START_FLAG: u8 = 0x80;

/// Bits 0-6 of the flags byte carry the message kind.
pub const KIND_MASK: u8 = 0x7F;

/// Second byte of every continuation frame.
pub const CONTINUATION_MARKER: u8 = 0x03;

/// Smallest report that can carry a start header plus one payload byte.
pub const MIN_REPORT_SIZE: usize = START_HEADER_SIZE + 1;

/// Smallest report size a session accepts from configuration.
pub const MIN_CONFIGURED_REPORT_SIZE: usize = 16;

/// Report size of a full-speed HID endpoint.
pub const DEFAULT_REPORT_SIZE: usize = 64;

/// Longest message expressible in the 2-byte `total_len` field.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

// ── Message kind ──────────────────────────────────────────────────────────────

/// What a logical message is, carried in bits 0-6 of a start frame's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Expects a [`MessageKind::Response`] with the same id.
    Request = 0,
    /// Answers the request with the same id.
    Response = 1,
    /// Unsolicited notification; nothing answers it.
    Event = 2,
}

impl TryFrom<u8> for MessageKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(MessageKind::Request),
            1 => Ok(MessageKind::Response),
            2 => Ok(MessageKind::Event),
            _ => Err(()),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while fragmenting an outbound message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The report cannot hold even a start header and one payload byte.
    #[error("report size {report_size} is too small; need at least {minimum}")]
    ReportSizeTooSmall { report_size: usize, minimum: usize },

    /// The message does not fit the 16-bit `total_len` field.
    #[error("message of {len} bytes exceeds the {max}-byte frame limit")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Reasons an inbound report is not a valid frame.  These never propagate
/// past the receiver; the report is dropped.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MalformedFrame {
    #[error("report of {len} bytes is shorter than its frame header")]
    TooShort { len: usize },
    #[error("frame carries the reserved message id 0")]
    ZeroId,
    #[error("start frame has unknown message kind {0}")]
    UnknownKind(u8),
    #[error("continuation frame has marker 0x{0:02X}, expected 0x03")]
    BadMarker(u8),
}

// ── Inbound frame view ────────────────────────────────────────────────────────

/// A parsed view over one inbound report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// First frame of a message.
    Start {
        id: MessageId,
        kind: MessageKind,
        total_len: usize,
        chunk: &'a [u8],
    },
    /// Any later frame of a message.
    Continuation { id: MessageId, chunk: &'a [u8] },
}

impl<'a> Frame<'a> {
    /// Parses the header of `report`.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedFrame`] when the report is too short, uses id 0,
    /// names an unknown kind, or is a continuation with the wrong marker.
    pub fn parse(report: &'a [u8]) -> Result<Self, MalformedFrame> {
        if report.len() < CONTINUATION_HEADER_SIZE {
            return Err(MalformedFrame::TooShort { len: report.len() });
        }
        let id = MessageId::new(report[0]).ok_or(MalformedFrame::ZeroId)?;
        let flags = report[1];

        if flags & START_FLAG == 0 {
            if flags != CONTINUATION_MARKER {
                return Err(MalformedFrame::BadMarker(flags));
            }
            return Ok(Frame::Continuation {
                id,
                chunk: &report[CONTINUATION_HEADER_SIZE..],
            });
        }

        if report.len() < START_HEADER_SIZE {
            return Err(MalformedFrame::TooShort { len: report.len() });
        }
        let kind_bits = flags & KIND_MASK;
        let kind =
            MessageKind::try_from(kind_bits).map_err(|_| MalformedFrame::UnknownKind(kind_bits))?;
        let total_len = u16::from_le_bytes([report[2], report[3]]) as usize;
        Ok(Frame::Start {
            id,
            kind,
            total_len,
            chunk: &report[START_HEADER_SIZE..],
        })
    }

    /// Returns the message id shared by every frame of the message.
    pub fn id(&self) -> MessageId {
        match self {
            Frame::Start { id, .. } | Frame::Continuation { id, .. } => *id,
        }
    }
}

// ── Outbound fragmentation ────────────────────────────────────────────────────

/// Splits `payload` into one start frame followed by as many continuation
/// frames as needed for a channel with `report_size`-byte reports.
///
/// An empty payload still produces a single start frame declaring length 0.
/// Frames are not padded; each is header plus chunk.
///
/// # Errors
///
/// Returns [`FrameError::ReportSizeTooSmall`] when `report_size` is below
/// [`MIN_REPORT_SIZE`], and [`FrameError::PayloadTooLarge`] when the payload
/// exceeds [`MAX_MESSAGE_LEN`].
///
/// # Examples
///
/// ```rust
/// use hidwire_core::protocol::{fragment, MessageId, MessageKind};
///
/// let id = MessageId::new(9).unwrap();
/// let frames = fragment(id, MessageKind::Request, &[0xAB; 100], 64).unwrap();
/// assert_eq!(frames.len(), 2);
/// assert_eq!(frames[0].len(), 64);
/// assert_eq!(frames[1].len(), 2 + 40);
/// ```
pub fn fragment(
    id: MessageId,
    kind: MessageKind,
    payload: &[u8],
    report_size: usize,
) -> Result<Vec<Vec<u8>>, FrameError> {
    if report_size < MIN_REPORT_SIZE {
        return Err(FrameError::ReportSizeTooSmall {
            report_size,
            minimum: MIN_REPORT_SIZE,
        });
    }
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_MESSAGE_LEN,
        });
    }

    let first_max = report_size - START_HEADER_SIZE;
    let cont_max = report_size - CONTINUATION_HEADER_SIZE;
    let (first, rest) = payload.split_at(payload.len().min(first_max));

    let mut frames = Vec::with_capacity(1 + rest.len().div_ceil(cont_max));

    let mut start = Vec::with_capacity(START_HEADER_SIZE + first.len());
    start.push(id.get());
    start.push(START_FLAG | (kind as u8 & KIND_MASK));
    start.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    start.extend_from_slice(first);
    frames.push(start);

    for chunk in rest.chunks(cont_max) {
        let mut frame = Vec::with_capacity(CONTINUATION_HEADER_SIZE + chunk.len());
        frame.push(id.get());
        frame.push(CONTINUATION_MARKER);
        frame.extend_from_slice(chunk);
        frames.push(frame);
    }

    Ok(frames)
}

/// Returns how many frames [`fragment`] emits for a `len`-byte message.
///
/// Assumes `report_size >= MIN_REPORT_SIZE`.
pub fn frame_count(len: usize, report_size: usize) -> usize {
    let first_max = report_size - START_HEADER_SIZE;
    let cont_max = report_size - CONTINUATION_HEADER_SIZE;
    1 + len.saturating_sub(first_max).div_ceil(cont_max)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
