//! Reassembly of inbound frames into complete messages.
//!
//! The [`ReassemblyTable`] holds one slot per possible message id, so lookup,
//! insert and removal are all O(1) and the table can never grow beyond the
//! 255-id space.  A slot is filled by a start frame whose message does not
//! fit in one report, and emptied as soon as the last byte arrives.
//!
//! The table is owned by whoever reads the channel and is passed in by
//! exclusive reference; it needs no locking.

use tracing::{debug, warn};

use crate::protocol::frame::{Frame, MalformedFrame, MessageKind};
use crate::protocol::message_id::MessageId;

/// A complete logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

/// Accumulation state for one partially received message.
#[derive(Debug)]
struct ReassemblyEntry {
    kind: MessageKind,
    total_len: usize,
    /// Bytes received so far; `buf.len()` is the received count.
    buf: Vec<u8>,
}

impl ReassemblyEntry {
    fn remaining(&self) -> usize {
        self.total_len - self.buf.len()
    }
}

/// Per-id partial-message state, indexed directly by the id byte.
#[derive(Debug)]
pub struct ReassemblyTable {
    slots: Vec<Option<ReassemblyEntry>>,
}

impl ReassemblyTable {
    /// Creates an empty table with a slot for every id byte.
    pub fn new() -> Self {
        Self {
            slots: (0..=u8::MAX).map(|_| None).collect(),
        }
    }

    /// Returns `true` if a partial message is open for `id`.
    pub fn contains(&self, id: MessageId) -> bool {
        self.slots[id.get() as usize].is_some()
    }

    /// Number of partially received messages.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Returns `true` if no message is partially received.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Returns `(received, total)` for the open entry of `id`.
    #[cfg(test)]
    pub(crate) fn progress(&self, id: MessageId) -> Option<(usize, usize)> {
        self.slots[id.get() as usize]
            .as_ref()
            .map(|e| (e.buf.len(), e.total_len))
    }

    /// Drops every partial message.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    fn slot(&mut self, id: MessageId) -> &mut Option<ReassemblyEntry> {
        &mut self.slots[id.get() as usize]
    }
}

impl Default for ReassemblyTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Why an inbound report produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// The report is not a valid frame.
    Malformed(MalformedFrame),
    /// A continuation frame arrived for an id with no open entry.
    StrayContinuation(MessageId),
}

/// Outcome of feeding one report to [`ingest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    /// The report completed a message.
    Complete(Message),
    /// The report was accepted; more frames are needed.
    Pending,
    /// The report was dropped without touching the table.
    Discarded(Discard),
}

/// Feeds one inbound report into `table`.
///
/// Never fails: malformed reports and stray continuations come back as
/// [`Ingest::Discarded`] and leave the table unchanged.  Bytes beyond a
/// message's declared length (for example, report padding) are ignored.
///
/// # Examples
///
/// ```rust
/// use hidwire_core::protocol::{fragment, ingest, Ingest, MessageId, MessageKind, ReassemblyTable};
///
/// let id = MessageId::new(5).unwrap();
/// let mut table = ReassemblyTable::new();
/// let mut out = None;
/// for frame in fragment(id, MessageKind::Event, &[7; 150], 64).unwrap() {
///     if let Ingest::Complete(msg) = ingest(&frame, &mut table) {
///         out = Some(msg);
///     }
/// }
/// assert_eq!(out.unwrap().payload, vec![7; 150]);
/// assert!(table.is_empty());
/// ```
pub fn ingest(report: &[u8], table: &mut ReassemblyTable) -> Ingest {
    let frame = match Frame::parse(report) {
        Ok(frame) => frame,
        Err(reason) => {
            debug!("dropping malformed report: {reason}");
            return Ingest::Discarded(Discard::Malformed(reason));
        }
    };

    match frame {
        Frame::Start {
            id,
            kind,
            total_len,
            chunk,
        } => {
            let slot = table.slot(id);
            if let Some(old) = slot.take() {
                warn!(
                    "message {id} restarted; discarding {} of {} bytes already received",
                    old.buf.len(),
                    old.total_len
                );
            }

            let take = chunk.len().min(total_len);
            if take == total_len {
                return Ingest::Complete(Message {
                    id,
                    kind,
                    payload: chunk[..take].to_vec(),
                });
            }

            let mut buf = Vec::with_capacity(total_len);
            buf.extend_from_slice(&chunk[..take]);
            *slot = Some(ReassemblyEntry {
                kind,
                total_len,
                buf,
            });
            Ingest::Pending
        }
        Frame::Continuation { id, chunk } => {
            let slot = table.slot(id);
            let Some(entry) = slot.as_mut() else {
                debug!("dropping stray continuation for message {id}");
                return Ingest::Discarded(Discard::StrayContinuation(id));
            };

            let take = chunk.len().min(entry.remaining());
            entry.buf.extend_from_slice(&chunk[..take]);
            if entry.remaining() > 0 {
                return Ingest::Pending;
            }

            match slot.take() {
                Some(done) => Ingest::Complete(Message {
                    id,
                    kind: done.kind,
                    payload: done.buf,
                }),
                None => Ingest::Pending,
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{fragment, CONTINUATION_MARKER};

    fn id(raw: u8) -> MessageId {
        MessageId::new(raw).expect("nonzero id")
    }

    fn feed_all(frames: &[Vec<u8>], table: &mut ReassemblyTable) -> Vec<Ingest> {
        frames.iter().map(|f| ingest(f, table)).collect()
    }

    #[test]
    fn test_single_frame_message_completes_without_entry() {
        // Arrange
        let mut table = ReassemblyTable::new();
        let frames = fragment(id(2), MessageKind::Response, &[1, 2, 3], 64).unwrap();

        // Act
        let outcome = ingest(&frames[0], &mut table);

        // Assert
        assert_eq!(
            outcome,
            Ingest::Complete(Message {
                id: id(2),
                kind: MessageKind::Response,
                payload: vec![1, 2, 3],
            })
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_multi_frame_message_tracks_progress_then_completes() {
        // Arrange
        let mut table = ReassemblyTable::new();
        let payload: Vec<u8> = (0..200).map(|i| i as u8).collect();
        let frames = fragment(id(8), MessageKind::Response, &payload, 64).unwrap();

        // Act / Assert – entry is created by the start frame
        assert_eq!(ingest(&frames[0], &mut table), Ingest::Pending);
        assert_eq!(table.progress(id(8)), Some((60, 200)));
        assert_eq!(ingest(&frames[1], &mut table), Ingest::Pending);
        assert_eq!(ingest(&frames[2], &mut table), Ingest::Pending);
        assert_eq!(table.progress(id(8)), Some((184, 200)));

        let last = ingest(&frames[3], &mut table);
        assert!(matches!(last, Ingest::Complete(ref m) if m.payload == payload));
        assert!(!table.contains(id(8)), "entry must be removed on completion");
    }

    #[test]
    fn test_stray_continuation_is_a_no_op() {
        // Arrange – an unrelated message is half received
        let mut table = ReassemblyTable::new();
        let frames = fragment(id(1), MessageKind::Event, &[9; 100], 64).unwrap();
        ingest(&frames[0], &mut table);

        // Act
        let outcome = ingest(&[42, CONTINUATION_MARKER, 1, 2, 3], &mut table);

        // Assert
        assert_eq!(outcome, Ingest::Discarded(Discard::StrayContinuation(id(42))));
        assert_eq!(table.len(), 1);
        assert_eq!(table.progress(id(1)), Some((60, 100)));
    }

    #[test]
    fn test_malformed_report_leaves_table_untouched() {
        let mut table = ReassemblyTable::new();

        let outcome = ingest(&[7], &mut table);

        assert!(matches!(outcome, Ingest::Discarded(Discard::Malformed(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_padding_past_declared_length_is_ignored() {
        // Arrange – pad every frame to the full report size with 0xEE
        let mut table = ReassemblyTable::new();
        let payload = vec![0x11; 70];
        let frames: Vec<Vec<u8>> = fragment(id(3), MessageKind::Request, &payload, 64)
            .unwrap()
            .into_iter()
            .map(|mut f| {
                f.resize(64, 0xEE);
                f
            })
            .collect();

        // Act
        let outcomes = feed_all(&frames, &mut table);

        // Assert
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(&outcomes[1], Ingest::Complete(m) if m.payload == payload));
    }

    #[test]
    fn test_padded_start_frame_of_short_message_completes() {
        let mut table = ReassemblyTable::new();
        let mut frame = fragment(id(4), MessageKind::Response, &[0xAB, 0xCD], 64)
            .unwrap()
            .remove(0);
        frame.resize(64, 0);

        let outcome = ingest(&frame, &mut table);

        assert!(matches!(outcome, Ingest::Complete(m) if m.payload == vec![0xAB, 0xCD]));
    }

    #[test]
    fn test_interleaved_messages_complete_independently() {
        // Arrange
        let mut table = ReassemblyTable::new();
        let a = fragment(id(10), MessageKind::Response, &[0xA; 130], 64).unwrap();
        let b = fragment(id(11), MessageKind::Event, &[0xB; 70], 64).unwrap();

        // Act – interleave a0 b0 a1 b1 a2
        let order = [&a[0], &b[0], &a[1], &b[1], &a[2]];
        let completed: Vec<Message> = order
            .iter()
            .filter_map(|f| match ingest(f, &mut table) {
                Ingest::Complete(m) => Some(m),
                _ => None,
            })
            .collect();

        // Assert – b finishes first even though a started first
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].id, id(11));
        assert_eq!(completed[1].id, id(10));
        assert_eq!(completed[1].payload, vec![0xA; 130]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_restarted_id_replaces_partial_entry() {
        // Arrange
        let mut table = ReassemblyTable::new();
        let old = fragment(id(6), MessageKind::Response, &[1; 100], 64).unwrap();
        let new = fragment(id(6), MessageKind::Response, &[2; 80], 64).unwrap();
        ingest(&old[0], &mut table);

        // Act
        let outcomes = feed_all(&new, &mut table);

        // Assert
        assert!(matches!(&outcomes[1], Ingest::Complete(m) if m.payload == vec![2; 80]));
        assert!(table.is_empty());
    }

    #[test]
    fn test_single_frame_message_on_open_id_drops_stale_entry() {
        // Arrange – id 6 is half received when a short message reuses it
        let mut table = ReassemblyTable::new();
        let old = fragment(id(6), MessageKind::Response, &[1; 100], 64).unwrap();
        let new = fragment(id(6), MessageKind::Response, &[2; 3], 64).unwrap();
        ingest(&old[0], &mut table);

        // Act
        let outcome = ingest(&new[0], &mut table);
        let late = ingest(&old[1], &mut table);

        // Assert – the old continuation no longer completes anything
        assert!(matches!(outcome, Ingest::Complete(ref m) if m.payload == vec![2; 3]));
        assert!(table.is_empty());
        assert_eq!(late, Ingest::Discarded(Discard::StrayContinuation(id(6))));
    }

    #[test]
    fn test_clear_drops_partial_messages() {
        let mut table = ReassemblyTable::new();
        let frames = fragment(id(1), MessageKind::Request, &[0; 90], 64).unwrap();
        ingest(&frames[0], &mut table);

        table.clear();

        assert!(table.is_empty());
        assert_eq!(
            ingest(&frames[1], &mut table),
            Ingest::Discarded(Discard::StrayContinuation(id(1)))
        );
    }
}
