//! Message ids and the thread-safe id allocator.
//!
//! # What is a message id? (for beginners)
//!
//! Every logical message on the channel carries a one-byte *message id*.
//! All frames of one message share the id, and a reply to a request reuses
//! the request's id.  That is how the host matches an incoming response to
//! the call that is waiting for it, even when several requests are in
//! flight at once.
//!
//! Id `0` is reserved and never assigned, so the usable space is `1..=255`.
//! The allocator walks that space in order and wraps from 255 back to 1.
//!
//! # Thread safety
//!
//! The allocator uses an `AtomicU8` internally, so two tasks can both call
//! [`MessageIdAllocator::next`] at the same time without producing the same
//! id twice in a row.  Whether an id is still *in use* is a separate
//! question answered by whoever tracks pending requests.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// A nonzero one-byte message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u8);

impl MessageId {
    /// Smallest assignable id.
    pub const MIN: MessageId = MessageId(1);
    /// Largest assignable id.
    pub const MAX: MessageId = MessageId(u8::MAX);

    /// Wraps a raw id byte, rejecting the reserved value `0`.
    pub fn new(raw: u8) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    /// Returns the raw id byte as it appears on the wire.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Returns the id that follows `self`, wrapping 255 → 1.
    pub fn successor(self) -> Self {
        if self.0 == u8::MAX {
            Self::MIN
        } else {
            Self(self.0 + 1)
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Number of distinct assignable ids.
pub const ID_SPACE: usize = u8::MAX as usize;

/// A thread-safe, wrapping allocator over the id space `1..=255`.
///
/// # Examples
///
/// ```rust
/// use hidwire_core::protocol::MessageIdAllocator;
///
/// let ids = MessageIdAllocator::new();
/// assert_eq!(ids.next().get(), 1);
/// assert_eq!(ids.next().get(), 2);
/// ```
pub struct MessageIdAllocator {
    /// The id that the next call to [`next`](Self::next) hands out.
    inner: AtomicU8,
}

impl MessageIdAllocator {
    /// Creates an allocator whose first id is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU8::new(MessageId::MIN.get()),
        }
    }

    /// Returns the next id and atomically advances the counter.
    ///
    /// Wraps from 255 to 1; `0` is never returned.
    pub fn next(&self) -> MessageId {
        // The closure always returns `Some`, so both arms carry the previous value.
        let prev = self
            .inner
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(MessageId(v).successor().get())
            })
            .unwrap_or_else(|v| v);
        MessageId(prev)
    }

    /// Returns the next id for which `in_use` is false.
    ///
    /// Probes at most one full cycle of the id space and returns `None` when
    /// every id is taken.
    pub fn next_free(&self, mut in_use: impl FnMut(MessageId) -> bool) -> Option<MessageId> {
        (0..ID_SPACE).map(|_| self.next()).find(|id| !in_use(*id))
    }

    /// Returns the id the next call will hand out, without advancing.
    #[cfg(test)]
    pub(crate) fn peek(&self) -> MessageId {
        MessageId(self.inner.load(Ordering::Relaxed))
    }
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
