//! Request correlator: pending requests keyed by message id.
//!
//! # How correlation works (for beginners)
//!
//! Each request gets a fresh message id and an entry in the pending table
//! holding a [`oneshot`] sender.  The caller keeps the matching receiver and
//! waits on it, racing a timer.  When the reader task reassembles a response
//! it looks the id up, removes the entry, and sends the payload through.
//!
//! Whichever happens first wins:
//!
//! - **Response first** – the entry is removed and the caller gets the bytes.
//! - **Timer first** – the caller removes the entry itself, so a late
//!   response finds nothing and is dropped.
//! - **Session closed** – every entry is failed with
//!   [`TransportError::ChannelClosed`].
//!
//! # Id collisions
//!
//! An id is never handed out while it still has a pending entry.  A
//! semaphore with one permit per id caps the number of pending requests at
//! 255; extra callers wait for a permit instead of failing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hidwire_core::protocol::message_id::ID_SPACE;
use hidwire_core::protocol::{MessageId, MessageIdAllocator};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::TransportError;

type Reply = Result<Vec<u8>, TransportError>;

/// Tracks outstanding requests and allocates their ids.
pub struct Correlator {
    ids: MessageIdAllocator,
    pending: Mutex<HashMap<MessageId, oneshot::Sender<Reply>>>,
    slots: Arc<Semaphore>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            ids: MessageIdAllocator::new(),
            pending: Mutex::new(HashMap::new()),
            slots: Arc::new(Semaphore::new(ID_SPACE)),
        }
    }

    /// Registers a new pending request, waiting for a free id if all 255
    /// are in use.
    ///
    /// # Errors
    ///
    /// [`TransportError::IdsExhausted`] if no free id is found despite
    /// holding a slot.
    pub async fn register(&self) -> Result<PendingRequest<'_>, TransportError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| TransportError::ChannelClosed)?;

        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock();
        let id = self
            .ids
            .next_free(|id| pending.contains_key(&id))
            .ok_or(TransportError::IdsExhausted)?;
        pending.insert(id, tx);
        Ok(PendingRequest {
            id,
            rx,
            correlator: self,
            _permit: permit,
        })
    }

    /// Allocates an id for a message that expects no reply.
    ///
    /// Skips ids with pending requests where possible.
    pub fn next_unpaired_id(&self) -> MessageId {
        let pending = self.lock();
        self.ids
            .next_free(|id| pending.contains_key(&id))
            .unwrap_or_else(|| self.ids.next())
    }

    /// Completes the pending request `id` with `payload`.
    ///
    /// Returns `false` if no request is pending under `id` (late or stray
    /// response); the payload is dropped.
    pub fn resolve(&self, id: MessageId, payload: Vec<u8>) -> bool {
        match self.lock().remove(&id) {
            Some(tx) => {
                // The receiver may have just timed out; nothing to do then.
                let _ = tx.send(Ok(payload));
                true
            }
            None => false,
        }
    }

    /// Removes the entry for `id` if its receiver is gone.  An entry that a
    /// newer request registered under the same id is left alone.
    fn release(&self, id: MessageId) {
        let mut pending = self.lock();
        if pending.get(&id).is_some_and(|tx| tx.is_closed()) {
            pending.remove(&id);
        }
    }

    /// Fails every pending request with `error`.
    pub fn fail_all(&self, error: TransportError) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        if count > 0 {
            debug!("failed {count} pending request(s): {error}");
        }
        count
    }

    /// Returns `true` if a request is pending under `id`.
    pub fn is_pending(&self, id: MessageId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of pending requests.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MessageId, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered request awaiting its response.
///
/// Dropping it removes the pending entry, so an abandoned call never leaks
/// its id.
pub struct PendingRequest<'a> {
    id: MessageId,
    rx: oneshot::Receiver<Reply>,
    correlator: &'a Correlator,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PendingRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest").field("id", &self.id).finish_non_exhaustive()
    }
}

impl PendingRequest<'_> {
    /// The id the request must be sent under.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Waits for the response, failing with [`TransportError::Timeout`]
    /// once `after` has elapsed.
    pub async fn wait(mut self, after: Duration) -> Result<Vec<u8>, TransportError> {
        match tokio::time::timeout(after, &mut self.rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(TransportError::ChannelClosed),
            Err(_) => {
                debug!("request {} timed out after {after:?}", self.id);
                Err(TransportError::Timeout { id: self.id, after })
            }
        }
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.rx.close();
        self.correlator.release(self.id);
    }
}
