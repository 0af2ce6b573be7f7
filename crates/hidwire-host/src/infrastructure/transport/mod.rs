//! Message transport over a report [`Channel`](crate::infrastructure::channel::Channel).
//!
//! - [`correlator`] matches responses to pending requests and enforces
//!   timeouts.
//! - [`subscribers`] keeps the event, request, and raw-report handler lists.
//! - [`session`] owns the open channel and ties everything together.

use std::time::Duration;

use hidwire_core::protocol::MessageId;
use hidwire_core::FrameError;
use thiserror::Error;

use crate::infrastructure::channel::ChannelError;

pub mod correlator;
pub mod session;
pub mod subscribers;

pub use session::{SessionState, TransportSession};
pub use subscribers::Subscription;

/// Error type for transport operations.
///
/// Every error is local to the call that produced it; other in-flight
/// requests are unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No channel is open.  Nothing was sent and no id was allocated.
    #[error("no open channel")]
    ChannelUnavailable,

    /// No response arrived before the deadline.  The caller may retry.
    #[error("request {id} timed out after {after:?}")]
    Timeout { id: MessageId, after: Duration },

    /// The session was closed while the request was pending.
    #[error("channel closed while the request was pending")]
    ChannelClosed,

    /// Every message id is held by a pending request.
    #[error("all message ids are in use")]
    IdsExhausted,

    /// The message could not be framed.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// The channel failed to send a report.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A report size below the supported minimum was requested.
    #[error("report size {size} is below the minimum of {minimum}")]
    InvalidReportSize { size: usize, minimum: usize },
}
