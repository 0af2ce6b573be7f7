//! Transport session: the open channel plus everything that runs on it.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!  Closed ──open(channel)──▶ Open ──close()──▶ Closed
//!            ▲                 │
//!            └──open(other)────┘   (replaces the channel)
//! ```
//!
//! While open, a background *reader task* pulls inbound reports off the
//! channel, feeds them through a [`ReassemblyTable`] it owns, and routes each
//! complete message:
//!
//! - **Response** → the [`Correlator`] wakes the matching `send_request` call.
//! - **Event** → every event handler.
//! - **Request** → every request handler; the first reply returned is sent
//!   back as a response with the same id.
//!
//! Reports are handled strictly in arrival order, so frames of one message
//! are never reordered.  Frames of different messages may interleave.
//!
//! There is no automatic reconnection and no retry; both belong to callers.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard, PoisonError, Weak,
};
use std::time::Duration;

use hidwire_core::protocol::frame::{DEFAULT_REPORT_SIZE, MIN_CONFIGURED_REPORT_SIZE};
use hidwire_core::protocol::{fragment, ingest, Ingest, Message, MessageId, MessageKind};
use hidwire_core::ReassemblyTable;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::correlator::Correlator;
use super::subscribers::{EventHandler, Registry, ReportHandler, RequestHandler, Subscription};
use super::TransportError;
use crate::infrastructure::channel::{Channel, DeviceInfo, InboundReport};

/// Deadline for request/response exchanges.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Deadline for light protocol queries.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

struct Link {
    channel: Arc<dyn Channel>,
    reader: JoinHandle<()>,
}

struct Shared {
    correlator: Correlator,
    link: Mutex<Option<Link>>,
    report_size: AtomicUsize,
    events: Arc<Registry<EventHandler>>,
    requests: Arc<Registry<RequestHandler>>,
    reports: Arc<Registry<ReportHandler>>,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.link().as_ref().map(|l| Arc::clone(&l.channel))
    }

    async fn dispatch(&self, channel: &dyn Channel, report_id: u8, message: Message) {
        let Message { id, kind, payload } = message;
        match kind {
            MessageKind::Response => {
                if !self.correlator.resolve(id, payload) {
                    debug!("dropping response {id}: no pending request");
                }
            }
            MessageKind::Event => {
                for handler in self.events.snapshot() {
                    contain_panic("event", || handler(report_id, &payload));
                }
            }
            MessageKind::Request => {
                let mut reply = None;
                for handler in self.requests.snapshot() {
                    let answer =
                        contain_panic("request", || handler(report_id, &payload)).flatten();
                    if reply.is_none() {
                        reply = answer;
                    }
                }
                let Some(reply) = reply else {
                    debug!("request {id} not answered by any handler");
                    return;
                };
                let report_size = self.report_size.load(Ordering::Relaxed);
                if let Err(e) = send_message(
                    channel,
                    report_id,
                    id,
                    MessageKind::Response,
                    &reply,
                    report_size,
                )
                .await
                {
                    warn!("failed to answer request {id}: {e}");
                }
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(link) = self.link().take() {
            link.reader.abort();
        }
    }
}

/// A duplex message session over one report channel.
///
/// Cloning is cheap; every clone drives the same session.
#[derive(Clone)]
pub struct TransportSession {
    shared: Arc<Shared>,
}

impl TransportSession {
    /// Creates a closed session that frames messages into `report_size`-byte
    /// reports.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidReportSize`] if `report_size` is below 16.
    pub fn new(report_size: usize) -> Result<Self, TransportError> {
        check_report_size(report_size)?;
        Ok(Self::build(report_size))
    }

    fn build(report_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                correlator: Correlator::new(),
                link: Mutex::new(None),
                report_size: AtomicUsize::new(report_size),
                events: Registry::new(),
                requests: Registry::new(),
                reports: Registry::new(),
            }),
        }
    }

    /// Opens `channel` and starts listening for inbound reports.
    ///
    /// An already open channel is closed first.
    ///
    /// # Errors
    ///
    /// [`TransportError::Channel`] if the channel fails to open; the session
    /// stays closed.
    pub async fn open(&self, channel: Arc<dyn Channel>) -> Result<(), TransportError> {
        self.close().await;

        let rx = channel.open().await?;
        let reader = tokio::spawn(read_loop(
            Arc::downgrade(&self.shared),
            Arc::clone(&channel),
            rx,
        ));
        let info = channel.info();
        *self.shared.link() = Some(Link { channel, reader });

        info!(
            "session open: {} ({:04X}:{:04X})",
            info.product_name, info.vendor_id, info.product_id
        );
        Ok(())
    }

    /// Stops listening and releases the channel.
    ///
    /// Pending requests fail immediately with
    /// [`TransportError::ChannelClosed`].  A no-op when already closed.
    pub async fn close(&self) {
        let link = self.shared.link().take();
        let Some(link) = link else {
            return;
        };
        self.shared.correlator.fail_all(TransportError::ChannelClosed);
        link.channel.close().await;
        link.reader.abort();
        info!("session closed");
    }

    pub fn state(&self) -> SessionState {
        if self.is_open() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.link().is_some()
    }

    /// Identity of the connected device, if open.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.shared.channel().map(|c| c.info())
    }

    /// Sends `payload` as a request and waits for the matching response.
    ///
    /// # Errors
    ///
    /// - [`TransportError::ChannelUnavailable`] when closed (nothing sent).
    /// - [`TransportError::Frame`] / [`TransportError::Channel`] when sending
    ///   fails; the pending entry is cleared.
    /// - [`TransportError::Timeout`] when no response arrives within
    ///   `timeout`.
    /// - [`TransportError::ChannelClosed`] when the session closes first.
    pub async fn send_request(
        &self,
        report_id: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelUnavailable);
        }
        let pending = self.shared.correlator.register().await?;
        let channel = self
            .shared
            .channel()
            .ok_or(TransportError::ChannelClosed)?;

        send_message(
            channel.as_ref(),
            report_id,
            pending.id(),
            MessageKind::Request,
            payload,
            self.report_size(),
        )
        .await?;
        pending.wait(timeout).await
    }

    /// Sends `payload` as an event.  Nothing waits for a reply.
    ///
    /// # Errors
    ///
    /// [`TransportError::ChannelUnavailable`] when closed, or the framing /
    /// channel error that stopped the send.
    pub async fn send_event(&self, report_id: u8, payload: &[u8]) -> Result<(), TransportError> {
        let channel = self
            .shared
            .channel()
            .ok_or(TransportError::ChannelUnavailable)?;
        let id = self.shared.correlator.next_unpaired_id();
        send_message(
            channel.as_ref(),
            report_id,
            id,
            MessageKind::Event,
            payload,
            self.report_size(),
        )
        .await
    }

    /// Registers a handler for inbound events.
    pub fn subscribe_events(
        &self,
        handler: impl Fn(u8, &[u8]) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.events.add(Arc::new(handler))
    }

    /// Registers a handler for inbound requests.  A handler that returns
    /// `Some(reply)` answers the request.
    pub fn subscribe_requests(
        &self,
        handler: impl Fn(u8, &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.requests.add(Arc::new(handler))
    }

    /// Registers a tap that sees every inbound report before reassembly.
    pub fn subscribe_reports(
        &self,
        handler: impl Fn(&InboundReport) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.reports.add(Arc::new(handler))
    }

    pub fn report_size(&self) -> usize {
        self.shared.report_size.load(Ordering::Relaxed)
    }

    /// Changes the report size used for outbound framing.
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidReportSize`] if `report_size` is below 16.
    pub fn set_report_size(&self, report_size: usize) -> Result<(), TransportError> {
        check_report_size(report_size)?;
        self.shared.report_size.store(report_size, Ordering::Relaxed);
        Ok(())
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.correlator.in_flight()
    }
}

impl Default for TransportSession {
    fn default() -> Self {
        Self::build(DEFAULT_REPORT_SIZE)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn check_report_size(size: usize) -> Result<(), TransportError> {
    if size < MIN_CONFIGURED_REPORT_SIZE {
        return Err(TransportError::InvalidReportSize {
            size,
            minimum: MIN_CONFIGURED_REPORT_SIZE,
        });
    }
    Ok(())
}

/// Runs one subscriber callback on the reader task.  A panic is logged and
/// the reader keeps going.
fn contain_panic<R>(kind: &str, handler: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(handler)) {
        Ok(result) => Some(result),
        Err(_) => {
            warn!("{kind} handler panicked; skipping it for this message");
            None
        }
    }
}

async fn send_message(
    channel: &dyn Channel,
    report_id: u8,
    id: MessageId,
    kind: MessageKind,
    payload: &[u8],
    report_size: usize,
) -> Result<(), TransportError> {
    for frame in fragment(id, kind, payload, report_size)? {
        channel.send_report(report_id, &frame).await?;
    }
    Ok(())
}

async fn read_loop(
    shared: Weak<Shared>,
    channel: Arc<dyn Channel>,
    mut rx: mpsc::UnboundedReceiver<InboundReport>,
) {
    let mut table = ReassemblyTable::new();
    while let Some(report) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        for tap in shared.reports.snapshot() {
            contain_panic("report", || tap(&report));
        }
        if let Ingest::Complete(message) = ingest(&report.data, &mut table) {
            shared
                .dispatch(channel.as_ref(), report.report_id, message)
                .await;
        }
    }
    if !table.is_empty() {
        debug!("reader stopped with {} partial message(s)", table.len());
    }
}
