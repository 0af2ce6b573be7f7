//! Simulated keyboard channel.
//!
//! Plays the device side of the wire: outbound reports are reassembled,
//! complete requests are answered by a [`VirtualDevice`], and the replies
//! are fragmented back into inbound reports with the request's id.  The
//! transport above cannot tell this apart from hardware.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex, PoisonError,
};

use async_trait::async_trait;
use hidwire_core::protocol::{
    fragment, ingest, Ingest, MessageId, MessageIdAllocator, MessageKind, ReassemblyTable,
};
use hidwire_core::{VirtualDevice, VirtualDeviceConfig};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Channel, ChannelError, DeviceInfo, InboundReport};

/// Vendor id reported by the simulated keyboard.
pub const SIMULATED_VENDOR_ID: u16 = 0x3434;
/// Product id reported by the simulated keyboard.
pub const SIMULATED_PRODUCT_ID: u16 = 0x0350;
/// Product name reported by the simulated keyboard.
pub const SIMULATED_PRODUCT_NAME: &str = "Demo Keychron V5 ANSI";

/// A [`Channel`] backed by an in-memory [`VirtualDevice`].
pub struct SimulatedChannel {
    device: Mutex<VirtualDevice>,
    inbound: Mutex<Option<mpsc::UnboundedSender<InboundReport>>>,
    /// Device-side reassembly of host-to-device messages.
    reassembly: Mutex<ReassemblyTable>,
    report_size: AtomicUsize,
    event_ids: MessageIdAllocator,
}

impl SimulatedChannel {
    /// Creates a closed channel around a fresh virtual device.
    pub fn new(config: VirtualDeviceConfig, report_size: usize) -> Self {
        Self {
            device: Mutex::new(VirtualDevice::new(config)),
            inbound: Mutex::new(None),
            reassembly: Mutex::new(ReassemblyTable::new()),
            report_size: AtomicUsize::new(report_size),
            event_ids: MessageIdAllocator::new(),
        }
    }

    /// Changes the report size used for device-to-host frames.
    ///
    /// A HID endpoint has one report size for both directions; change this
    /// together with `TransportSession::set_report_size`.
    pub fn set_report_size(&self, report_size: usize) {
        self.report_size.store(report_size, Ordering::Relaxed);
    }

    /// Runs `f` against the current device state.
    pub fn with_device<R>(&self, f: impl FnOnce(&VirtualDevice) -> R) -> R {
        f(&self.device.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Sends an unsolicited event from the device to the host.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotOpen`] when the channel is closed, or
    /// [`ChannelError::Send`] when the payload cannot be framed.
    pub fn emit_event(&self, report_id: u8, payload: &[u8]) -> Result<MessageId, ChannelError> {
        let id = self.event_ids.next();
        self.deliver(report_id, id, MessageKind::Event, payload)?;
        Ok(id)
    }

    fn deliver(
        &self,
        report_id: u8,
        id: MessageId,
        kind: MessageKind,
        payload: &[u8],
    ) -> Result<(), ChannelError> {
        let frames = fragment(id, kind, payload, self.report_size.load(Ordering::Relaxed))
            .map_err(|e| ChannelError::Send(e.to_string()))?;
        let guard = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(ChannelError::NotOpen)?;
        for data in frames {
            sender
                .send(InboundReport { report_id, data })
                .map_err(|_| ChannelError::NotOpen)?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Default for SimulatedChannel {
    fn default() -> Self {
        Self::new(
            VirtualDeviceConfig::default(),
            hidwire_core::protocol::frame::DEFAULT_REPORT_SIZE,
        )
    }
}

#[async_trait]
impl Channel for SimulatedChannel {
    async fn open(&self) -> Result<mpsc::UnboundedReceiver<InboundReport>, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self.reassembly
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("simulated device \"{SIMULATED_PRODUCT_NAME}\" connected");
        Ok(rx)
    }

    async fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }

        let outcome = ingest(
            data,
            &mut self.reassembly.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let message = match outcome {
            Ingest::Complete(message) => message,
            Ingest::Pending | Ingest::Discarded(_) => return Ok(()),
        };

        if message.kind != MessageKind::Request {
            debug!(
                "simulated device ignoring {:?} message {}",
                message.kind, message.id
            );
            return Ok(());
        }

        let reply = self
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle(&message.payload);
        self.deliver(report_id, message.id, MessageKind::Response, &reply)
    }

    async fn close(&self) {
        if self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!("simulated device disconnected");
        }
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            vendor_id: SIMULATED_VENDOR_ID,
            product_id: SIMULATED_PRODUCT_ID,
            product_name: SIMULATED_PRODUCT_NAME.to_string(),
        }
    }
}
