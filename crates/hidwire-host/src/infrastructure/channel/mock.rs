//! In-memory channel for tests.
//!
//! Records every outbound report and lets tests inject inbound reports
//! without a device.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, PoisonError,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use super::{Channel, ChannelError, DeviceInfo, InboundReport};

/// A [`Channel`] whose far end is driven by the test.
pub struct MockChannel {
    inbound: Mutex<Option<mpsc::UnboundedSender<InboundReport>>>,
    sent: Mutex<Vec<(u8, Vec<u8>)>>,
    sent_notify: Notify,
    fail_sends: AtomicBool,
    pad_to: Option<usize>,
}

impl MockChannel {
    /// Creates a closed mock channel.
    pub fn new() -> Self {
        Self {
            inbound: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
            fail_sends: AtomicBool::new(false),
            pad_to: None,
        }
    }

    /// Creates a mock channel that zero-pads injected reports to
    /// `report_size` bytes, as a HID endpoint does.
    pub fn padded(report_size: usize) -> Self {
        Self {
            pad_to: Some(report_size),
            ..Self::new()
        }
    }

    /// Delivers a report to the session, as if received from the device.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotOpen`] before `open()` or after `close()`.
    pub fn inject(&self, report_id: u8, data: &[u8]) -> Result<(), ChannelError> {
        let mut data = data.to_vec();
        if let Some(size) = self.pad_to {
            if data.len() < size {
                data.resize(size, 0);
            }
        }
        let guard = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(ChannelError::NotOpen)?;
        sender
            .send(InboundReport { report_id, data })
            .map_err(|_| ChannelError::NotOpen)
    }

    /// Returns every report sent so far as `(report_id, data)`.
    pub fn sent(&self) -> Vec<(u8, Vec<u8>)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits until at least `count` reports have been sent, then returns them.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<(u8, Vec<u8>)> {
        loop {
            let notified = self.sent_notify.notified();
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            notified.await;
        }
    }

    /// Makes every later `send_report` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Returns `true` while the channel is open.
    pub fn is_open(&self) -> bool {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn open(&self) -> Result<mpsc::UnboundedReceiver<InboundReport>, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(rx)
    }

    async fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen);
        }
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(ChannelError::Send("injected failure".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((report_id, data.to_vec()));
        self.sent_notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) {
        // Dropping the sender ends the session's reader.
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            vendor_id: 0xFEED,
            product_id: 0x0001,
            product_name: "Mock Channel".to_string(),
        }
    }
}
