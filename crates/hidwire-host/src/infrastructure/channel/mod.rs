//! Report channel capability.
//!
//! A [`Channel`] is an open duplex connection to exactly one device that
//! moves opaque reports of at most the device's report size.  The transport
//! session owns it exclusively while open.
//!
//! # Backends
//!
//! - [`simulated::SimulatedChannel`] answers requests from an in-memory
//!   [`VirtualDevice`](hidwire_core::VirtualDevice), byte-for-byte like
//!   hardware.  It is selected at connect time; nothing above the channel
//!   knows which backend is in use.
//! - [`mock::MockChannel`] records outbound reports and lets tests inject
//!   inbound ones.
//!
//! Device enumeration and OS permission prompts happen before a channel
//! exists and are outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mock;
pub mod simulated;

/// One report received from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReport {
    /// HID report id the data arrived on.
    pub report_id: u8,
    /// Report body; may be padded past the frame it carries.
    pub data: Vec<u8>,
}

/// Identity of the device behind a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_name: String,
}

/// Error type for channel operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel has not been opened, or has been closed.
    #[error("channel is not open")]
    NotOpen,

    /// The device rejected or failed to accept a report.
    #[error("failed to send report: {0}")]
    Send(String),
}

/// Trait abstracting a report-oriented device connection.
///
/// The production backend talks to a HID endpoint; tests and the demo CLI
/// use [`simulated::SimulatedChannel`] or [`mock::MockChannel`].
#[async_trait]
pub trait Channel: Send + Sync {
    /// Opens the connection and returns a receiver for inbound reports.
    ///
    /// The receiver yields `None` once the channel is closed.
    async fn open(&self) -> Result<mpsc::UnboundedReceiver<InboundReport>, ChannelError>;

    /// Sends one report.  `data` is at most one report long.
    async fn send_report(&self, report_id: u8, data: &[u8]) -> Result<(), ChannelError>;

    /// Closes the connection.  Safe to call when already closed.
    async fn close(&self);

    /// Returns the identity of the connected device.
    fn info(&self) -> DeviceInfo;
}
