//! hidwire-host library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::device_client::{DeviceClient, DeviceError, RequestTransport};
pub use infrastructure::channel::{Channel, ChannelError, DeviceInfo, InboundReport};
pub use infrastructure::transport::{SessionState, Subscription, TransportError, TransportSession};
