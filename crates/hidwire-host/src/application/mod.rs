//! Application layer for the hidwire host.
//!
//! # What is the "application" layer? (for beginners)
//!
//! The *application* layer sits between the protocol types in
//! `hidwire-core` and the infrastructure (channels, transport, config).
//!
//! Code in this layer:
//!
//! - **Turns user goals into protocol exchanges** (e.g., "read the whole
//!   keymap" becomes a layer-count query followed by chunked buffer reads).
//! - **Depends on abstractions**: [`device_client::RequestTransport`] rather
//!   than a concrete session, so it is tested against a mock.
//! - **Contains no framing and no report I/O**.
//!
//! # Sub-modules
//!
//! - **`device_client`** – Typed keyboard operations: protocol version,
//!   keycodes, lighting, macros, and the keymap buffer.

pub mod device_client;
