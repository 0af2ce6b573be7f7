//! # hidwire-core
//!
//! Shared library for hidwire containing the report framing codec, the
//! keyboard command protocol, and the in-memory virtual device used for
//! simulation.
//!
//! This crate has zero dependencies on OS APIs, async runtimes, or HID
//! stacks.  The async transport lives in `hidwire-host`.
//!
//! # Architecture overview (for beginners)
//!
//! A HID endpoint only moves fixed-size opaque *reports* (typically 64
//! bytes).  Keyboard configuration needs more than that: a keymap dump is
//! hundreds of bytes, and the host has to know which reply belongs to which
//! request.  This crate defines:
//!
//! - **`protocol`** – How bytes travel over the channel.  Logical messages
//!   are split into a start frame plus continuation frames
//!   ([`protocol::frame`]), glued back together on receipt
//!   ([`protocol::reassembly`]), and tagged with a one-byte message id
//!   ([`protocol::message_id`]).  On top of that sits the command protocol
//!   ([`protocol::commands`], [`protocol::codec`]): one opcode byte plus a
//!   fixed argument layout per device operation.
//!
//! - **`domain`** – Pure data layouts with no I/O: the flat keymap buffer,
//!   the null-delimited macro buffer, and [`domain::virtual_device::VirtualDevice`],
//!   a software keyboard that answers command payloads byte-for-byte like
//!   real firmware.

pub mod domain;
pub mod protocol;

pub use domain::keymap::{KeyPosition, Keymap, KeymapError, KeymapGeometry};
pub use domain::macros::{parse_macros, serialize_macros};
pub use domain::virtual_device::{VirtualDevice, VirtualDeviceConfig};
pub use protocol::codec::{decode_command, encode_command, CommandError};
pub use protocol::commands::{Command, CommandId, LightingValue};
pub use protocol::frame::{fragment, FrameError, MessageKind};
pub use protocol::message_id::{MessageId, MessageIdAllocator};
pub use protocol::reassembly::{ingest, Ingest, Message, ReassemblyTable};
