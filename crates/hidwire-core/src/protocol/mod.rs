//! Protocol module containing the frame codec, reassembly, message ids, and
//! the command protocol.

pub mod codec;
pub mod commands;
pub mod frame;
pub mod message_id;
pub mod reassembly;

pub use codec::{
    decode_buffer_reply, decode_command, decode_count_reply, decode_lighting_reply,
    decode_u16_reply, encode_command, read_chunks, write_chunks, CommandError,
};
pub use commands::*;
pub use frame::{fragment, FrameError, MessageKind};
pub use message_id::{MessageId, MessageIdAllocator};
pub use reassembly::{ingest, Discard, Ingest, Message, ReassemblyTable};
