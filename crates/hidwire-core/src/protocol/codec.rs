//! Byte codec for command payloads and their replies.
//!
//! Request layouts (multi-byte fields big-endian):
//! ```text
//! GET_KEYCODE          op layer row col
//! SET_KEYCODE          op layer row col code_hi code_lo
//! GET_LIGHTING_VALUE   op prop
//! SET_LIGHTING_VALUE   op prop v1 [v2]
//! *_GET_BUFFER         op off_hi off_lo size
//! *_SET_BUFFER         op off_hi off_lo size bytes...
//! GET_KEYBOARD_VALUE   op id
//! SET_KEYBOARD_VALUE   op id bytes...
//! others               op
//! ```
//!
//! Requests decode strictly ([`decode_command`] returns [`CommandError`]).
//! Replies decode permissively: a short reply yields a documented default
//! instead of an error, the same tolerance real firmware clients apply.

use thiserror::Error;

use crate::domain::keymap::KeyPosition;
use crate::protocol::commands::{Command, CommandId, LightingValue, BUFFER_CHUNK_SIZE};

/// Errors raised while parsing a request payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The payload has no opcode byte.
    #[error("empty command payload")]
    Empty,

    /// The opcode byte is not in the command table.
    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    /// The payload is shorter than the opcode's argument layout.
    #[error("{command:?}: need {needed} bytes, got {got}")]
    Truncated {
        command: CommandId,
        needed: usize,
        got: usize,
    },
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Encodes `command` into its request payload.
///
/// Arguments are not range-checked.  Buffer-write data longer than 255 bytes
/// is truncated to fit the one-byte size field.
///
/// # Examples
///
/// ```rust
/// use hidwire_core::{encode_command, Command, KeyPosition};
///
/// let bytes = encode_command(&Command::SetKeycode {
///     position: KeyPosition::new(0, 1, 2),
///     keycode: 0x0004,
/// });
/// assert_eq!(bytes, vec![0x05, 0, 1, 2, 0x00, 0x04]);
/// ```
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut buf = vec![command.id() as u8];
    match command {
        Command::GetProtocolVersion
        | Command::ResetKeymap
        | Command::MacroGetCount
        | Command::MacroGetBufferSize
        | Command::GetLayerCount => {}
        Command::GetKeyboardValue { value_id } => buf.push(*value_id),
        Command::SetKeyboardValue { value_id, data } => {
            buf.push(*value_id);
            buf.extend_from_slice(data);
        }
        Command::GetKeycode(pos) => push_position(&mut buf, *pos),
        Command::SetKeycode { position, keycode } => {
            push_position(&mut buf, *position);
            buf.extend_from_slice(&keycode.to_be_bytes());
        }
        Command::GetLightingValue { property } => buf.push(*property),
        Command::SetLightingValue { property, value } => {
            buf.push(*property);
            buf.extend(value.to_bytes());
        }
        Command::MacroGetBuffer { offset, size } | Command::GetKeymapBuffer { offset, size } => {
            buf.extend_from_slice(&offset.to_be_bytes());
            buf.push(*size);
        }
        Command::MacroSetBuffer { offset, data } | Command::SetKeymapBuffer { offset, data } => {
            let data = &data[..data.len().min(u8::MAX as usize)];
            buf.extend_from_slice(&offset.to_be_bytes());
            buf.push(data.len() as u8);
            buf.extend_from_slice(data);
        }
    }
    buf
}

/// Parses a request payload back into a [`Command`].
///
/// Bytes past the argument layout are ignored, except for the variable-length
/// keyboard-value data which runs to the end of the payload.
///
/// # Errors
///
/// Returns [`CommandError`] for an empty payload, an unknown opcode, or a
/// payload shorter than the opcode's arguments.
pub fn decode_command(payload: &[u8]) -> Result<Command, CommandError> {
    let (&op, _) = payload.split_first().ok_or(CommandError::Empty)?;
    let id = CommandId::try_from(op).map_err(|_| CommandError::UnknownOpcode(op))?;

    let command = match id {
        CommandId::GetProtocolVersion => Command::GetProtocolVersion,
        CommandId::ResetKeymap => Command::ResetKeymap,
        CommandId::MacroGetCount => Command::MacroGetCount,
        CommandId::MacroGetBufferSize => Command::MacroGetBufferSize,
        CommandId::GetLayerCount => Command::GetLayerCount,
        CommandId::GetKeyboardValue => {
            require_len(payload, 2, id)?;
            Command::GetKeyboardValue {
                value_id: payload[1],
            }
        }
        CommandId::SetKeyboardValue => {
            require_len(payload, 2, id)?;
            Command::SetKeyboardValue {
                value_id: payload[1],
                data: payload[2..].to_vec(),
            }
        }
        CommandId::GetKeycode => {
            require_len(payload, 4, id)?;
            Command::GetKeycode(read_position(payload))
        }
        CommandId::SetKeycode => {
            require_len(payload, 6, id)?;
            Command::SetKeycode {
                position: read_position(payload),
                keycode: u16::from_be_bytes([payload[4], payload[5]]),
            }
        }
        CommandId::GetLightingValue => {
            require_len(payload, 2, id)?;
            Command::GetLightingValue {
                property: payload[1],
            }
        }
        CommandId::SetLightingValue => {
            require_len(payload, 3, id)?;
            Command::SetLightingValue {
                property: payload[1],
                value: LightingValue::from_bytes(&payload[2..]),
            }
        }
        CommandId::MacroGetBuffer | CommandId::GetKeymapBuffer => {
            require_len(payload, 4, id)?;
            let offset = u16::from_be_bytes([payload[1], payload[2]]);
            let size = payload[3];
            if id == CommandId::MacroGetBuffer {
                Command::MacroGetBuffer { offset, size }
            } else {
                Command::GetKeymapBuffer { offset, size }
            }
        }
        CommandId::MacroSetBuffer | CommandId::SetKeymapBuffer => {
            require_len(payload, 4, id)?;
            let offset = u16::from_be_bytes([payload[1], payload[2]]);
            let size = payload[3] as usize;
            require_len(payload, 4 + size, id)?;
            let data = payload[4..4 + size].to_vec();
            if id == CommandId::MacroSetBuffer {
                Command::MacroSetBuffer { offset, data }
            } else {
                Command::SetKeymapBuffer { offset, data }
            }
        }
    };
    Ok(command)
}

// ── Replies ───────────────────────────────────────────────────────────────────

/// Reads a big-endian `u16` reply (`GET_PROTOCOL_VERSION`, `GET_KEYCODE`,
/// `MACRO_GET_BUFFER_SIZE`).  Returns 0 when the reply is shorter than 2 bytes.
pub fn decode_u16_reply(reply: &[u8]) -> u16 {
    match reply {
        [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
        _ => 0,
    }
}

/// Reads a one-byte count reply, returning `fallback` for an empty reply.
pub fn decode_count_reply(reply: &[u8], fallback: u8) -> u8 {
    reply.first().copied().unwrap_or(fallback)
}

/// Reads a `GET_LIGHTING_VALUE` reply; missing bytes default to 0 / absent.
pub fn decode_lighting_reply(reply: &[u8]) -> LightingValue {
    LightingValue::from_bytes(reply)
}

/// Reads a buffer reply, keeping at most the `size` bytes asked for.
pub fn decode_buffer_reply(reply: &[u8], size: usize) -> Vec<u8> {
    reply[..reply.len().min(size)].to_vec()
}

// ── Chunking ──────────────────────────────────────────────────────────────────

/// Splits a buffer write of `data` at `base` into sequential
/// [`BUFFER_CHUNK_SIZE`]-byte `(offset, chunk)` pieces.
pub fn write_chunks(base: u16, data: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    data.chunks(BUFFER_CHUNK_SIZE)
        .enumerate()
        .map(move |(i, chunk)| (base.wrapping_add((i * BUFFER_CHUNK_SIZE) as u16), chunk))
}

/// Splits a read of `len` bytes starting at 0 into sequential
/// `(offset, size)` requests of at most [`BUFFER_CHUNK_SIZE`] bytes.
pub fn read_chunks(len: usize) -> impl Iterator<Item = (u16, u8)> {
    (0..len).step_by(BUFFER_CHUNK_SIZE).map(move |offset| {
        let size = (len - offset).min(BUFFER_CHUNK_SIZE);
        (offset as u16, size as u8)
    })
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn push_position(buf: &mut Vec<u8>, pos: KeyPosition) {
    buf.extend_from_slice(&[pos.layer, pos.row, pos.col]);
}

fn read_position(payload: &[u8]) -> KeyPosition {
    KeyPosition::new(payload[1], payload[2], payload[3])
}

fn require_len(payload: &[u8], needed: usize, command: CommandId) -> Result<(), CommandError> {
    if payload.len() < needed {
        Err(CommandError::Truncated {
            command,
            needed,
            got: payload.len(),
        })
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
