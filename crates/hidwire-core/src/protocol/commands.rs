//! Keyboard command protocol types.
//!
//! Every request payload starts with a one-byte opcode ([`CommandId`])
//! followed by a fixed argument layout.  All multi-byte command fields are
//! big-endian.  See [`crate::protocol::codec`] for the byte layouts.

use serde::{Deserialize, Serialize};

use crate::domain::keymap::KeyPosition;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Largest chunk of macro or keymap data moved by one buffer request.
///
/// Chosen below the single-report capacity to leave room for the frame and
/// command headers.
pub const BUFFER_CHUNK_SIZE: usize = 28;

/// Layer count assumed when a `GET_LAYER_COUNT` reply is too short.
pub const FALLBACK_LAYER_COUNT: u8 = 4;

/// Lighting property ids understood by `GET_LIGHTING_VALUE` / `SET_LIGHTING_VALUE`.
pub mod lighting {
    pub const BACKLIGHT_BRIGHTNESS: u8 = 0x09;
    pub const BACKLIGHT_EFFECT: u8 = 0x0A;
    pub const RGBLIGHT_BRIGHTNESS: u8 = 0x80;
    pub const RGBLIGHT_EFFECT: u8 = 0x81;
    pub const RGBLIGHT_EFFECT_SPEED: u8 = 0x82;
    /// Two-byte property: hue, saturation.
    pub const RGBLIGHT_COLOR: u8 = 0x83;

    /// Returns how many value bytes property `id` carries.
    pub fn value_width(id: u8) -> usize {
        if id == RGBLIGHT_COLOR {
            2
        } else {
            1
        }
    }
}

/// Keyboard value ids understood by `GET_KEYBOARD_VALUE` / `SET_KEYBOARD_VALUE`.
pub mod keyboard_value {
    pub const UPTIME: u8 = 0x01;
    pub const LAYOUT_OPTIONS: u8 = 0x02;
    pub const SWITCH_MATRIX_STATE: u8 = 0x03;
    pub const FIRMWARE_VERSION: u8 = 0x04;
    pub const DEVICE_INDICATION: u8 = 0x05;
}

// ── Opcodes ───────────────────────────────────────────────────────────────────

/// Opcode byte at the start of every command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandId {
    GetProtocolVersion = 0x01,
    GetKeyboardValue = 0x02,
    SetKeyboardValue = 0x03,
    GetKeycode = 0x04,
    SetKeycode = 0x05,
    ResetKeymap = 0x06,
    GetLightingValue = 0x07,
    SetLightingValue = 0x08,
    MacroGetCount = 0x0C,
    MacroGetBufferSize = 0x0D,
    MacroGetBuffer = 0x0E,
    MacroSetBuffer = 0x0F,
    GetLayerCount = 0x11,
    GetKeymapBuffer = 0x12,
    SetKeymapBuffer = 0x13,
}

impl TryFrom<u8> for CommandId {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(CommandId::GetProtocolVersion),
            0x02 => Ok(CommandId::GetKeyboardValue),
            0x03 => Ok(CommandId::SetKeyboardValue),
            0x04 => Ok(CommandId::GetKeycode),
            0x05 => Ok(CommandId::SetKeycode),
            0x06 => Ok(CommandId::ResetKeymap),
            0x07 => Ok(CommandId::GetLightingValue),
            0x08 => Ok(CommandId::SetLightingValue),
            0x0C => Ok(CommandId::MacroGetCount),
            0x0D => Ok(CommandId::MacroGetBufferSize),
            0x0E => Ok(CommandId::MacroGetBuffer),
            0x0F => Ok(CommandId::MacroSetBuffer),
            0x11 => Ok(CommandId::GetLayerCount),
            0x12 => Ok(CommandId::GetKeymapBuffer),
            0x13 => Ok(CommandId::SetKeymapBuffer),
            _ => Err(()),
        }
    }
}

// ── Argument types ────────────────────────────────────────────────────────────

/// One or two lighting value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LightingValue {
    pub primary: u8,
    /// Present only for two-byte properties such as the RGB colour.
    pub secondary: Option<u8>,
}

impl LightingValue {
    /// A single-byte value.
    pub fn single(value: u8) -> Self {
        Self {
            primary: value,
            secondary: None,
        }
    }

    /// A two-byte value.
    pub fn pair(first: u8, second: u8) -> Self {
        Self {
            primary: first,
            secondary: Some(second),
        }
    }

    /// Builds a value from reply bytes; missing bytes default to 0 / absent.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            primary: bytes.first().copied().unwrap_or(0),
            secondary: bytes.get(1).copied(),
        }
    }

    /// Returns the value as it travels on the wire.
    pub fn to_bytes(self) -> Vec<u8> {
        let mut out = vec![self.primary];
        out.extend(self.secondary);
        out
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// A device operation with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    GetProtocolVersion,
    GetKeyboardValue { value_id: u8 },
    SetKeyboardValue { value_id: u8, data: Vec<u8> },
    GetKeycode(KeyPosition),
    SetKeycode { position: KeyPosition, keycode: u16 },
    ResetKeymap,
    GetLightingValue { property: u8 },
    SetLightingValue { property: u8, value: LightingValue },
    MacroGetCount,
    MacroGetBufferSize,
    MacroGetBuffer { offset: u16, size: u8 },
    MacroSetBuffer { offset: u16, data: Vec<u8> },
    GetLayerCount,
    GetKeymapBuffer { offset: u16, size: u8 },
    SetKeymapBuffer { offset: u16, data: Vec<u8> },
}

impl Command {
    /// Returns the opcode of this command.
    pub fn id(&self) -> CommandId {
        match self {
            Command::GetProtocolVersion => CommandId::GetProtocolVersion,
            Command::GetKeyboardValue { .. } => CommandId::GetKeyboardValue,
            Command::SetKeyboardValue { .. } => CommandId::SetKeyboardValue,
            Command::GetKeycode(_) => CommandId::GetKeycode,
            Command::SetKeycode { .. } => CommandId::SetKeycode,
            Command::ResetKeymap => CommandId::ResetKeymap,
            Command::GetLightingValue { .. } => CommandId::GetLightingValue,
            Command::SetLightingValue { .. } => CommandId::SetLightingValue,
            Command::MacroGetCount => CommandId::MacroGetCount,
            Command::MacroGetBufferSize => CommandId::MacroGetBufferSize,
            Command::MacroGetBuffer { .. } => CommandId::MacroGetBuffer,
            Command::MacroSetBuffer { .. } => CommandId::MacroSetBuffer,
            Command::GetLayerCount => CommandId::GetLayerCount,
            Command::GetKeymapBuffer { .. } => CommandId::GetKeymapBuffer,
            Command::SetKeymapBuffer { .. } => CommandId::SetKeymapBuffer,
        }
    }

    /// Returns `true` for commands that change device state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.id(),
            CommandId::SetKeyboardValue
                | CommandId::SetKeycode
                | CommandId::ResetKeymap
                | CommandId::SetLightingValue
                | CommandId::MacroSetBuffer
                | CommandId::SetKeymapBuffer
        )
    }
}
