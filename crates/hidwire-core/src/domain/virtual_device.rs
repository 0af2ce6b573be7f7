//! In-memory keyboard that answers command payloads like real firmware.
//!
//! # How simulation works (for beginners)
//!
//! [`VirtualDevice::handle`] takes a complete request payload (opcode plus
//! arguments, already reassembled from frames) and returns the reply
//! payload a physical keyboard would send back.  Nothing here knows about
//! frames, ids, or async code; the host's simulated channel wraps this type
//! and does the framing, so the transport above it cannot tell the
//! difference from hardware.
//!
//! Reply shapes:
//!
//! | Request | Reply |
//! |---|---|
//! | GET-style | the result bytes only |
//! | SET-style | the request payload, echoed |
//! | `RESET_KEYMAP`, unknown or truncated requests | empty |
//!
//! State changes apply immediately and are visible to the next GET.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::keymap::{Keymap, KeymapGeometry};
use crate::protocol::codec::decode_command;
use crate::protocol::commands::{keyboard_value, lighting, Command, LightingValue};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Shape and capacities of the simulated keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDeviceConfig {
    #[serde(default = "default_layers")]
    pub layers: u8,
    #[serde(default = "default_rows")]
    pub rows: u8,
    #[serde(default = "default_cols")]
    pub cols: u8,
    #[serde(default = "default_macro_count")]
    pub macro_count: u8,
    #[serde(default = "default_macro_buffer_size")]
    pub macro_buffer_size: u16,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u16,
}

fn default_layers() -> u8 {
    4
}

fn default_rows() -> u8 {
    6
}

fn default_cols() -> u8 {
    18
}

fn default_macro_count() -> u8 {
    16
}

fn default_macro_buffer_size() -> u16 {
    1024
}

fn default_protocol_version() -> u16 {
    12
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        Self {
            layers: default_layers(),
            rows: default_rows(),
            cols: default_cols(),
            macro_count: default_macro_count(),
            macro_buffer_size: default_macro_buffer_size(),
            protocol_version: default_protocol_version(),
        }
    }
}

impl VirtualDeviceConfig {
    pub fn geometry(&self) -> KeymapGeometry {
        KeymapGeometry::new(self.layers, self.rows, self.cols)
    }
}

// ── Factory keymap ────────────────────────────────────────────────────────────

/// Keycode that falls through to the layer below.
const KC_TRNS: u16 = 0x0001;

/// Base layer of a 60% ANSI board, HID usage ids.  Zero is an unpopulated
/// matrix position.
const BASE_LAYER: [[u16; 14]; 5] = [
    [
        0x29, 0x1E, 0x1F, 0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x2D, 0x2E, 0x2A,
    ],
    [
        0x2B, 0x14, 0x1A, 0x08, 0x15, 0x17, 0x1C, 0x18, 0x0C, 0x12, 0x13, 0x2F, 0x30, 0x31,
    ],
    [
        0x39, 0x04, 0x16, 0x07, 0x09, 0x0A, 0x0B, 0x0D, 0x0E, 0x0F, 0x33, 0x34, 0x00, 0x28,
    ],
    [
        0xE1, 0x00, 0x1D, 0x1B, 0x06, 0x19, 0x05, 0x11, 0x10, 0x36, 0x37, 0x38, 0x00, 0xE5,
    ],
    [
        0xE0, 0xE3, 0xE2, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00, 0x00, 0xE6, 0xE7, 0x65, 0xE4,
    ],
];

fn factory_keymap(geometry: KeymapGeometry) -> Keymap {
    let mut buffer = Vec::with_capacity(geometry.buffer_len());
    for layer in 0..geometry.layers {
        for row in 0..geometry.rows as usize {
            for col in 0..geometry.cols as usize {
                let code = if layer == 0 {
                    BASE_LAYER
                        .get(row)
                        .and_then(|r| r.get(col))
                        .copied()
                        .unwrap_or(0)
                } else {
                    KC_TRNS
                };
                buffer.extend_from_slice(&code.to_be_bytes());
            }
        }
    }
    Keymap::from_buffer(geometry, &buffer)
}

fn factory_lighting() -> HashMap<u8, LightingValue> {
    HashMap::from([
        (lighting::BACKLIGHT_BRIGHTNESS, LightingValue::single(255)),
        (lighting::BACKLIGHT_EFFECT, LightingValue::single(0)),
        (lighting::RGBLIGHT_BRIGHTNESS, LightingValue::single(128)),
        (lighting::RGBLIGHT_EFFECT, LightingValue::single(1)),
        (lighting::RGBLIGHT_EFFECT_SPEED, LightingValue::single(128)),
        (lighting::RGBLIGHT_COLOR, LightingValue::pair(0, 255)),
    ])
}

// ── Device ────────────────────────────────────────────────────────────────────

/// Simulated keyboard state plus its request handler.
#[derive(Debug)]
pub struct VirtualDevice {
    config: VirtualDeviceConfig,
    keymap: Keymap,
    macro_buffer: Vec<u8>,
    lighting: HashMap<u8, LightingValue>,
    keyboard_values: HashMap<u8, u32>,
    started: Instant,
}

impl VirtualDevice {
    /// Creates a device with the factory keymap, cleared macros, and default
    /// lighting.
    pub fn new(config: VirtualDeviceConfig) -> Self {
        let keymap = factory_keymap(config.geometry());
        let macro_buffer = vec![0; config.macro_buffer_size as usize];
        let keyboard_values = HashMap::from([
            (keyboard_value::LAYOUT_OPTIONS, 0),
            (keyboard_value::SWITCH_MATRIX_STATE, 0),
            (keyboard_value::FIRMWARE_VERSION, 0x0001_0000),
            (keyboard_value::DEVICE_INDICATION, 0),
        ]);
        Self {
            config,
            keymap,
            macro_buffer,
            lighting: factory_lighting(),
            keyboard_values,
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &VirtualDeviceConfig {
        &self.config
    }

    /// Current keymap state.
    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    /// Raw macro storage.
    pub fn macro_buffer(&self) -> &[u8] {
        &self.macro_buffer
    }

    /// Answers one request payload and returns the reply payload.
    pub fn handle(&mut self, request: &[u8]) -> Vec<u8> {
        let command = match decode_command(request) {
            Ok(command) => command,
            Err(e) => {
                debug!("virtual device ignoring request: {e}");
                return Vec::new();
            }
        };
        if command.is_mutation() {
            debug!("virtual device applying {:?}", command.id());
        }

        match command {
            Command::GetProtocolVersion => self.config.protocol_version.to_be_bytes().to_vec(),
            Command::GetKeyboardValue { value_id } => {
                self.keyboard_value(value_id).to_be_bytes().to_vec()
            }
            Command::SetKeyboardValue { value_id, data } => {
                let mut word = [0u8; 4];
                let n = data.len().min(4);
                word[..n].copy_from_slice(&data[..n]);
                self.keyboard_values.insert(value_id, u32::from_be_bytes(word));
                request.to_vec()
            }
            Command::GetKeycode(pos) => self.keymap.get(pos).unwrap_or(0).to_be_bytes().to_vec(),
            Command::SetKeycode { position, keycode } => {
                if let Err(e) = self.keymap.set(position, keycode) {
                    debug!("virtual device ignoring SET_KEYCODE: {e}");
                }
                request.to_vec()
            }
            Command::ResetKeymap => {
                self.keymap = factory_keymap(self.config.geometry());
                Vec::new()
            }
            Command::GetLightingValue { property } => {
                let value = self.lighting.get(&property).copied().unwrap_or_default();
                let mut bytes = value.to_bytes();
                bytes.resize(lighting::value_width(property), 0);
                bytes
            }
            Command::SetLightingValue { property, value } => {
                self.lighting.insert(property, value);
                request.to_vec()
            }
            Command::MacroGetCount => vec![self.config.macro_count],
            Command::MacroGetBufferSize => self.config.macro_buffer_size.to_be_bytes().to_vec(),
            Command::MacroGetBuffer { offset, size } => {
                read_window(&self.macro_buffer, offset as usize, size as usize)
            }
            Command::MacroSetBuffer { offset, data } => {
                write_window(&mut self.macro_buffer, offset as usize, &data);
                request.to_vec()
            }
            Command::GetLayerCount => vec![self.config.layers],
            Command::GetKeymapBuffer { offset, size } => {
                read_window(&self.keymap.to_buffer(), offset as usize, size as usize)
            }
            Command::SetKeymapBuffer { offset, data } => {
                let mut buffer = self.keymap.to_buffer();
                write_window(&mut buffer, offset as usize, &data);
                self.keymap = Keymap::from_buffer(self.config.geometry(), &buffer);
                request.to_vec()
            }
        }
    }

    fn keyboard_value(&self, value_id: u8) -> u32 {
        if value_id == keyboard_value::UPTIME {
            return u32::try_from(self.started.elapsed().as_millis()).unwrap_or(u32::MAX);
        }
        self.keyboard_values.get(&value_id).copied().unwrap_or(0)
    }
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new(VirtualDeviceConfig::default())
    }
}

/// Returns exactly `size` bytes starting at `offset`; bytes past the end of
/// `buffer` read as 0.
fn read_window(buffer: &[u8], offset: usize, size: usize) -> Vec<u8> {
    let mut out: Vec<u8> = buffer.iter().skip(offset).take(size).copied().collect();
    out.resize(size, 0);
    out
}

/// Copies `data` into `buffer` at `offset`, dropping bytes that fall past
/// the end.
fn write_window(buffer: &mut [u8], offset: usize, data: &[u8]) {
    if offset >= buffer.len() {
        debug!("buffer write at {offset} is past the {}-byte buffer", buffer.len());
        return;
    }
    let n = data.len().min(buffer.len() - offset);
    buffer[offset..offset + n].copy_from_slice(&data[..n]);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::keymap::KeyPosition;
    use crate::protocol::codec::{decode_u16_reply, encode_command};

    fn ask(device: &mut VirtualDevice, command: Command) -> Vec<u8> {
        device.handle(&encode_command(&command))
    }

    #[test]
    fn test_set_keycode_is_visible_to_get_keycode() {
        // Arrange
        let mut device = VirtualDevice::default();
        let pos = KeyPosition::new(0, 1, 2);

        // Act
        ask(
            &mut device,
            Command::SetKeycode {
                position: pos,
                keycode: 0x0004,
            },
        );
        let reply = ask(&mut device, Command::GetKeycode(pos));

        // Assert
        assert_eq!(reply, vec![0x00, 0x04]);
    }

    #[test]
    fn test_set_replies_echo_the_request() {
        let mut device = VirtualDevice::default();
        let request = encode_command(&Command::SetLightingValue {
            property: lighting::RGBLIGHT_COLOR,
            value: LightingValue::pair(10, 20),
        });

        let reply = device.handle(&request);

        assert_eq!(reply, request);
    }

    #[test]
    fn test_default_counts_and_sizes() {
        let mut device = VirtualDevice::default();

        assert_eq!(ask(&mut device, Command::GetLayerCount), vec![4]);
        assert_eq!(ask(&mut device, Command::MacroGetCount), vec![16]);
        assert_eq!(
            decode_u16_reply(&ask(&mut device, Command::MacroGetBufferSize)),
            1024
        );
        assert_eq!(
            decode_u16_reply(&ask(&mut device, Command::GetProtocolVersion)),
            12
        );
    }

    #[test]
    fn test_lighting_reply_width_follows_property() {
        let mut device = VirtualDevice::default();

        let color = ask(
            &mut device,
            Command::GetLightingValue {
                property: lighting::RGBLIGHT_COLOR,
            },
        );
        let brightness = ask(
            &mut device,
            Command::GetLightingValue {
                property: lighting::RGBLIGHT_BRIGHTNESS,
            },
        );

        assert_eq!(color, vec![0, 255]);
        assert_eq!(brightness, vec![128]);
    }

    #[test]
    fn test_unknown_and_truncated_requests_reply_empty() {
        let mut device = VirtualDevice::default();

        assert!(device.handle(&[0x42, 1, 2]).is_empty());
        assert!(device.handle(&[]).is_empty());
        assert!(device.handle(&[0x04, 0]).is_empty());
    }

    #[test]
    fn test_reset_keymap_restores_factory_layout() {
        // Arrange
        let mut device = VirtualDevice::default();
        let pos = KeyPosition::new(0, 0, 0);
        let factory = device.keymap().get(pos);
        ask(
            &mut device,
            Command::SetKeycode {
                position: pos,
                keycode: 0x1234,
            },
        );

        // Act
        let reply = ask(&mut device, Command::ResetKeymap);

        // Assert
        assert!(reply.is_empty());
        assert_eq!(device.keymap().get(pos), factory);
        assert_eq!(factory, Some(0x29));
    }

    #[test]
    fn test_keymap_buffer_write_then_read() {
        // Arrange
        let mut device = VirtualDevice::default();

        // Act – overwrite cell (0,0,1) through the raw buffer
        ask(
            &mut device,
            Command::SetKeymapBuffer {
                offset: 2,
                data: vec![0xAB, 0xCD],
            },
        );
        let reply = ask(&mut device, Command::GetKeymapBuffer { offset: 0, size: 4 });

        // Assert
        assert_eq!(reply, vec![0x00, 0x29, 0xAB, 0xCD]);
        assert_eq!(device.keymap().get(KeyPosition::new(0, 0, 1)), Some(0xABCD));
    }

    #[test]
    fn test_macro_write_is_clamped_to_buffer_end() {
        // Arrange – 8-byte macro buffer
        let mut device = VirtualDevice::new(VirtualDeviceConfig {
            macro_buffer_size: 8,
            ..VirtualDeviceConfig::default()
        });

        // Act
        ask(
            &mut device,
            Command::MacroSetBuffer {
                offset: 6,
                data: vec![1, 2, 3, 4],
            },
        );
        let read = ask(&mut device, Command::MacroGetBuffer { offset: 4, size: 6 });

        // Assert – bytes past the end were dropped on write and read back as 0
        assert_eq!(device.macro_buffer(), &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(read, vec![0, 0, 1, 2, 0, 0]);
    }

    #[test]
    fn test_keyboard_value_set_then_get() {
        let mut device = VirtualDevice::default();

        ask(
            &mut device,
            Command::SetKeyboardValue {
                value_id: keyboard_value::LAYOUT_OPTIONS,
                data: vec![0, 0, 0, 3],
            },
        );
        let reply = ask(
            &mut device,
            Command::GetKeyboardValue {
                value_id: keyboard_value::LAYOUT_OPTIONS,
            },
        );

        assert_eq!(reply, vec![0, 0, 0, 3]);
    }

    #[test]
    fn test_upper_layers_default_to_transparent() {
        let device = VirtualDevice::default();
        assert_eq!(device.keymap().get(KeyPosition::new(1, 0, 0)), Some(KC_TRNS));
        assert_eq!(device.keymap().get(KeyPosition::new(0, 5, 17)), Some(0));
    }
}
