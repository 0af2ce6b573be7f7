//! DeviceClient: typed keyboard operations over a request transport.
//!
//! This is the whole device-access surface for a UI.  Each method encodes a
//! [`Command`], sends it as one request, and decodes the reply.  Decoding is
//! permissive: a short reply produces a documented default instead of an
//! error.
//!
//! Macro and keymap buffers are moved in sequential 28-byte requests at
//! increasing offsets.  Each chunk is awaited before the next is sent; the
//! device is not assumed to accept concurrent partial writes.

use std::time::Duration;

use async_trait::async_trait;
use hidwire_core::protocol::codec::{
    decode_buffer_reply, decode_count_reply, decode_lighting_reply, decode_u16_reply, read_chunks,
    write_chunks,
};
use hidwire_core::protocol::commands::FALLBACK_LAYER_COUNT;
use hidwire_core::{
    encode_command, parse_macros, serialize_macros, Command, CommandId, KeyPosition, Keymap,
    KeymapGeometry, LightingValue,
};
use thiserror::Error;
use tracing::debug;

use crate::infrastructure::transport::session::{DEFAULT_QUERY_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use crate::infrastructure::transport::{TransportError, TransportSession};

/// Highest byte offset a buffer command can address, plus one.
const BUFFER_ADDRESS_SPACE: usize = u16::MAX as usize + 1;

/// Error type for device operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A write would not fit the device buffer.  Nothing was written.
    #[error("write of {needed} bytes exceeds the {capacity}-byte device buffer")]
    BufferOverflow { needed: usize, capacity: usize },

    /// More macros were given than the device has slots for.  Nothing was
    /// written.
    #[error("{given} macros given but the device has {slots} slots")]
    TooManyMacros { given: usize, slots: usize },
}

/// Trait for sending one request and receiving its response payload.
///
/// [`TransportSession`] implements it; unit tests use the generated mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestTransport: Send + Sync {
    async fn request(
        &self,
        report_id: u8,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;
}

#[async_trait]
impl RequestTransport for TransportSession {
    async fn request(
        &self,
        report_id: u8,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.send_request(report_id, &payload, timeout).await
    }
}

/// Typed keyboard operations.
pub struct DeviceClient<T> {
    transport: T,
    report_id: u8,
    request_timeout: Duration,
    query_timeout: Duration,
}

impl<T: RequestTransport> DeviceClient<T> {
    /// Creates a client on report id 0 with the default timeouts.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            report_id: 0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Sends every request on `report_id`.
    pub fn with_report_id(mut self, report_id: u8) -> Self {
        self.report_id = report_id;
        self
    }

    /// Overrides the deadlines for exchanges and for light queries.
    pub fn with_timeouts(mut self, request: Duration, query: Duration) -> Self {
        self.request_timeout = request;
        self.query_timeout = query;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // ── Protocol ──────────────────────────────────────────────────────────────

    /// Protocol version; 0 if the reply is short.
    pub async fn protocol_version(&self) -> Result<u16, DeviceError> {
        let reply = self.exchange(&Command::GetProtocolVersion).await?;
        Ok(decode_u16_reply(&reply))
    }

    /// Raw bytes of keyboard value `value_id`.
    pub async fn keyboard_value(&self, value_id: u8) -> Result<Vec<u8>, DeviceError> {
        self.exchange(&Command::GetKeyboardValue { value_id }).await
    }

    pub async fn set_keyboard_value(&self, value_id: u8, data: &[u8]) -> Result<(), DeviceError> {
        self.exchange_echo(&Command::SetKeyboardValue {
            value_id,
            data: data.to_vec(),
        })
        .await
    }

    // ── Keymap ────────────────────────────────────────────────────────────────

    /// Keycode at `position`; 0 if the reply is short.
    pub async fn keycode(&self, position: KeyPosition) -> Result<u16, DeviceError> {
        let reply = self.exchange(&Command::GetKeycode(position)).await?;
        Ok(decode_u16_reply(&reply))
    }

    pub async fn set_keycode(
        &self,
        position: KeyPosition,
        keycode: u16,
    ) -> Result<(), DeviceError> {
        self.exchange_echo(&Command::SetKeycode { position, keycode })
            .await
    }

    /// Restores the device's factory keymap.
    pub async fn reset_keymap(&self) -> Result<(), DeviceError> {
        self.exchange(&Command::ResetKeymap).await.map(drop)
    }

    /// Number of keymap layers; 4 if the reply is empty.
    pub async fn layer_count(&self) -> Result<u8, DeviceError> {
        let reply = self.exchange(&Command::GetLayerCount).await?;
        Ok(decode_count_reply(&reply, FALLBACK_LAYER_COUNT))
    }

    /// Reads the first `len` bytes of the keymap buffer in chunks.
    pub async fn read_keymap_buffer(&self, len: usize) -> Result<Vec<u8>, DeviceError> {
        check_addressable(len)?;
        let mut buffer = Vec::with_capacity(len);
        for (offset, size) in read_chunks(len) {
            let reply = self
                .exchange(&Command::GetKeymapBuffer { offset, size })
                .await?;
            buffer.extend(padded_chunk(&reply, size));
        }
        Ok(buffer)
    }

    /// Writes `data` into the keymap buffer at `offset` in chunks.
    pub async fn write_keymap_buffer(&self, offset: u16, data: &[u8]) -> Result<(), DeviceError> {
        check_addressable(offset as usize + data.len())?;
        for (offset, chunk) in write_chunks(offset, data) {
            self.exchange_echo(&Command::SetKeymapBuffer {
                offset,
                data: chunk.to_vec(),
            })
            .await?;
        }
        Ok(())
    }

    /// Reads the whole keymap for a `rows` × `cols` matrix.
    ///
    /// The layer count is queried from the device first.
    pub async fn read_keymap(&self, rows: u8, cols: u8) -> Result<Keymap, DeviceError> {
        let layers = self.layer_count().await?;
        let geometry = KeymapGeometry::new(layers, rows, cols);
        let buffer = self.read_keymap_buffer(geometry.buffer_len()).await?;
        Ok(Keymap::from_buffer(geometry, &buffer))
    }

    // ── Lighting ──────────────────────────────────────────────────────────────

    /// Value of lighting `property`; missing bytes read as 0 / absent.
    pub async fn lighting_value(&self, property: u8) -> Result<LightingValue, DeviceError> {
        let reply = self
            .exchange(&Command::GetLightingValue { property })
            .await?;
        Ok(decode_lighting_reply(&reply))
    }

    pub async fn set_lighting_value(
        &self,
        property: u8,
        value: LightingValue,
    ) -> Result<(), DeviceError> {
        self.exchange_echo(&Command::SetLightingValue { property, value })
            .await
    }

    // ── Macros ────────────────────────────────────────────────────────────────

    /// Number of macro slots; 0 if the reply is empty.
    pub async fn macro_count(&self) -> Result<u8, DeviceError> {
        let reply = self.exchange(&Command::MacroGetCount).await?;
        Ok(decode_count_reply(&reply, 0))
    }

    /// Size of the macro buffer in bytes; 0 if the reply is short.
    pub async fn macro_buffer_size(&self) -> Result<u16, DeviceError> {
        let reply = self.exchange(&Command::MacroGetBufferSize).await?;
        Ok(decode_u16_reply(&reply))
    }

    /// Reads the whole macro buffer in chunks.
    pub async fn read_macro_buffer(&self) -> Result<Vec<u8>, DeviceError> {
        let len = self.macro_buffer_size().await? as usize;
        let mut buffer = Vec::with_capacity(len);
        for (offset, size) in read_chunks(len) {
            let reply = self.exchange(&Command::MacroGetBuffer { offset, size }).await?;
            buffer.extend(padded_chunk(&reply, size));
        }
        Ok(buffer)
    }

    /// Writes `data` at the start of the macro buffer in chunks.
    ///
    /// # Errors
    ///
    /// [`DeviceError::BufferOverflow`] if `data` is larger than the device
    /// buffer.  The check happens before any chunk is sent.
    pub async fn write_macro_buffer(&self, data: &[u8]) -> Result<(), DeviceError> {
        let capacity = self.macro_buffer_size().await? as usize;
        if data.len() > capacity {
            return Err(DeviceError::BufferOverflow {
                needed: data.len(),
                capacity,
            });
        }
        for (offset, chunk) in write_chunks(0, data) {
            self.exchange_echo(&Command::MacroSetBuffer {
                offset,
                data: chunk.to_vec(),
            })
            .await?;
        }
        Ok(())
    }

    /// Reads every macro slot.
    pub async fn read_macros(&self) -> Result<Vec<Vec<u8>>, DeviceError> {
        let count = self.macro_count().await? as usize;
        let buffer = self.read_macro_buffer().await?;
        Ok(parse_macros(&buffer, count))
    }

    /// Replaces every macro slot.  Slots past `macros.len()` become empty.
    ///
    /// # Errors
    ///
    /// [`DeviceError::TooManyMacros`] or [`DeviceError::BufferOverflow`],
    /// both raised before anything is written.
    pub async fn write_macros<M: AsRef<[u8]> + Sync>(
        &self,
        macros: &[M],
    ) -> Result<(), DeviceError> {
        let slots = self.macro_count().await? as usize;
        if macros.len() > slots {
            return Err(DeviceError::TooManyMacros {
                given: macros.len(),
                slots,
            });
        }
        let mut all: Vec<&[u8]> = macros.iter().map(AsRef::as_ref).collect();
        all.resize(slots, &[]);
        self.write_macro_buffer(&serialize_macros(&all)).await
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    async fn exchange(&self, command: &Command) -> Result<Vec<u8>, DeviceError> {
        let timeout = if is_light_query(command.id()) {
            self.query_timeout
        } else {
            self.request_timeout
        };
        let reply = self
            .transport
            .request(self.report_id, encode_command(command), timeout)
            .await?;
        Ok(reply)
    }

    /// Sends a SET-style command whose reply echoes the request.
    async fn exchange_echo(&self, command: &Command) -> Result<(), DeviceError> {
        let request = encode_command(command);
        let reply = self.exchange(command).await?;
        if reply != request {
            debug!("{:?}: reply does not echo the request", command.id());
        }
        Ok(())
    }
}

fn is_light_query(id: CommandId) -> bool {
    matches!(
        id,
        CommandId::GetProtocolVersion
            | CommandId::GetKeyboardValue
            | CommandId::GetLightingValue
            | CommandId::MacroGetCount
            | CommandId::MacroGetBufferSize
            | CommandId::GetLayerCount
    )
}

/// A short chunk reply is zero-filled so later chunks stay at their offsets.
fn padded_chunk(reply: &[u8], size: u8) -> Vec<u8> {
    let mut chunk = decode_buffer_reply(reply, size as usize);
    chunk.resize(size as usize, 0);
    chunk
}

fn check_addressable(len: usize) -> Result<(), DeviceError> {
    if len > BUFFER_ADDRESS_SPACE {
        return Err(DeviceError::BufferOverflow {
            needed: len,
            capacity: BUFFER_ADDRESS_SPACE,
        });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use hidwire_core::protocol::commands::lighting;
    use hidwire_core::protocol::MessageId;
    use std::sync::{Arc, Mutex};

    /// Answers buffer-size queries with `size` and echoes everything else,
    /// recording every payload.
    fn echoing_mock(size: u16, log: Arc<Mutex<Vec<Vec<u8>>>>) -> MockRequestTransport {
        let mut mock = MockRequestTransport::new();
        mock.expect_request().returning(move |_, payload, _| {
            log.lock().unwrap().push(payload.clone());
            match payload.first() {
                Some(0x0D) => Ok(size.to_be_bytes().to_vec()),
                Some(0x0C) => Ok(vec![4]),
                _ => Ok(payload),
            }
        });
        mock
    }

    #[tokio::test]
    async fn test_keycode_sends_position_and_decodes_big_endian() {
        // Arrange
        let mut mock = MockRequestTransport::new();
        mock.expect_request()
            .withf(|report_id, payload, timeout| {
                *report_id == 0
                    && payload == &vec![0x04, 1, 2, 3]
                    && *timeout == DEFAULT_REQUEST_TIMEOUT
            })
            .times(1)
            .returning(|_, _, _| Ok(vec![0x00, 0x29]));
        let client = DeviceClient::new(mock);

        // Act
        let code = client.keycode(KeyPosition::new(1, 2, 3)).await;

        // Assert
        assert_eq!(code, Ok(0x0029));
    }

    #[tokio::test]
    async fn test_queries_use_query_timeout_and_report_id() {
        let mut mock = MockRequestTransport::new();
        mock.expect_request()
            .withf(|report_id, payload, timeout| {
                *report_id == 6
                    && payload == &vec![0x01]
                    && *timeout == Duration::from_millis(250)
            })
            .times(1)
            .returning(|_, _, _| Ok(vec![0x00, 0x0C]));
        let client = DeviceClient::new(mock)
            .with_report_id(6)
            .with_timeouts(Duration::from_secs(2), Duration::from_millis(250));

        assert_eq!(client.protocol_version().await, Ok(12));
    }

    #[tokio::test]
    async fn test_short_replies_fall_back_to_defaults() {
        let mut mock = MockRequestTransport::new();
        mock.expect_request().returning(|_, _, _| Ok(Vec::new()));
        let client = DeviceClient::new(mock);

        assert_eq!(client.layer_count().await, Ok(4));
        assert_eq!(client.macro_count().await, Ok(0));
        assert_eq!(client.keycode(KeyPosition::new(0, 0, 0)).await, Ok(0));
        assert_eq!(
            client.lighting_value(lighting::RGBLIGHT_COLOR).await,
            Ok(LightingValue::single(0))
        );
    }

    #[tokio::test]
    async fn test_write_macro_buffer_sends_sequential_28_byte_chunks() {
        // Arrange
        let log = Arc::new(Mutex::new(Vec::new()));
        let client = DeviceClient::new(echoing_mock(1024, Arc::clone(&log)));
        let data: Vec<u8> = (1..=200).map(|i| i as u8).collect();

        // Act
        client.write_macro_buffer(&data).await.expect("write");

        // Assert – one size query, then 8 chunks at increasing offsets
        let sent = log.lock().unwrap().clone();
        assert_eq!(sent.len(), 9);
        assert_eq!(sent[0], vec![0x0D]);
        let mut rebuilt = Vec::new();
        for (i, payload) in sent[1..].iter().enumerate() {
            assert_eq!(payload[0], 0x0F);
            let offset = u16::from_be_bytes([payload[1], payload[2]]) as usize;
            assert_eq!(offset, i * 28);
            assert_eq!(payload[3] as usize, payload.len() - 4);
            rebuilt.extend_from_slice(&payload[4..]);
        }
        assert_eq!(sent[8].len() - 4, 4, "last chunk is partial");
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn test_write_macro_buffer_overflow_rejected_before_any_write() {
        // Arrange – a 16-byte device buffer; only the size query may be sent
        let mut mock = MockRequestTransport::new();
        mock.expect_request()
            .withf(|_, payload, _| payload == &vec![0x0D])
            .times(1)
            .returning(|_, _, _| Ok(vec![0x00, 0x10]));
        let client = DeviceClient::new(mock);

        // Act
        let result = client.write_macro_buffer(&[1; 20]).await;

        // Assert
        assert_eq!(
            result,
            Err(DeviceError::BufferOverflow {
                needed: 20,
                capacity: 16
            })
        );
    }

    #[tokio::test]
    async fn test_write_macros_pads_to_every_slot() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let client = DeviceClient::new(echoing_mock(64, Arc::clone(&log)));

        client
            .write_macros(&[b"hi".as_slice()])
            .await
            .expect("write");

        let sent = log.lock().unwrap().clone();
        let write = sent.iter().find(|p| p[0] == 0x0F).expect("a buffer write");
        assert_eq!(&write[4..], b"hi\0\0\0\0");
    }

    #[tokio::test]
    async fn test_write_macros_rejects_more_than_slots() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let client = DeviceClient::new(echoing_mock(64, Arc::clone(&log)));
        let macros = vec![vec![1u8]; 5];

        let result = client.write_macros(&macros).await;

        assert_eq!(result, Err(DeviceError::TooManyMacros { given: 5, slots: 4 }));
        assert!(log.lock().unwrap().iter().all(|p| p[0] != 0x0F));
    }

    #[tokio::test]
    async fn test_read_keymap_queries_layers_then_reads_buffer() {
        // Arrange – 2 layers of 1x2 = 8 bytes
        let mut mock = MockRequestTransport::new();
        mock.expect_request().returning(|_, payload, _| match payload[0] {
            0x11 => Ok(vec![2]),
            0x12 => Ok(vec![0x00, 0x29, 0x00, 0x1E, 0x00, 0x01, 0x00, 0x01]),
            other => panic!("unexpected opcode 0x{other:02X}"),
        });
        let client = DeviceClient::new(mock);

        // Act
        let keymap = client.read_keymap(1, 2).await.expect("read keymap");

        // Assert
        assert_eq!(keymap.geometry(), KeymapGeometry::new(2, 1, 2));
        assert_eq!(keymap.layer(0), Some(vec![vec![0x29, 0x1E]]));
        assert_eq!(keymap.layer(1), Some(vec![vec![1, 1]]));
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let id = MessageId::new(3).expect("nonzero");
        let mut mock = MockRequestTransport::new();
        mock.expect_request().returning(move |_, _, timeout| {
            Err(TransportError::Timeout { id, after: timeout })
        });
        let client = DeviceClient::new(mock);

        let result = client.set_keycode(KeyPosition::new(0, 0, 0), 4).await;

        assert!(matches!(
            result,
            Err(DeviceError::Transport(TransportError::Timeout { .. }))
        ));
    }
}
