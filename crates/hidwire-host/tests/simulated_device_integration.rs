//! End-to-end tests: DeviceClient → TransportSession → SimulatedChannel.
//!
//! Every operation here crosses the full wire path: command encoding,
//! fragmentation, device-side reassembly, the virtual device, and the
//! response back through the correlator.

use std::sync::{Arc, Mutex};

use hidwire_core::protocol::commands::{keyboard_value, lighting};
use hidwire_core::{KeyPosition, KeymapGeometry, LightingValue, VirtualDeviceConfig};
use hidwire_host::infrastructure::channel::simulated::{
    SimulatedChannel, SIMULATED_PRODUCT_NAME, SIMULATED_VENDOR_ID,
};
use hidwire_host::{DeviceClient, DeviceError, InboundReport, TransportSession};

async fn connect(
    config: VirtualDeviceConfig,
    report_size: usize,
) -> (DeviceClient<TransportSession>, Arc<SimulatedChannel>) {
    let session = TransportSession::new(report_size).expect("valid report size");
    let device = Arc::new(SimulatedChannel::new(config, report_size));
    session.open(device.clone()).await.expect("open");
    (DeviceClient::new(session), device)
}

#[tokio::test]
async fn test_device_info_and_capacities() {
    // Arrange
    let (client, _device) = connect(VirtualDeviceConfig::default(), 64).await;

    // Act / Assert
    let info = client.transport().device_info().expect("open session");
    assert_eq!(info.vendor_id, SIMULATED_VENDOR_ID);
    assert_eq!(info.product_name, SIMULATED_PRODUCT_NAME);
    assert_eq!(client.protocol_version().await, Ok(12));
    assert_eq!(client.layer_count().await, Ok(4));
    assert_eq!(client.macro_count().await, Ok(16));
    assert_eq!(client.macro_buffer_size().await, Ok(1024));
}

#[tokio::test]
async fn test_set_keycode_is_visible_to_later_reads() {
    // Arrange
    let (client, device) = connect(VirtualDeviceConfig::default(), 64).await;
    let position = KeyPosition::new(0, 1, 2);

    // Act
    client.set_keycode(position, 0x0004).await.expect("set");

    // Assert – both through the wire and in the device state
    assert_eq!(client.keycode(position).await, Ok(0x0004));
    assert_eq!(device.with_device(|d| d.keymap().get(position)), Some(0x0004));
}

#[tokio::test]
async fn test_keymap_buffer_read_matches_device_state() {
    // Arrange
    let (client, device) = connect(VirtualDeviceConfig::default(), 64).await;
    client
        .set_keycode(KeyPosition::new(3, 5, 17), 0x00E0)
        .await
        .expect("set last cell");

    // Act
    let keymap = client.read_keymap(6, 18).await.expect("read keymap");

    // Assert
    assert_eq!(keymap.geometry(), KeymapGeometry::new(4, 6, 18));
    let expected = device.with_device(|d| d.keymap().clone());
    assert_eq!(keymap, expected);
    assert_eq!(keymap.get(KeyPosition::new(3, 5, 17)), Some(0x00E0));
}

#[tokio::test]
async fn test_keymap_buffer_write_then_reset() {
    // Arrange
    let (client, _device) = connect(VirtualDeviceConfig::default(), 32).await;
    let original = client.keycode(KeyPosition::new(0, 0, 0)).await.expect("read");

    // Act – overwrite the first three cells of layer 0
    client
        .write_keymap_buffer(0, &[0x00, 0x04, 0x00, 0x05, 0x00, 0x06])
        .await
        .expect("write");
    let written = client.keycode(KeyPosition::new(0, 0, 2)).await.expect("read");
    client.reset_keymap().await.expect("reset");
    let restored = client.keycode(KeyPosition::new(0, 0, 0)).await.expect("read");

    // Assert
    assert_eq!(written, 0x0006);
    assert_eq!(restored, original);
}

#[tokio::test]
async fn test_lighting_values_round_trip() {
    // Arrange
    let (client, _device) = connect(VirtualDeviceConfig::default(), 64).await;

    // Act
    client
        .set_lighting_value(lighting::RGBLIGHT_COLOR, LightingValue::pair(170, 255))
        .await
        .expect("set colour");
    client
        .set_lighting_value(lighting::RGBLIGHT_BRIGHTNESS, LightingValue::single(40))
        .await
        .expect("set brightness");

    // Assert
    assert_eq!(
        client.lighting_value(lighting::RGBLIGHT_COLOR).await,
        Ok(LightingValue::pair(170, 255))
    );
    assert_eq!(
        client.lighting_value(lighting::RGBLIGHT_BRIGHTNESS).await,
        Ok(LightingValue::single(40))
    );
}

#[tokio::test]
async fn test_macros_written_in_chunks_read_back_intact() {
    // Arrange – a 200-byte macro spans 8 chunked writes
    let (client, device) = connect(VirtualDeviceConfig::default(), 64).await;
    let long: Vec<u8> = (1..=200).map(|i| (i % 250 + 1) as u8).collect();
    let macros = vec![b"hello".to_vec(), long.clone(), Vec::new(), b"bye".to_vec()];

    // Act
    client.write_macros(&macros).await.expect("write");
    let read = client.read_macros().await.expect("read");

    // Assert
    assert_eq!(read.len(), 16);
    assert_eq!(&read[..4], &macros[..]);
    assert!(read[4..].iter().all(Vec::is_empty));
    let stored = device.with_device(|d| d.macro_buffer()[..6].to_vec());
    assert_eq!(stored, b"hello\0");
}

#[tokio::test]
async fn test_oversized_macro_write_is_rejected_untouched() {
    // Arrange – a 32-byte macro buffer
    let config = VirtualDeviceConfig {
        macro_buffer_size: 32,
        ..VirtualDeviceConfig::default()
    };
    let (client, device) = connect(config, 64).await;
    let before = device.with_device(|d| d.macro_buffer().to_vec());

    // Act
    let result = client.write_macro_buffer(&[7; 40]).await;

    // Assert
    assert_eq!(
        result,
        Err(DeviceError::BufferOverflow {
            needed: 40,
            capacity: 32
        })
    );
    assert_eq!(device.with_device(|d| d.macro_buffer().to_vec()), before);
}

#[tokio::test]
async fn test_keyboard_values() {
    // Arrange
    let (client, _device) = connect(VirtualDeviceConfig::default(), 64).await;

    // Act
    client
        .set_keyboard_value(keyboard_value::LAYOUT_OPTIONS, &[0, 0, 0, 3])
        .await
        .expect("set");
    let layout = client
        .keyboard_value(keyboard_value::LAYOUT_OPTIONS)
        .await
        .expect("get");
    let uptime = client
        .keyboard_value(keyboard_value::UPTIME)
        .await
        .expect("get");

    // Assert
    assert_eq!(layout, vec![0, 0, 0, 3]);
    assert_eq!(uptime.len(), 4);
}

#[tokio::test]
async fn test_closed_session_surfaces_transport_error() {
    // Arrange
    let (client, _device) = connect(VirtualDeviceConfig::default(), 64).await;
    client.transport().close().await;

    // Act
    let result = client.protocol_version().await;

    // Assert
    assert!(matches!(result, Err(DeviceError::Transport(_))));
}

#[tokio::test]
async fn test_report_size_change_on_both_ends_keeps_exchanges_working() {
    // Arrange – start at 64-byte reports, record every inbound report length
    let (client, device) = connect(VirtualDeviceConfig::default(), 64).await;
    let lengths = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&lengths);
    let _tap = client.transport().subscribe_reports(move |report: &InboundReport| {
        recorded.lock().unwrap().push(report.data.len());
    });

    // Act – shrink both directions to 16 bytes, then read a 28-byte chunk
    client.transport().set_report_size(16).expect("valid size");
    device.set_report_size(16);
    let chunk = client.read_keymap_buffer(28).await.expect("read");

    // Assert – 28 bytes arrive as 12 + 14 + 2 in 16-byte reports
    let expected = device.with_device(|d| d.keymap().to_buffer()[..28].to_vec());
    assert_eq!(chunk, expected);
    assert_eq!(*lengths.lock().unwrap(), vec![16, 16, 4]);
}
