//! hidwire command-line entry point.
//!
//! Opens a [`TransportSession`] over the simulated keyboard and runs one
//! device operation per invocation.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()          -- TOML, falls back to defaults
//!  └─ SimulatedChannel       -- virtual keyboard behind the report channel
//!  └─ TransportSession.open  -- framing, correlation, subscriptions
//!  └─ DeviceClient           -- typed operation for the chosen subcommand
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hidwire_core::protocol::commands::lighting;
use hidwire_core::{KeyPosition, LightingValue};
use hidwire_host::infrastructure::channel::simulated::SimulatedChannel;
use hidwire_host::infrastructure::storage::config::{load_config, HidwireConfig};
use hidwire_host::{DeviceClient, TransportSession};

/// Lighting properties listed by `hidwire lighting`.
const LIGHTING_PROPERTIES: [(&str, u8); 6] = [
    ("backlight brightness", lighting::BACKLIGHT_BRIGHTNESS),
    ("backlight effect", lighting::BACKLIGHT_EFFECT),
    ("rgb brightness", lighting::RGBLIGHT_BRIGHTNESS),
    ("rgb effect", lighting::RGBLIGHT_EFFECT),
    ("rgb effect speed", lighting::RGBLIGHT_EFFECT_SPEED),
    ("rgb color", lighting::RGBLIGHT_COLOR),
];

#[derive(Debug, Parser)]
#[command(name = "hidwire", version, about = "Talk to a keyboard over HID reports")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "HIDWIRE_CONFIG", default_value = "hidwire.toml")]
    config: PathBuf,

    /// Overrides `transport.report_size` from the configuration.
    #[arg(long)]
    report_size: Option<usize>,

    /// Print `info`, `keymap` and `macros` output as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show device identity, protocol version and capacities.
    Info,
    /// Print one keymap layer as a grid of hex keycodes.
    Keymap {
        #[arg(long, default_value_t = 0)]
        layer: u8,
    },
    /// Assign a keycode and read it back.
    SetKey {
        layer: u8,
        row: u8,
        col: u8,
        /// Keycode, decimal or `0x`-prefixed hex.
        #[arg(value_parser = parse_keycode)]
        keycode: u16,
    },
    /// Print every lighting property.
    Lighting,
    /// Set a lighting property to one or two bytes.
    SetLighting {
        #[arg(value_parser = parse_byte)]
        property: u8,
        #[arg(value_parser = parse_byte)]
        primary: u8,
        #[arg(value_parser = parse_byte)]
        secondary: Option<u8>,
    },
    /// Print every macro slot.
    Macros,
    /// Replace one macro slot with the bytes of `text`.
    SetMacro { slot: usize, text: String },
}

fn parse_number(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

fn parse_keycode(s: &str) -> Result<u16, String> {
    let n = parse_number(s)?;
    u16::try_from(n).map_err(|_| format!("keycode {s} does not fit in 16 bits"))
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let n = parse_number(s)?;
    u8::try_from(n).map_err(|_| format!("{s} does not fit in a byte"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(size) = cli.report_size {
        config.transport.report_size = size;
    }

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let session = open_session(&config).await?;
    let client = DeviceClient::new(session.clone())
        .with_report_id(config.transport.report_id)
        .with_timeouts(
            config.transport.request_timeout(),
            config.transport.query_timeout(),
        );

    let result = run(&cli, &client, &session, &config).await;
    session.close().await;
    result
}

async fn open_session(config: &HidwireConfig) -> anyhow::Result<TransportSession> {
    let report_size = config.transport.report_size;
    let session = TransportSession::new(report_size).context("invalid transport.report_size")?;

    // Events are only logged; the simulated keyboard sends none on its own.
    let _events = session.subscribe_events(|report_id: u8, payload: &[u8]| {
        info!("device event on report {report_id}: {payload:02X?}");
    });

    let channel = Arc::new(SimulatedChannel::new(config.simulation.clone(), report_size));
    session
        .open(channel)
        .await
        .context("opening simulated keyboard")?;
    Ok(session)
}

async fn run(
    cli: &Cli,
    client: &DeviceClient<TransportSession>,
    session: &TransportSession,
    config: &HidwireConfig,
) -> anyhow::Result<()> {
    match &cli.command {
        Command::Info if cli.json => {
            let report = serde_json::json!({
                "device": session.device_info(),
                "protocol_version": client.protocol_version().await?,
                "layers": client.layer_count().await?,
                "macro_count": client.macro_count().await?,
                "macro_buffer_size": client.macro_buffer_size().await?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Info => {
            if let Some(info) = session.device_info() {
                println!(
                    "{} ({:04X}:{:04X})",
                    info.product_name, info.vendor_id, info.product_id
                );
            }
            println!("protocol version : {}", client.protocol_version().await?);
            println!("layers           : {}", client.layer_count().await?);
            println!("macro slots      : {}", client.macro_count().await?);
            println!("macro buffer     : {} bytes", client.macro_buffer_size().await?);
        }

        Command::Keymap { layer } => {
            let keymap = client
                .read_keymap(config.simulation.rows, config.simulation.cols)
                .await?;
            let Some(grid) = keymap.layer(*layer) else {
                bail!(
                    "layer {layer} does not exist (device has {})",
                    keymap.geometry().layers
                );
            };
            if cli.json {
                println!("{}", serde_json::to_string(&grid)?);
                return Ok(());
            }
            for row in grid {
                let cells: Vec<String> = row.iter().map(|k| format!("{k:04X}")).collect();
                println!("{}", cells.join(" "));
            }
        }

        Command::SetKey {
            layer,
            row,
            col,
            keycode,
        } => {
            let position = KeyPosition::new(*layer, *row, *col);
            client.set_keycode(position, *keycode).await?;
            let stored = client.keycode(position).await?;
            println!("{position} = 0x{stored:04X}");
        }

        Command::Lighting => {
            for (name, property) in LIGHTING_PROPERTIES {
                let value = client.lighting_value(property).await?;
                match value.secondary {
                    Some(second) => println!("{name:<22}: {} {}", value.primary, second),
                    None => println!("{name:<22}: {}", value.primary),
                }
            }
        }

        Command::SetLighting {
            property,
            primary,
            secondary,
        } => {
            let value = match secondary {
                Some(second) => LightingValue::pair(*primary, *second),
                None => LightingValue::single(*primary),
            };
            client.set_lighting_value(*property, value).await?;
            let stored = client.lighting_value(*property).await?;
            println!("0x{property:02X} = {:?}", stored.to_bytes());
        }

        Command::Macros => {
            let macros = client.read_macros().await?;
            if cli.json {
                let text: Vec<String> = macros
                    .iter()
                    .map(|body| String::from_utf8_lossy(body).into_owned())
                    .collect();
                println!("{}", serde_json::to_string_pretty(&text)?);
                return Ok(());
            }
            for (slot, body) in macros.iter().enumerate() {
                println!("{slot:>2}: {}", String::from_utf8_lossy(body));
            }
        }

        Command::SetMacro { slot, text } => {
            let mut macros = client.read_macros().await?;
            let Some(entry) = macros.get_mut(*slot) else {
                bail!("macro slot {slot} does not exist (device has {})", macros.len());
            };
            *entry = text.as_bytes().to_vec();
            client.write_macros(&macros).await?;
            debug!("macro slot {slot} written");
            println!("{slot:>2}: {text}");
        }
    }
    Ok(())
}
