use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use posepipe_frame::DeviceRecord;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct DeviceOutput<'a> {
    serial: &'a str,
    kind: &'a str,
    position: [f32; 3],
    rotation: [f32; 4],
    connected: bool,
}

impl<'a> From<&'a DeviceRecord> for DeviceOutput<'a> {
    fn from(record: &'a DeviceRecord) -> Self {
        Self {
            serial: &record.serial,
            kind: record.kind.as_str(),
            position: record.position,
            rotation: record.rotation,
            connected: record.connected,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventOutput<'a> {
    DeviceUpdate {
        timestamp: String,
        devices: Vec<DeviceOutput<'a>>,
    },
    Command {
        timestamp: String,
        name: &'a str,
        params: &'a str,
    },
}

/// Print one received device update.
pub fn print_devices(devices: &[DeviceRecord], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&EventOutput::DeviceUpdate {
            timestamp: now_unix_seconds(),
            devices: devices.iter().map(DeviceOutput::from).collect(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERIAL", "KIND", "POSITION", "ROTATION", "CONNECTED"]);
            for device in devices {
                table.add_row(vec![
                    device.serial.clone(),
                    device.kind.to_string(),
                    format_floats(&device.position),
                    format_floats(&device.rotation),
                    device.connected.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("update: {} device(s)", devices.len());
            for device in devices {
                println!(
                    "  {} ({}) pos={} rot={}{}",
                    device.serial,
                    device.kind,
                    format_floats(&device.position),
                    format_floats(&device.rotation),
                    if device.connected { "" } else { " [disconnected]" }
                );
            }
        }
    }
}

/// Print one command received by the host.
pub fn print_command(name: &str, params: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&EventOutput::Command {
            timestamp: now_unix_seconds(),
            name,
            params,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "PARAMS"])
                .add_row(vec![name, params]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("command: {name} {params}"),
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn format_floats(values: &[f32]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{v:.3}")).collect();
    format!("[{}]", parts.join(", "))
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
