//! Minimal host loop — publishes one tracker pose per tick and prints commands.
//!
//! Run with:
//!   cargo run --example pose-host
//!
//! In another terminal:
//!   cargo run --example pose-watch

use std::time::{Duration, Instant};

use posepipe::frame::{DeviceKind, DeviceRecord, Message};
use posepipe::link::{HostConfig, HostTransport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = std::env::temp_dir().join("posepipe-example.sock");
    let host = HostTransport::new(HostConfig::with_endpoint(&endpoint));
    host.initialize()?;
    eprintln!("Listening on {}", endpoint.display());

    let started = Instant::now();
    let tick = Duration::from_millis(11);

    // Roughly 30 seconds at 90 Hz.
    for _ in 0..2700 {
        let tick_start = Instant::now();

        if let Some(Message::Command { name, params }) = host.try_receive_one() {
            eprintln!("Command: {name} {params}");
        }

        let t = started.elapsed().as_secs_f32();
        let tracker = DeviceRecord::new("EXAMPLE-1", DeviceKind::Tracker, [t.cos(), 1.0, t.sin()]);
        host.enqueue_device_update(&[tracker]);

        std::thread::sleep(tick.saturating_sub(tick_start.elapsed()));
    }

    host.shutdown();
    Ok(())
}
