//! Supervised client — prints poses and survives host restarts.
//!
//! Run with:
//!   cargo run --example pose-watch
//!
//! Start, stop and restart `pose-host` while this runs.

use std::sync::Arc;
use std::time::Duration;

use posepipe::frame::DeviceRecord;
use posepipe::link::{ClientConfig, ClientTransport, ReconnectSupervisor, SupervisorConfig};

fn main() {
    let endpoint = std::env::temp_dir().join("posepipe-example.sock");

    let client = Arc::new(ClientTransport::new(ClientConfig::default()).with_update_handler(
        |devices: Vec<DeviceRecord>| {
            for device in devices {
                eprintln!("{} {:?}", device.serial, device.position);
            }
        },
    ));
    let supervisor = ReconnectSupervisor::new(
        Arc::clone(&client),
        &endpoint,
        SupervisorConfig::default(),
    );

    if !supervisor.start() {
        eprintln!("Host not up yet; retrying in the background");
    }

    let mut last = supervisor.status();
    for i in 0..600 {
        std::thread::sleep(Duration::from_millis(100));
        supervisor.check_connection();

        let status = supervisor.status();
        if status != last {
            eprintln!("Status: {status}");
            last = status;
        }

        if i % 10 == 0 && client.is_connected() {
            let _ = client.send_command("heartbeat", "");
        }
    }
}
