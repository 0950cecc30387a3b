use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use posepipe_frame::DeviceRecord;
use posepipe_link::{
    ClientConfig, ClientTransport, ReconnectSupervisor, SupervisorConfig, SupervisorStatus,
};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, WatchArgs};
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_devices, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let running = install_ctrlc_handler()?;

    // The handler runs on the reader thread; printing happens here.
    let (tx, rx) = mpsc::channel::<Vec<DeviceRecord>>();
    let client = Arc::new(ClientTransport::new(ClientConfig::default()).with_update_handler(
        move |devices: Vec<DeviceRecord>| {
            let _ = tx.send(devices);
        },
    ));
    let supervisor = ReconnectSupervisor::new(
        Arc::clone(&client),
        &args.endpoint,
        SupervisorConfig {
            auto_reconnect: !args.no_auto_reconnect,
            ..SupervisorConfig::default()
        },
    );

    if !supervisor.start() && args.no_auto_reconnect {
        return Err(CliError::new(
            FAILURE,
            format!("could not connect to {}", args.endpoint.display()),
        ));
    }

    let mut printed = 0usize;
    let mut last_status = supervisor.status();
    info!(endpoint = ?args.endpoint, status = %last_status, "watching");

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(devices) => {
                print_devices(&devices, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        supervisor.check_connection();
        let status = supervisor.status();
        if status != last_status {
            info!(%status, "connection status changed");
            last_status = status;
        }
        if args.no_auto_reconnect && status == SupervisorStatus::Disconnected {
            return Err(CliError::new(FAILURE, "connection to host lost"));
        }
    }

    supervisor.stop_retry();
    client.disconnect();
    Ok(SUCCESS)
}
