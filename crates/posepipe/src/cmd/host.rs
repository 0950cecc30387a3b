use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use posepipe_frame::{DeviceKind, DeviceRecord, Message};
use posepipe_link::{EnqueueOutcome, HostConfig, HostTransport};
use tracing::{debug, info};

use crate::cmd::{install_ctrlc_handler, HostArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{print_command, OutputFormat};

/// Inbound messages handled per tick before moving on.
const MAX_MESSAGES_PER_TICK: usize = 8;

pub fn run(args: HostArgs, format: OutputFormat) -> CliResult<i32> {
    let host = HostTransport::new(HostConfig::with_endpoint(&args.endpoint));
    host.initialize()
        .map_err(|err| link_error("host initialize failed", err))?;
    let running = install_ctrlc_handler()?;

    info!(
        endpoint = ?args.endpoint,
        devices = args.devices,
        rate = args.rate,
        "host running"
    );

    let period = Duration::from_secs(1) / args.rate;
    let started = Instant::now();
    let mut last_state = host.state();
    let mut dropped: u64 = 0;
    let mut tick: u64 = 0;

    while running.load(Ordering::SeqCst) && args.ticks.map_or(true, |limit| tick < limit) {
        let tick_start = Instant::now();

        for _ in 0..MAX_MESSAGES_PER_TICK {
            match host.try_receive_one() {
                Some(Message::Command { name, params }) => print_command(&name, &params, format),
                Some(Message::DeviceUpdate { devices }) => {
                    debug!(count = devices.len(), "ignoring device update sent by client");
                }
                None => break,
            }
        }

        let devices = simulated_devices(args.devices, started.elapsed().as_secs_f32());
        match host.enqueue_device_update(&devices) {
            EnqueueOutcome::Queued | EnqueueOutcome::DroppedNotConnected => {}
            other => {
                dropped += 1;
                debug!(outcome = ?other, dropped, "device update not delivered");
            }
        }

        let state = host.state();
        if state != last_state {
            info!(%state, "host connection state changed");
            last_state = state;
        }

        tick += 1;
        std::thread::sleep(period.saturating_sub(tick_start.elapsed()));
    }

    host.shutdown();
    info!(ticks = tick, dropped, "host stopped");
    Ok(SUCCESS)
}

/// Devices circling the origin, one HMD followed by controllers and trackers.
fn simulated_devices(count: usize, t: f32) -> Vec<DeviceRecord> {
    (0..count)
        .map(|i| {
            let kind = match i {
                0 => DeviceKind::Hmd,
                1 | 2 => DeviceKind::Controller,
                _ => DeviceKind::Tracker,
            };
            let phase = t + i as f32 * std::f32::consts::TAU / count.max(1) as f32;
            let height = if kind == DeviceKind::Hmd { 1.7 } else { 1.0 };
            let mut record = DeviceRecord::new(
                format!("SIM-{i:04}"),
                kind,
                [phase.cos(), height, phase.sin()],
            );
            let half_yaw = phase / 2.0;
            record.rotation = [0.0, half_yaw.sin(), 0.0, half_yaw.cos()];
            record
        })
        .collect()
}
