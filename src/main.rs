use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use frame_oracle::assets::{
    DEFAULT_POOL_SIZE, DELIVERY_CHANNEL_CAPACITY, FRAME_HEIGHT, FRAME_RATE, FRAME_WIDTH,
};
use frame_oracle::capture::{PooledClient, SimulatedConfig, SimulatedMachine};
use frame_oracle::pipeline::{CaptureDevice, HealthMonitor};
use frame_oracle::{CaptureParams, OracleConfig, Size};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let matches = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("fps")
                .long("fps")
                .value_name("FPS")
                .help("Maximum capture rate.")
                .value_parser(value_parser!(f64))
                .default_value("30"),
        )
        .arg(
            Arg::new("source-hz")
                .long("source-hz")
                .value_name("HZ")
                .help("Repaint rate of the simulated source, 0 for static content.")
                .value_parser(value_parser!(f64))
                .default_value("60"),
        )
        .arg(
            Arg::new("seconds")
                .long("seconds")
                .value_name("SECONDS")
                .help("How long to run the session.")
                .value_parser(value_parser!(f64))
                .default_value("5"),
        )
        .arg(
            Arg::new("pool")
                .long("pool")
                .value_name("BUFFERS")
                .help("Number of frame buffers the client owns.")
                .value_parser(value_parser!(usize))
                .default_value("4"),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_name("PIXELS")
                .help("Maximum frame width.")
                .value_parser(value_parser!(u32))
                .default_value("1920"),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_name("PIXELS")
                .help("Maximum frame height.")
                .value_parser(value_parser!(u32))
                .default_value("1080"),
        )
        .arg(
            Arg::new("latency-ms")
                .long("latency-ms")
                .value_name("MILLIS")
                .help("Simulated copy latency per frame.")
                .value_parser(value_parser!(u64))
                .default_value("4"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON file with oracle settings.")
                .required(false),
        )
        .arg(
            Arg::new("lose-after")
                .long("lose-after")
                .value_name("SECONDS")
                .help("Make the simulated source disappear mid-session.")
                .value_parser(value_parser!(f64))
                .required(false),
        )
        .arg(
            Arg::new("fail-start")
                .long("fail-start")
                .help("Make the simulated source fail on start.")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => OracleConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => OracleConfig::default(),
    };

    let max_frame_size = Size::new(
        *matches.get_one::<u32>("width").unwrap_or(&FRAME_WIDTH),
        *matches.get_one::<u32>("height").unwrap_or(&FRAME_HEIGHT),
    );
    let params = CaptureParams {
        requested_frame_size: max_frame_size,
        max_frame_size,
        frame_rate: *matches.get_one::<f64>("fps").unwrap_or(&FRAME_RATE),
        ..CaptureParams::default()
    };
    let seconds = *matches.get_one::<f64>("seconds").unwrap_or(&5.0);
    let run_for = Duration::try_from_secs_f64(seconds).context("invalid --seconds")?;

    let source_lost_after = matches
        .get_one::<f64>("lose-after")
        .map(|secs| Duration::try_from_secs_f64(*secs))
        .transpose()
        .context("invalid --lose-after")?;

    let machine = Arc::new(SimulatedMachine::new(SimulatedConfig {
        source_rate: *matches.get_one::<f64>("source-hz").unwrap_or(&60.0),
        source_size: max_frame_size,
        copy_latency: Duration::from_millis(*matches.get_one::<u64>("latency-ms").unwrap_or(&4)),
        fail_on_start: matches.get_flag("fail-start"),
        source_lost_after,
    }));
    let pool_size = *matches.get_one::<usize>("pool").unwrap_or(&DEFAULT_POOL_SIZE);
    let (client, mut frames) = PooledClient::new(pool_size, DELIVERY_CHANNEL_CAPACITY);

    let device = CaptureDevice::new(machine, config, Handle::current());
    device.allocate_and_start(params, client.clone());
    let Some(coordinator) = device.coordinator() else {
        anyhow::bail!("capture did not start: {}", client.errors().join(", "));
    };

    let cancel = CancellationToken::new();
    let (alert_tx, mut alerts) = mpsc::channel(8);
    let monitor = HealthMonitor::new(Arc::clone(coordinator.health()), alert_tx);
    let monitor_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { monitor.run(cancel).await })
    };

    // dropping a received frame returns its buffer to the pool
    let consumer = tokio::spawn(async move {
        let mut received = 0u64;
        while let Some(frame) = frames.recv().await {
            received += 1;
            drop(frame);
        }
        received
    });

    let deadline = tokio::time::sleep(run_for);
    tokio::pin!(deadline);
    let mut check = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            Some(alert) = alerts.recv() => warn!("{}", alert),
            _ = check.tick() => {
                if device.state().is_error() {
                    break;
                }
            }
        }
    }

    let state = device.state();
    device.stop_and_deallocate();
    cancel.cancel();
    monitor_task.await?;

    // the device no longer holds the client, so this closes the channel
    let client_errors = client.errors();
    drop(client);
    let received = consumer.await?;

    println!("{}", coordinator.health().summary());
    println!("{} frames received, device ended {}", received, state);
    for reason in client_errors {
        println!("error: {}", reason);
    }
    Ok(())
}
