//! Foretrack - foreground process reporting for connected devices
//!
//! This is the binary entry point. It wires a transport client to the
//! detection coordinator and prints observed events to stdout as NDJSON.

mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use foretrack_core::prelude::*;
use foretrack_core::{
    default_config_path, load_settings, load_settings_required, logging, Device, Settings,
};
use foretrack_detect::{ForegroundProcessDetection, SelectionRegistry};
use foretrack_transport::TransportClient;

use crate::output::{OutputEvent, StdoutMetricsSink};

/// Foretrack - foreground process reporting for connected devices
#[derive(Parser, Debug)]
#[command(name = "foretrack")]
#[command(about = "Watches connected devices and reports their foreground process", long_about = None)]
struct Args {
    /// Transport agent command to spawn (talks NDJSON over stdio)
    #[arg(long, value_name = "COMMAND", conflicts_with = "connect")]
    agent: Option<String>,

    /// Transport agent TCP address (host:port)
    #[arg(long, value_name = "ADDR")]
    connect: Option<String>,

    /// Poll interval handed to the agent (milliseconds)
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Path to an alternative config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    let args = Args::parse();

    color_eyre::install()?;
    logging::init()?;
    eprintln!("Logs: {}", logging::log_directory().display());

    let settings = match &args.config {
        Some(path) => load_settings_required(path)?,
        None => load_settings(&default_config_path()),
    };

    let poll_interval_ms = args.interval_ms.unwrap_or(settings.polling.interval_ms);
    let shutdown_timeout = Duration::from_millis(settings.transport.command_timeout_ms);

    let mut client = match connect_transport(&args, &settings).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let detection = ForegroundProcessDetection::new(
        client.handle(),
        SelectionRegistry::new(),
        Arc::new(StdoutMetricsSink),
        |device: Device| OutputEvent::device_disconnected(&device).emit(),
        poll_interval_ms,
    );
    detection
        .add_foreground_process_listener(|device, process| {
            OutputEvent::foreground_process(device, process).emit();
        })
        .await?;

    info!(
        "Foretrack running (instance {}, poll interval {} ms)",
        detection.instance_id(),
        poll_interval_ms
    );

    let transport_lost = tokio::select! {
        result = wait_for_signal() => {
            result?;
            false
        }
        _ = client.wait_closed() => {
            warn!("Transport connection closed");
            true
        }
    };

    detection.dispose().await;
    client.shutdown(shutdown_timeout).await;

    if transport_lost {
        let code = client.exit_code();
        OutputEvent::agent_exited(code).emit();
        eprintln!("❌ Transport agent exited unexpectedly (code {:?})", code);
        return Err(Error::AgentExit { code }.into());
    }

    info!("Foretrack exiting");
    Ok(())
}

/// Pick the transport mode: explicit CLI flags win over the config file.
async fn connect_transport(args: &Args, settings: &Settings) -> Result<TransportClient> {
    if let Some(command) = &args.agent {
        return TransportClient::spawn_agent(command, &settings.transport.agent_args);
    }

    if let Some(addr) = &args.connect {
        return TransportClient::connect_tcp(addr).await;
    }

    if !settings.transport.agent.is_empty() {
        return TransportClient::spawn_agent(
            &settings.transport.agent,
            &settings.transport.agent_args,
        );
    }

    let addr = format!("{}:{}", settings.transport.host, settings.transport.port);
    TransportClient::connect_tcp(&addr).await
}

/// Wait for a termination signal
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        Ok(())
    }
}
