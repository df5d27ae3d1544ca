//! steward-controld
//!
//! The per-node cluster controller daemon.

#![warn(missing_docs)]
#![warn(clippy::all)]

use anyhow::Result;
use clap::Parser;
use steward_controld::daemon::sanity_check;
use steward_controld::{Controller, ControllerConfig, Event, InMemoryCib};
use steward_core::ExitStatus;
use steward_exec::RecordingDispatcher;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "steward-controld")]
#[command(about = "STEWARD cluster controller daemon", long_about = None)]
struct Args {
    /// Increase verbosity (repeatable)
    #[arg(short = 'V', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run a sanity check and exit
    #[arg(short = 's', long = "sanity")]
    sanity: bool,

    /// Node name override (defaults to the hostname)
    #[arg(short = 'n', long = "node-name")]
    node_name: Option<String>,
}

fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "steward=info",
        1 => "steward=debug",
        _ => "steward=trace",
    };
    let env_filter = std::env::var("HA_debug")
        .ok()
        .filter(|v| v == "1" || v == "true")
        .map_or_else(|| filter.to_string(), |_| "steward=trace".to_string());

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    match std::env::var("HA_logfile") {
        Ok(path) if !path.is_empty() => {
            match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    builder
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false)
                        .init();
                }
                Err(e) => {
                    eprintln!("steward-controld: cannot open {path}: {e}");
                    std::process::exit(ExitStatus::IoErr.code());
                }
            }
        }
        _ => builder.init(),
    }
}

fn node_name(args: &Args) -> String {
    if let Some(name) = &args.node_name {
        return name.clone();
    }
    std::env::var("HA_cluster_node")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let fail_fast = std::env::var("PCMK_fail_fast")
        .ok()
        .is_some_and(|v| v == "1" || v == "true");

    if args.sanity {
        return match sanity_check() {
            Ok(()) => {
                info!("sanity check passed");
                Ok(())
            }
            Err(message) => {
                error!(%message, "sanity check failed");
                std::process::exit(ExitStatus::Software.code());
            }
        };
    }

    let name = node_name(&args);
    info!(node = %name, cluster_type = %std::env::var("HA_cluster_type").unwrap_or_default(),
        "steward-controld starting");

    // Collaborator wiring: the CIB daemon and the executor proxy
    // attach here. Absent a cluster stack this binary degrades to a
    // single-node in-process store, which is still useful for
    // bring-up and CI.
    let cib = Box::new(InMemoryCib::new(
        "<cib admin_epoch=\"0\" epoch=\"0\" num_updates=\"0\">\
         <configuration><nodes/><resources/><constraints/></configuration>\
         <status/></cib>",
    ));
    let dispatcher = Box::new(RecordingDispatcher::new());
    let mut controller = Controller::new(ControllerConfig::new(&name), cib, dispatcher);

    controller.handle_event(Event::Startup, 0).await;
    // Cold start: no DC is known yet, so open an election
    controller.handle_event(Event::ElectionStart, 0).await;

    let mut ticker = tokio::time::interval(tokio::time::Duration::from_millis(100));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let started = std::time::Instant::now();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = started.elapsed().as_millis() as u64;
                controller.handle_event(Event::Tick { now }, now).await;
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                let now = started.elapsed().as_millis() as u64;
                controller.handle_event(Event::ShutdownRequest, now).await;
            }
        }
        if controller.exit_status().is_some() {
            break;
        }
        if fail_fast && controller.state() == steward_controld::State::Recovery {
            error!("fail-fast: exiting on recovery");
            std::process::exit(ExitStatus::Fatal.code());
        }
    }

    match controller.exit_status() {
        Some(ExitStatus::Ok) | None => Ok(()),
        Some(status) => std::process::exit(status.code()),
    }
}
