//! Binary entrypoint for powerdown.
//!
//! Wires the hook registry, coordinator, worker and platform power control
//! together, registers a filesystem-sync hook, and drives one shutdown or
//! reboot episode to completion.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use powerdown::config::PowerdownConfig;
use powerdown::coordinator::{Coordinator, Phase};
use powerdown::hooks::{HookRegistry, ShutdownHook};
use powerdown::platform::{CommandPowerControl, DryRunPowerControl, PowerControl};
use powerdown::worker::{TickScheduler, Worker};

/// Simple CLI
#[derive(Debug, Parser)]
#[command(
    name = "powerdown",
    about = "Coordinated power-down and reboot with bounded shutdown hooks"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE", default_value = "powerdown.yaml")]
    config: PathBuf,

    /// Reboot instead of powering off
    #[arg(long)]
    reboot: bool,

    /// Reboot into the bootloader (implies --reboot)
    #[arg(long)]
    to_bootloader: bool,

    /// Log the platform action instead of executing it
    #[arg(long)]
    dry_run: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("powerdown={}", level).parse().unwrap());
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

/// Flushes filesystem buffers before power is cut. The first poll starts
/// `sync` in the background and answers "not yet"; later polls acknowledge
/// once it has finished, so the hook itself never blocks.
struct SyncFilesystems {
    started: AtomicBool,
    done: Arc<AtomicBool>,
}

impl SyncFilesystems {
    fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            done: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ShutdownHook for SyncFilesystems {
    fn can_shutdown(&self) -> bool {
        if !self.started.swap(true, Ordering::AcqRel) {
            let done = Arc::clone(&self.done);
            thread::spawn(move || {
                match Command::new("sync").status() {
                    Ok(status) if !status.success() => {
                        warn!(%status, "sync exited with failure")
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "failed to run sync"),
                }
                done.store(true, Ordering::Release);
            });
            return false;
        }
        self.done.load(Ordering::Acquire)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cfg = if cli.config.exists() {
        PowerdownConfig::from_yaml_file(&cli.config)
            .with_context(|| format!("loading config from {}", cli.config.display()))?
    } else {
        info!(config = %cli.config.display(), "config file not found, using defaults");
        PowerdownConfig::default()
    };
    let cfg = cfg.validated().context("validating configuration")?;

    let dry_run = cli.dry_run.then(|| Arc::new(DryRunPowerControl::new()));
    let power: Arc<dyn PowerControl> = match &dry_run {
        Some(p) => Arc::clone(p) as Arc<dyn PowerControl>,
        None => Arc::new(CommandPowerControl::from_config(&cfg)),
    };

    let worker = Arc::new(Worker::spawn().context("spawning deferred-execution worker")?);
    let registry = Arc::new(HookRegistry::new(cfg.max_hooks));
    registry
        .register(Arc::new(SyncFilesystems::new()))
        .context("registering filesystem-sync hook")?;

    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&registry),
        Arc::clone(&worker) as Arc<dyn TickScheduler>,
        power,
        &cfg,
    ));

    let reboot = cli.reboot || cli.to_bootloader;
    coordinator
        .request(reboot, cli.to_bootloader)
        .context("requesting platform power-down")?;

    while coordinator.phase() != Phase::Terminal {
        thread::sleep(cfg.poll_interval);
    }

    if let Some(p) = &dry_run {
        for action in p.performed() {
            info!(%action, "dry run: would have performed");
        }
    }
    info!("shutdown episode complete");
    Ok(())
}
