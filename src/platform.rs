use std::fmt;
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::config::PowerdownConfig;

/// The terminal platform operation an accepted shutdown request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Shutdown,
    Reboot,
    RebootToBootloader,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shutdown => "shutdown",
            Self::Reboot => "reboot",
            Self::RebootToBootloader => "reboot-to-bootloader",
        })
    }
}

/// What the platform is able to do. Requests for anything else are rejected
/// up front.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub shutdown: bool,
    pub reboot: bool,
    pub bootloader: bool,
}

/// Hardware-level power control. `perform` is invoked at most once per
/// shutdown episode; on real hardware it does not return on success, and the
/// coordinator cannot observe a silent failure beyond still being alive
/// afterwards.
pub trait PowerControl: Send + Sync {
    fn capabilities(&self) -> Capabilities;
    fn perform(&self, action: PowerAction) -> Result<()>;
}

/// Power control that runs a configured helper command per action.
pub struct CommandPowerControl {
    shutdown_command: Vec<String>,
    reboot_command: Vec<String>,
    bootloader_command: Option<Vec<String>>,
}

impl CommandPowerControl {
    pub fn from_config(cfg: &PowerdownConfig) -> Self {
        Self {
            shutdown_command: cfg.shutdown_command.clone(),
            reboot_command: cfg.reboot_command.clone(),
            bootloader_command: cfg.bootloader_command.clone(),
        }
    }

    fn command_for(&self, action: PowerAction) -> Option<&[String]> {
        match action {
            PowerAction::Shutdown => Some(&self.shutdown_command),
            PowerAction::Reboot => Some(&self.reboot_command),
            PowerAction::RebootToBootloader => self.bootloader_command.as_deref(),
        }
    }
}

impl PowerControl for CommandPowerControl {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            shutdown: true,
            reboot: true,
            bootloader: self.bootloader_command.is_some(),
        }
    }

    fn perform(&self, action: PowerAction) -> Result<()> {
        let argv = match self.command_for(action) {
            Some(argv) if !argv.is_empty() => argv,
            _ => bail!("no command configured for {action}"),
        };
        info!(%action, command = %argv.join(" "), "executing platform power command");
        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .status()
            .with_context(|| format!("failed to execute {}", argv[0]))?;
        if !status.success() {
            bail!("{} exited with status {status}", argv[0]);
        }
        Ok(())
    }
}

/// Power control that only logs and records the action. Used by the binary's
/// `--dry-run` mode and by tests.
#[derive(Default)]
pub struct DryRunPowerControl {
    performed: Mutex<Vec<PowerAction>>,
}

impl DryRunPowerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actions performed so far, in order.
    pub fn performed(&self) -> Vec<PowerAction> {
        self.performed.lock().expect("dry-run log poisoned").clone()
    }
}

impl PowerControl for DryRunPowerControl {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            shutdown: true,
            reboot: true,
            bootloader: true,
        }
    }

    fn perform(&self, action: PowerAction) -> Result<()> {
        info!(%action, "dry run: platform action skipped");
        self.performed
            .lock()
            .expect("dry-run log poisoned")
            .push(action);
        Ok(())
    }
}
