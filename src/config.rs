use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// Runtime configuration for the shutdown coordinator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PowerdownConfig {
    /// Maximum number of shutdown hooks the registry accepts.
    pub max_hooks: usize,
    /// Spacing between hook polling ticks.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Longest time an accepted request waits for hooks before forcing the
    /// platform action.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
    /// Command argv executed for a power-off.
    pub shutdown_command: Vec<String>,
    /// Command argv executed for a reboot.
    pub reboot_command: Vec<String>,
    /// Command argv executed for a reboot into the bootloader. Bootloader
    /// mode is unsupported unless this is configured.
    pub bootloader_command: Option<Vec<String>>,
}

impl Default for PowerdownConfig {
    fn default() -> Self {
        Self {
            max_hooks: 8,
            poll_interval: Duration::from_millis(50),
            max_wait: Duration::from_secs(5),
            shutdown_command: vec!["systemctl".into(), "poweroff".into()],
            reboot_command: vec!["systemctl".into(), "reboot".into()],
            bootloader_command: None,
        }
    }
}

impl PowerdownConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading configuration from {}", path.as_ref().display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(self.max_hooks > 0, "max-hooks must be greater than zero");
        ensure!(
            self.poll_interval > Duration::ZERO,
            "poll-interval must be positive"
        );
        ensure!(self.max_wait > Duration::ZERO, "max-wait must be positive");
        ensure!(
            self.poll_interval < self.max_wait,
            "poll-interval must be shorter than max-wait"
        );
        ensure!(
            !self.shutdown_command.is_empty(),
            "shutdown-command must not be empty"
        );
        ensure!(
            !self.reboot_command.is_empty(),
            "reboot-command must not be empty"
        );
        if let Some(cmd) = &self.bootloader_command {
            ensure!(!cmd.is_empty(), "bootloader-command must not be empty");
        }
        Ok(self)
    }
}
