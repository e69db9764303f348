//! Command-line interface
//!
//! [`Args`] holds the raw flags; the helpers here turn them into the
//! selector and target types the session understands.

pub mod args;

pub use args::Args;

use std::path::PathBuf;

use crate::agent::{self, DeviceSelector};
use crate::domain::Pid;
use crate::offsets;
use crate::session::{SpawnRequest, TargetSpec};

impl Args {
    /// `--id` wins over `--remote`, which wins over `--usb`; local otherwise
    pub fn device_selector(&self) -> DeviceSelector {
        if let Some(id) = &self.id {
            DeviceSelector::Id(id.clone())
        } else if let Some(host) = &self.remote {
            DeviceSelector::Remote(host.clone())
        } else if self.usb {
            DeviceSelector::Usb
        } else {
            DeviceSelector::Local
        }
    }

    pub fn target_spec(&self) -> TargetSpec {
        TargetSpec {
            pid: self.pid.map(Pid),
            name: self.name.clone(),
            gate: self.gate.clone(),
            spawn: self
                .file
                .as_ref()
                .map(|program| SpawnRequest { program: program.clone(), args: self.spawn_args.clone() }),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(offsets::default_config_path)
    }

    pub fn agent_path(&self) -> PathBuf {
        self.agent.clone().unwrap_or_else(agent::default_agent_path)
    }
}
