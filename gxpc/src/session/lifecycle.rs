//! # Session Lifecycle
//!
//! Drives one run against one device and one target process:
//!
//! ```text
//! Idle ──select_device──▶ Attaching ──obtain/attach──▶ Attached
//!      ──load──▶ Loaded ──start──▶ Running ──teardown──▶ Ended
//! ```
//!
//! Any failure before `Attached` is fatal to the run. Whatever was acquired
//! by then (the device, maybe a session) is still released: either by the
//! shutdown teardown or, on error paths, when the [`Session`] is dropped.

use log::{debug, warn};
use std::sync::Arc;

use crate::agent::{AgentChannel, Backend, DeviceSelector, EnvelopeSink};
use crate::console::Console;
use crate::domain::{DeviceInfo, Pid, SessionError, SessionState};
use crate::process_lookup::find_pid_by_name;

use super::shutdown::{DetachNotifier, Teardown};

/// Executable to spawn suspended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
}

impl SpawnRequest {
    /// `argv[0]` is the program itself
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone()).chain(self.args.iter().cloned()).collect()
    }
}

/// Every way the operator can name a target; several may be set at once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSpec {
    pub pid: Option<Pid>,
    pub name: Option<String>,
    pub gate: Option<String>,
    pub spawn: Option<SpawnRequest>,
}

impl TargetSpec {
    pub fn is_empty(&self) -> bool {
        self.pid.is_none() && self.name.is_none() && self.gate.is_none() && self.spawn.is_none()
    }
}

/// A resolved target process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Obtained {
    pub pid: Pid,
    /// The process waits suspended and must be resumed after the agent loads
    pub spawned: bool,
}

pub struct Session {
    backend: Box<dyn Backend>,
    console: Arc<Console>,
    state: SessionState,
    device: Option<DeviceInfo>,
    target: Option<Obtained>,
    session_bound: bool,
    channel: Option<Arc<AgentChannel>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("device", &self.device)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(backend: Box<dyn Backend>, console: Arc<Console>) -> Self {
        Self {
            backend,
            console,
            state: SessionState::Idle,
            device: None,
            target: None,
            session_bound: false,
            channel: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    pub fn target(&self) -> Option<Obtained> {
        self.target
    }

    pub fn channel(&self) -> Option<Arc<AgentChannel>> {
        self.channel.clone()
    }

    /// Enumerate devices without selecting one
    pub fn list_devices(&mut self) -> Result<Vec<DeviceInfo>, SessionError> {
        self.expect_state(SessionState::Idle, "list devices")?;
        Ok(self.backend.enumerate_devices()?)
    }

    /// `--list`: one console line per device, tagged with its kind
    pub fn report_devices(&mut self) -> Result<usize, SessionError> {
        let devices = self.list_devices()?;
        for device in &devices {
            self.console.info(format!("[{}]\t{device}", device.kind.to_string().to_uppercase()));
        }
        Ok(devices.len())
    }

    /// Pick exactly one device for this run
    pub fn select_device(&mut self, selector: &DeviceSelector) -> Result<DeviceInfo, SessionError> {
        self.expect_state(SessionState::Idle, "select a device")?;
        self.state = SessionState::Attaching;

        let device = self.backend.open_device(selector)?.ok_or(SessionError::DeviceNotFound)?;
        self.console.info(format!("Using device {device}"));
        self.device = Some(device.clone());
        Ok(device)
    }

    /// Resolve the target to a PID.
    ///
    /// Order: explicit PID, then process name (first exact match), then spawn
    /// gate (blocks until a matching launch, no timeout), then spawning the
    /// executable suspended.
    pub fn obtain(&mut self, spec: &TargetSpec) -> Result<Obtained, SessionError> {
        self.expect_state(SessionState::Attaching, "resolve a target")?;
        if spec.is_empty() {
            return Err(SessionError::MissingTarget);
        }

        if let Some(pid) = spec.pid {
            return Ok(Obtained { pid, spawned: false });
        }

        if let Some(name) = &spec.name {
            let processes = self.backend.enumerate_processes()?;
            if let Some(pid) = find_pid_by_name(&processes, name) {
                debug!("resolved {name} to pid {pid}");
                return Ok(Obtained { pid, spawned: false });
            }
            if spec.gate.is_none() && spec.spawn.is_none() {
                return Err(SessionError::ProcessNotFound(name.clone()));
            }
            warn!("No running process named {name}, falling back");
        }

        if let Some(identifier) = &spec.gate {
            self.console.info(format!("Waiting for {identifier} to spawn..."));
            let process = self.backend.wait_for_spawn(identifier)?;
            return Ok(Obtained { pid: process.pid, spawned: process.suspended });
        }

        let Some(request) = &spec.spawn else {
            return Err(SessionError::MissingTarget);
        };
        let pid = self.backend.spawn(&request.program, &request.argv())?;
        debug!("spawned {} as pid {pid}", request.program);
        Ok(Obtained { pid, spawned: true })
    }

    /// Bind the session to the resolved process
    pub fn attach(&mut self, target: Obtained, detached: DetachNotifier) -> Result<(), SessionError> {
        self.expect_state(SessionState::Attaching, "attach")?;
        if self.device.is_none() {
            return Err(SessionError::DeviceNotFound);
        }

        self.backend.attach(target.pid, detached)?;
        self.session_bound = true;
        self.target = Some(target);
        self.state = SessionState::Attached;
        self.console.info(format!("Attached to the process with PID => {}", target.pid));
        Ok(())
    }

    /// Inject the agent. A session holds at most one live channel.
    pub fn load(&mut self, source: &str, sink: EnvelopeSink) -> Result<Arc<AgentChannel>, SessionError> {
        if let (Some(_), Some(target)) = (&self.channel, self.target) {
            return Err(SessionError::AgentAlreadyLoaded(target.pid));
        }
        self.expect_state(SessionState::Attached, "load the agent")?;

        let transport = self.backend.load_agent(source, sink)?;
        let channel = Arc::new(AgentChannel::new(transport));
        self.channel = Some(channel.clone());
        self.state = SessionState::Loaded;
        self.console.info("Loaded script to the process");
        Ok(channel)
    }

    /// Resume a spawned target; attached targets are already running
    pub fn start(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Loaded, "start")?;
        if let Some(target) = self.target.filter(|t| t.spawned) {
            self.backend.resume(target.pid)?;
            self.console.info("Resumed process");
        }
        self.state = SessionState::Running;
        Ok(())
    }

    fn expect_state(&self, expected: SessionState, action: &'static str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { action, state: self.state })
        }
    }
}

impl Teardown for Session {
    fn unload_agent(&mut self) {
        let Some(channel) = &self.channel else {
            return;
        };
        match channel.unload() {
            Ok(true) => self.console.info("Script unloaded"),
            Ok(false) => {}
            Err(e) => self.console.error(format!("Failed to unload script: {e}")),
        }
    }

    fn mark_agent_detached(&mut self) {
        if let Some(channel) = &self.channel {
            channel.mark_detached();
        }
    }

    fn release_session(&mut self) {
        if std::mem::take(&mut self.session_bound) {
            self.backend.release_session();
            debug!("session released");
        }
    }

    fn release_device(&mut self) {
        if self.device.take().is_some() {
            self.backend.release_device();
            debug!("device released");
        }
        self.state = SessionState::Ended;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Ended {
            return;
        }
        debug!("session dropped while {}, releasing", self.state);
        self.unload_agent();
        self.release_session();
        self.release_device();
    }
}
