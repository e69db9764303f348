//! # Agent Channel
//!
//! Boundary between the host and the instrumentation layer.
//!
//! - [`Backend`]: device and process operations (enumerate, spawn, attach,
//!   resume) plus loading the agent script into an attached process.
//! - [`AgentTransport`]: what a loaded agent offers (post, call, unload).
//! - [`AgentChannel`]: the host-side handle around a transport. It owns the
//!   one-shot unload guard so that unloading twice is harmless.
//! - [`EnvelopeSink`]: where the backend hands inbound messages. Backend
//!   callbacks only push raw JSON into a channel; decoding and routing happen
//!   on the dispatcher thread.

#[cfg(feature = "frida")]
pub mod frida_backend;

use crossbeam_channel::{Receiver, Sender};
use log::debug;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::console::Console;
use crate::domain::{BackendError, DeviceInfo, Pid, ProcessEntry, SpawnedProcess};
use crate::offsets::OffsetRecord;
use crate::session::DetachNotifier;

/// How to pick the device for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Device with this exact identifier
    Id(String),
    /// Remote frida-server at `host[:port]`
    Remote(String),
    /// First USB device
    Usb,
    /// The host itself
    Local,
}

/// Device/process layer of the instrumentation toolkit
pub trait Backend: Send {
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>, BackendError>;

    /// Open the device matching `selector`; `Ok(None)` when none matches
    fn open_device(&mut self, selector: &DeviceSelector) -> Result<Option<DeviceInfo>, BackendError>;

    fn enumerate_processes(&mut self) -> Result<Vec<ProcessEntry>, BackendError>;

    /// Spawn `program` suspended with the full `argv` (including `argv[0]`)
    fn spawn(&mut self, program: &str, argv: &[String]) -> Result<Pid, BackendError>;

    /// Block until a process matching `identifier` is launched
    fn wait_for_spawn(&mut self, identifier: &str) -> Result<SpawnedProcess, BackendError>;

    /// Bind a session to `pid`. `detached` fires if the session ends on its own.
    fn attach(&mut self, pid: Pid, detached: DetachNotifier) -> Result<(), BackendError>;

    fn resume(&mut self, pid: Pid) -> Result<(), BackendError>;

    /// Inject `source` into the attached process. Inbound messages go to `sink`
    /// from the moment the script exists, before `load` returns.
    fn load_agent(
        &mut self,
        source: &str,
        sink: EnvelopeSink,
    ) -> Result<Box<dyn AgentTransport>, BackendError>;

    /// Detach from the process. Must tolerate being called without a session.
    fn release_session(&mut self);

    /// Drop the device. Must tolerate being called without a device.
    fn release_device(&mut self);
}

/// Operations offered by a loaded agent
pub trait AgentTransport: Send + Sync {
    fn post(&self, message: &str) -> Result<(), BackendError>;

    fn call(
        &self,
        procedure: &str,
        argument: serde_json::Value,
    ) -> Result<serde_json::Value, BackendError>;

    fn unload(&self) -> Result<(), BackendError>;
}

/// Host-side handle to the loaded agent
pub struct AgentChannel {
    transport: Box<dyn AgentTransport>,
    unloaded: AtomicBool,
}

impl std::fmt::Debug for AgentChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentChannel").field("unloaded", &self.is_unloaded()).finish_non_exhaustive()
    }
}

impl AgentChannel {
    pub fn new(transport: Box<dyn AgentTransport>) -> Self {
        Self { transport, unloaded: AtomicBool::new(false) }
    }

    /// Send one message to the agent. No acknowledgement is modeled.
    pub fn post(&self, message: &str) -> Result<(), BackendError> {
        if self.is_unloaded() {
            return Err(BackendError::operation("post", "agent is unloaded"));
        }
        self.transport.post(message)
    }

    /// One-shot control call into the agent's exports
    pub fn call(
        &self,
        procedure: &str,
        argument: serde_json::Value,
    ) -> Result<serde_json::Value, BackendError> {
        if self.is_unloaded() {
            return Err(BackendError::operation("call", "agent is unloaded"));
        }
        self.transport.call(procedure, argument)
    }

    /// Hand the stored offsets (or `null`) to the agent's `setup` export.
    ///
    /// A failure is reported to the operator and the run goes on without
    /// offsets. Returns whether the call succeeded.
    pub fn setup(&self, offsets: Option<&OffsetRecord>, console: &Console) -> bool {
        let argument = match offsets.map(serde_json::to_value).transpose() {
            Ok(argument) => argument.unwrap_or(serde_json::Value::Null),
            Err(e) => {
                console.warn(format!("setup call failed: cannot encode offsets: {e}"));
                return false;
            }
        };
        match self.call("setup", argument) {
            Ok(reply) => {
                debug!("setup returned {reply}");
                true
            }
            Err(e) => {
                console.warn(format!("setup call failed: {e}"));
                false
            }
        }
    }

    /// Unload the agent. Only the first call does work; returns whether it did.
    pub fn unload(&self) -> Result<bool, BackendError> {
        if self.unloaded.swap(true, Ordering::SeqCst) {
            debug!("agent already unloaded, skipping");
            return Ok(false);
        }
        self.transport.unload().map(|()| true)
    }

    /// The session ended underneath us; the script is gone already
    pub fn mark_detached(&self) {
        self.unloaded.store(true, Ordering::SeqCst);
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::SeqCst)
    }
}

/// Producer side of the inbound message queue
#[derive(Debug, Clone)]
pub struct EnvelopeSink {
    tx: Sender<serde_json::Value>,
}

impl EnvelopeSink {
    /// Unbounded queue: delivery order is preserved and callbacks never block
    pub fn channel() -> (Self, Receiver<serde_json::Value>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    /// Hand one raw message to the dispatcher. Returns `false` once the
    /// dispatcher has gone away.
    pub fn deliver(&self, raw: serde_json::Value) -> bool {
        self.tx.send(raw).is_ok()
    }
}

/// Where `cargo xtask build-agent` writes the compiled agent
pub fn default_agent_path() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/agent/script.js"))
}

/// The backend compiled into this binary
#[cfg(feature = "frida")]
pub fn default_backend() -> Result<Box<dyn Backend>, BackendError> {
    Ok(Box::new(frida_backend::FridaBackend::start()?))
}

/// The backend compiled into this binary
#[cfg(not(feature = "frida"))]
pub fn default_backend() -> Result<Box<dyn Backend>, BackendError> {
    Err(BackendError::Unavailable(
        "gxpc was built without the `frida` feature; rebuild with `--features frida`".to_string(),
    ))
}
