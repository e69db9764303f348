//! Shared test doubles: a scriptable backend that records every call

#![allow(dead_code)]

use serde_json::Value;
use std::sync::{Arc, Mutex};

use gxpc::agent::{AgentTransport, Backend, DeviceSelector, EnvelopeSink};
use gxpc::console::Console;
use gxpc::domain::{BackendError, DeviceInfo, DeviceKind, Pid, ProcessEntry, SpawnedProcess};
use gxpc::session::DetachNotifier;

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<String>,
    posts: Vec<String>,
    invocations: Vec<(String, Value)>,
    unloads: usize,
    notifier: Option<DetachNotifier>,
    sink: Option<EnvelopeSink>,
}

/// Read side of a [`MockBackend`], usable after the backend moved into a session
#[derive(Debug, Clone, Default)]
pub struct MockHandle(Arc<Mutex<Recorded>>);

impl MockHandle {
    fn with<R>(&self, f: impl FnOnce(&mut Recorded) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|r| r.calls.clone())
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.with(|r| r.calls.iter().filter(|c| c.starts_with(prefix)).count())
    }

    pub fn posts(&self) -> Vec<String> {
        self.with(|r| r.posts.clone())
    }

    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.with(|r| r.invocations.clone())
    }

    pub fn unloads(&self) -> usize {
        self.with(|r| r.unloads)
    }

    /// Notifier handed to `attach`
    pub fn notifier(&self) -> Option<DetachNotifier> {
        self.with(|r| r.notifier.clone())
    }

    /// Sink handed to `load_agent`
    pub fn sink(&self) -> Option<EnvelopeSink> {
        self.with(|r| r.sink.clone())
    }

    fn record(&self, call: impl Into<String>) {
        let call = call.into();
        self.with(|r| r.calls.push(call));
    }
}

pub struct MockBackend {
    pub devices: Vec<DeviceInfo>,
    pub processes: Vec<ProcessEntry>,
    pub spawn_pid: Pid,
    pub gated: SpawnedProcess,
    pub fail_attach: bool,
    pub fail_load: bool,
    handle: MockHandle,
}

impl MockBackend {
    /// One local and one USB device, no processes
    pub fn new() -> (Self, MockHandle) {
        let handle = MockHandle::default();
        let backend = Self {
            devices: vec![device("local", "Local System", DeviceKind::Local), device("abc123", "iPhone", DeviceKind::Usb)],
            processes: Vec::new(),
            spawn_pid: Pid(4242),
            gated: SpawnedProcess { pid: Pid(777), suspended: true },
            fail_attach: false,
            fail_load: false,
            handle: handle.clone(),
        };
        (backend, handle)
    }

    pub fn with_processes(mut self, processes: &[(u32, &str)]) -> Self {
        self.processes = processes.iter().map(|&(pid, name)| ProcessEntry { pid: Pid(pid), name: name.to_string() }).collect();
        self
    }
}

pub fn device(id: &str, name: &str, kind: DeviceKind) -> DeviceInfo {
    DeviceInfo { id: id.to_string(), name: name.to_string(), kind }
}

pub fn console() -> Arc<Console> {
    Arc::new(Console::new())
}

impl Backend for MockBackend {
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>, BackendError> {
        self.handle.record("enumerate_devices");
        Ok(self.devices.clone())
    }

    fn open_device(&mut self, selector: &DeviceSelector) -> Result<Option<DeviceInfo>, BackendError> {
        self.handle.record("open_device");
        Ok(self
            .devices
            .iter()
            .find(|d| match selector {
                DeviceSelector::Id(id) => &d.id == id,
                DeviceSelector::Remote(_) => d.kind == DeviceKind::Remote,
                DeviceSelector::Usb => d.kind == DeviceKind::Usb,
                DeviceSelector::Local => d.kind == DeviceKind::Local,
            })
            .cloned())
    }

    fn enumerate_processes(&mut self) -> Result<Vec<ProcessEntry>, BackendError> {
        self.handle.record("enumerate_processes");
        Ok(self.processes.clone())
    }

    fn spawn(&mut self, program: &str, argv: &[String]) -> Result<Pid, BackendError> {
        self.handle.record(format!("spawn {program} {}", argv.join(" ")));
        Ok(self.spawn_pid)
    }

    fn wait_for_spawn(&mut self, identifier: &str) -> Result<SpawnedProcess, BackendError> {
        self.handle.record(format!("wait_for_spawn {identifier}"));
        Ok(self.gated)
    }

    fn attach(&mut self, pid: Pid, detached: DetachNotifier) -> Result<(), BackendError> {
        self.handle.record(format!("attach {pid}"));
        if self.fail_attach {
            return Err(BackendError::operation("attach", "process not found"));
        }
        self.handle.with(|r| r.notifier = Some(detached));
        Ok(())
    }

    fn resume(&mut self, pid: Pid) -> Result<(), BackendError> {
        self.handle.record(format!("resume {pid}"));
        Ok(())
    }

    fn load_agent(
        &mut self,
        _source: &str,
        sink: EnvelopeSink,
    ) -> Result<Box<dyn AgentTransport>, BackendError> {
        self.handle.record("load_agent");
        if self.fail_load {
            return Err(BackendError::operation("load", "script error"));
        }
        self.handle.with(|r| r.sink = Some(sink));
        Ok(Box::new(MockTransport { handle: self.handle.clone() }))
    }

    fn release_session(&mut self) {
        self.handle.record("release_session");
    }

    fn release_device(&mut self) {
        self.handle.record("release_device");
    }
}

/// Transport that records posts, calls and unloads
pub struct MockTransport {
    handle: MockHandle,
}

impl MockTransport {
    pub fn new() -> (Self, MockHandle) {
        let handle = MockHandle::default();
        (Self { handle: handle.clone() }, handle)
    }
}

impl AgentTransport for MockTransport {
    fn post(&self, message: &str) -> Result<(), BackendError> {
        self.handle.with(|r| r.posts.push(message.to_string()));
        Ok(())
    }

    fn call(&self, procedure: &str, argument: Value) -> Result<Value, BackendError> {
        self.handle.with(|r| r.invocations.push((procedure.to_string(), argument)));
        Ok(Value::Null)
    }

    fn unload(&self) -> Result<(), BackendError> {
        self.handle.with(|r| r.unloads += 1);
        Ok(())
    }
}
