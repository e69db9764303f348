//! Frida-backed [`Backend`]
//!
//! Frida handles are not `Send` and borrow each other (device → session →
//! script), so they all live on one worker thread. The host talks to it with
//! [`Command`]s, each carrying its own reply sender. Nesting follows the
//! borrow chain: the device loop runs inside the manager loop, the session
//! loop inside the device loop.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use frida::{Device, DeviceManager, DeviceType, Frida, Message, ScriptHandler, ScriptOption, SpawnOptions};
use log::{debug, warn};
use serde_json::Value;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{AgentTransport, Backend, DeviceSelector, EnvelopeSink};
use crate::domain::{BackendError, DeviceInfo, DeviceKind, Pid, ProcessEntry, SpawnedProcess};
use crate::process_lookup::new_processes_named;
use crate::session::{DetachNotifier, DetachReason};

/// How often idle loops look at the session and the process list
const POLL_INTERVAL: Duration = Duration::from_millis(100);

type Reply<T> = Sender<Result<T, BackendError>>;

enum Command {
    EnumerateDevices(Reply<Vec<DeviceInfo>>),
    OpenDevice(DeviceSelector, Reply<Option<DeviceInfo>>),
    EnumerateProcesses(Reply<Vec<ProcessEntry>>),
    Spawn { program: String, argv: Vec<String>, reply: Reply<Pid> },
    WaitForSpawn { identifier: String, reply: Reply<SpawnedProcess> },
    Attach { pid: Pid, detached: DetachNotifier, reply: Reply<()> },
    Resume(Pid, Reply<()>),
    LoadAgent { source: String, sink: EnvelopeSink, reply: Reply<()> },
    Post(String, Reply<()>),
    Call { procedure: String, argument: Value, reply: Reply<Value> },
    Unload(Reply<()>),
    ReleaseSession,
    ReleaseDevice,
    Shutdown,
}

impl Command {
    /// Answer a command that is not valid at the current nesting level
    fn reject(self, message: &str) {
        match self {
            Self::EnumerateDevices(reply) => refuse(&reply, message),
            Self::OpenDevice(_, reply) => refuse(&reply, message),
            Self::EnumerateProcesses(reply) => refuse(&reply, message),
            Self::Spawn { reply, .. } => refuse(&reply, message),
            Self::WaitForSpawn { reply, .. } => refuse(&reply, message),
            Self::Attach { reply, .. }
            | Self::Resume(_, reply)
            | Self::LoadAgent { reply, .. }
            | Self::Post(_, reply)
            | Self::Unload(reply) => refuse(&reply, message),
            Self::Call { reply, .. } => refuse(&reply, message),
            Self::ReleaseSession | Self::ReleaseDevice | Self::Shutdown => {}
        }
    }
}

fn refuse<T>(reply: &Reply<T>, message: &str) {
    let _ = reply.send(Err(BackendError::operation("dispatch", message)));
}

/// What the enclosing loop should do after a nested loop returns
enum Flow {
    Continue,
    ReleaseDevice,
    Shutdown,
}

pub struct FridaBackend {
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl FridaBackend {
    /// Start the worker thread and initialize Frida on it
    pub fn start() -> Result<Self, BackendError> {
        let (commands, inbox) = crossbeam_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("gxpc-frida".to_string())
            .spawn(move || manager_loop(&inbox))
            .map_err(|e| BackendError::Unavailable(format!("failed to start frida worker: {e}")))?;
        Ok(Self { commands, worker: Some(worker) })
    }

    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, BackendError> {
        request(&self.commands, build)
    }
}

fn request<T>(commands: &Sender<Command>, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, BackendError> {
    let (reply, answer) = crossbeam_channel::bounded(1);
    commands.send(build(reply)).map_err(|_| BackendError::Disconnected)?;
    answer.recv().map_err(|_| BackendError::Disconnected)?
}

impl Backend for FridaBackend {
    fn enumerate_devices(&mut self) -> Result<Vec<DeviceInfo>, BackendError> {
        self.request(Command::EnumerateDevices)
    }

    fn open_device(&mut self, selector: &DeviceSelector) -> Result<Option<DeviceInfo>, BackendError> {
        let selector = selector.clone();
        self.request(|reply| Command::OpenDevice(selector, reply))
    }

    fn enumerate_processes(&mut self) -> Result<Vec<ProcessEntry>, BackendError> {
        self.request(Command::EnumerateProcesses)
    }

    fn spawn(&mut self, program: &str, argv: &[String]) -> Result<Pid, BackendError> {
        let (program, argv) = (program.to_string(), argv.to_vec());
        self.request(|reply| Command::Spawn { program, argv, reply })
    }

    fn wait_for_spawn(&mut self, identifier: &str) -> Result<SpawnedProcess, BackendError> {
        let identifier = identifier.to_string();
        self.request(|reply| Command::WaitForSpawn { identifier, reply })
    }

    fn attach(&mut self, pid: Pid, detached: DetachNotifier) -> Result<(), BackendError> {
        self.request(|reply| Command::Attach { pid, detached, reply })
    }

    fn resume(&mut self, pid: Pid) -> Result<(), BackendError> {
        self.request(|reply| Command::Resume(pid, reply))
    }

    fn load_agent(
        &mut self,
        source: &str,
        sink: EnvelopeSink,
    ) -> Result<Box<dyn AgentTransport>, BackendError> {
        let source = source.to_string();
        self.request(|reply| Command::LoadAgent { source, sink, reply })?;
        Ok(Box::new(FridaTransport { commands: self.commands.clone() }))
    }

    fn release_session(&mut self) {
        let _ = self.commands.send(Command::ReleaseSession);
    }

    fn release_device(&mut self) {
        let _ = self.commands.send(Command::ReleaseDevice);
    }
}

impl Drop for FridaBackend {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("frida worker panicked");
            }
        }
    }
}

/// Loaded script, reached through the worker
struct FridaTransport {
    commands: Sender<Command>,
}

impl AgentTransport for FridaTransport {
    fn post(&self, message: &str) -> Result<(), BackendError> {
        let message = message.to_string();
        request(&self.commands, |reply| Command::Post(message, reply))
    }

    fn call(&self, procedure: &str, argument: Value) -> Result<Value, BackendError> {
        let procedure = procedure.to_string();
        request(&self.commands, |reply| Command::Call { procedure, argument, reply })
    }

    fn unload(&self) -> Result<(), BackendError> {
        request(&self.commands, Command::Unload)
    }
}

/// Forwards script messages as raw JSON envelopes
struct EnvelopeForwarder {
    sink: EnvelopeSink,
}

impl ScriptHandler for EnvelopeForwarder {
    fn on_message(&mut self, message: Message, _data: Option<Vec<u8>>) {
        let raw = match message {
            Message::Send(msg) => serde_json::json!({ "type": "send", "payload": msg.payload.returns }),
            Message::Log(log) => serde_json::json!({ "type": "log", "payload": log.payload }),
            Message::Error(err) => serde_json::json!({
                "type": "error",
                "description": err.description,
                "fileName": err.file_name,
                "lineNumber": err.line_number,
                "columnNumber": err.column_number,
            }),
            // Raw `send()` payloads that frida-rs could not type
            Message::Other(value) => match value.get("data").and_then(Value::as_str) {
                Some(data) => serde_json::from_str(data).unwrap_or(value),
                None => value,
            },
        };
        if !self.sink.deliver(raw) {
            debug!("dispatcher gone, dropping agent message");
        }
    }
}

fn manager_loop(inbox: &Receiver<Command>) {
    // SAFETY: Frida is initialized exactly once, on this thread, and every
    // handle derived from it stays on this thread.
    #[allow(unsafe_code)]
    let frida = unsafe { Frida::obtain() };
    let manager = DeviceManager::obtain(&frida);

    while let Ok(command) = inbox.recv() {
        match command {
            Command::EnumerateDevices(reply) => {
                let devices = manager.enumerate_all_devices().iter().map(device_info).collect();
                let _ = reply.send(Ok(devices));
            }
            Command::OpenDevice(selector, reply) => match open_device(&manager, &selector) {
                Some(device) => {
                    let _ = reply.send(Ok(Some(device_info(&device))));
                    if let Flow::Shutdown = device_loop(inbox, device) {
                        break;
                    }
                }
                None => {
                    let _ = reply.send(Ok(None));
                }
            },
            Command::Shutdown => break,
            Command::ReleaseSession | Command::ReleaseDevice => {}
            other => other.reject("no device selected"),
        }
    }
    debug!("frida worker exiting");
}

fn open_device<'a>(manager: &'a DeviceManager<'a>, selector: &DeviceSelector) -> Option<Device<'a>> {
    let found = match selector {
        DeviceSelector::Id(id) => manager.get_device_by_id(id),
        DeviceSelector::Remote(host) => manager.get_remote_device(host),
        DeviceSelector::Usb => manager.get_device_by_type(DeviceType::USB),
        DeviceSelector::Local => manager.get_local_device(),
    };
    match found {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("no device for {selector:?}: {e}");
            None
        }
    }
}

fn device_info(device: &Device<'_>) -> DeviceInfo {
    let kind = match device.get_type() {
        DeviceType::Local => DeviceKind::Local,
        DeviceType::USB => DeviceKind::Usb,
        _ => DeviceKind::Remote,
    };
    DeviceInfo { id: device.get_id().to_string(), name: device.get_name().to_string(), kind }
}

fn processes(device: &Device<'_>) -> Vec<ProcessEntry> {
    device
        .enumerate_processes()
        .iter()
        .map(|p| ProcessEntry { pid: Pid(p.get_pid()), name: p.get_name().to_string() })
        .collect()
}

/// Poll the process list until a new process named `identifier` shows up
fn wait_for_launch(device: &Device<'_>, identifier: &str) -> SpawnedProcess {
    let baseline = processes(device);
    loop {
        std::thread::sleep(POLL_INTERVAL);
        let current = processes(device);
        if let Some(pid) = new_processes_named(&baseline, &current, identifier).next() {
            return SpawnedProcess { pid, suspended: false };
        }
    }
}

fn device_loop(inbox: &Receiver<Command>, mut device: Device<'_>) -> Flow {
    while let Ok(command) = inbox.recv() {
        match command {
            Command::EnumerateProcesses(reply) => {
                let _ = reply.send(Ok(processes(&device)));
            }
            Command::Spawn { program, argv, reply } => {
                let options = SpawnOptions::new().argv(&argv);
                let result = device
                    .spawn(&program, &options)
                    .map(Pid)
                    .map_err(|e| BackendError::operation("spawn", e));
                let _ = reply.send(result);
            }
            Command::WaitForSpawn { identifier, reply } => {
                let _ = reply.send(Ok(wait_for_launch(&device, &identifier)));
            }
            Command::Resume(pid, reply) => {
                let _ = reply.send(device.resume(pid.0).map_err(|e| BackendError::operation("resume", e)));
            }
            Command::Attach { pid, detached, reply } => match device.attach(pid.0) {
                Ok(session) => {
                    let _ = reply.send(Ok(()));
                    match session_loop(inbox, &device, &session, &detached) {
                        Flow::Continue => {}
                        flow => return flow,
                    }
                }
                Err(e) => {
                    let _ = reply.send(Err(BackendError::operation("attach", e)));
                }
            },
            Command::ReleaseDevice => return Flow::ReleaseDevice,
            Command::Shutdown => return Flow::Shutdown,
            Command::ReleaseSession => {}
            other => other.reject("no session attached"),
        }
    }
    Flow::Shutdown
}

fn session_loop(
    inbox: &Receiver<Command>,
    device: &Device<'_>,
    session: &frida::Session<'_>,
    detached: &DetachNotifier,
) -> Flow {
    let mut script: Option<frida::Script<'_>> = None;
    let mut reported = false;

    let flow = loop {
        let command = match inbox.recv_timeout(POLL_INTERVAL) {
            Ok(command) => command,
            Err(RecvTimeoutError::Timeout) => {
                if !reported && session.is_detached() {
                    reported = true;
                    detached.notify(DetachReason { reason: "session detached".to_string(), crash: None });
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break Flow::Shutdown,
        };

        match command {
            Command::LoadAgent { source, sink, reply } => {
                if script.is_some() {
                    let _ = reply.send(Err(BackendError::operation("load", "agent already loaded")));
                    continue;
                }
                let loaded = session
                    .create_script(&source, &mut ScriptOption::new())
                    .and_then(|mut s| {
                        s.handle_message(EnvelopeForwarder { sink })?;
                        s.load()?;
                        Ok(s)
                    });
                match loaded {
                    Ok(s) => {
                        script = Some(s);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(BackendError::operation("load", e)));
                    }
                }
            }
            Command::Post(message, reply) => {
                let result = match &script {
                    Some(s) => s.post(&message, None).map_err(|e| BackendError::operation("post", e)),
                    None => Err(BackendError::operation("post", "no agent loaded")),
                };
                let _ = reply.send(result);
            }
            Command::Call { procedure, argument, reply } => {
                let result = match &script {
                    Some(s) => s
                        .exports
                        .call(&procedure, Some(serde_json::json!([argument])))
                        .map(Option::unwrap_or_default)
                        .map_err(|e| BackendError::operation("call", e)),
                    None => Err(BackendError::operation("call", "no agent loaded")),
                };
                let _ = reply.send(result);
            }
            Command::Unload(reply) => {
                let result = match script.take() {
                    Some(s) => s.unload().map_err(|e| BackendError::operation("unload", e)),
                    None => Ok(()),
                };
                let _ = reply.send(result);
            }
            Command::Resume(pid, reply) => {
                let _ = reply.send(device.resume(pid.0).map_err(|e| BackendError::operation("resume", e)));
            }
            Command::EnumerateProcesses(reply) => {
                let _ = reply.send(Ok(processes(device)));
            }
            Command::ReleaseSession => break Flow::Continue,
            Command::ReleaseDevice => break Flow::ReleaseDevice,
            Command::Shutdown => break Flow::Shutdown,
            other => other.reject("a session is already attached"),
        }
    };

    drop(script);
    if !session.is_detached() {
        if let Err(e) = session.detach() {
            warn!("failed to detach session: {e}");
        }
    }
    flow
}
