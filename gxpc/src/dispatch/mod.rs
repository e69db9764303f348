//! # Message Dispatcher
//!
//! Decodes inbound envelopes from the agent and routes them.
//!
//! ## Routing
//!
//! - `log` → informational console line
//! - `send` / `print` → [`FilterPrinter`]
//! - `send` / `jlutil` → external decoder, result posted back to the agent
//! - `send` / `newOffset` → appended to the offset store
//! - `send` / anything else → warning with the raw payload
//! - anything else → error with the full envelope
//!
//! A malformed message is logged and skipped; it never ends the session.
//!
//! ## Threading
//!
//! Backend callbacks only push raw JSON into an [`EnvelopeSink`]. One
//! [`DispatchWorker`] thread drains the queue and dispatches synchronously in
//! delivery order, so a slow decoder run holds back later envelopes.
//!
//! [`EnvelopeSink`]: crate::agent::EnvelopeSink

pub mod envelope;
pub mod tool;

pub use envelope::{escape_json_text, tool_reply, Envelope, EnvelopeKind, SendMessage};
pub use tool::ToolRunner;

use crossbeam_channel::{Receiver, Sender};
use log::debug;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::agent::AgentChannel;
use crate::console::Console;
use crate::offsets;
use crate::printer::FilterPrinter;

/// What happened to one envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Forwarded agent log line
    Logged,
    /// Rendered with this record id
    Printed(u64),
    /// Dropped by the filter rules
    Filtered,
    /// Decoder output posted back to the agent
    ToolReplied,
    /// Decoder failed; nothing posted
    ToolFailed,
    OffsetStored,
    OffsetFailed,
    /// `send` with a type we do not handle
    UnknownSend,
    /// Payload did not match its schema
    Malformed,
    /// Neither `send` nor `log`
    Unrecognized,
}

pub struct Dispatcher {
    printer: Arc<FilterPrinter>,
    tool: ToolRunner,
    config_path: PathBuf,
    channel: Arc<AgentChannel>,
    console: Arc<Console>,
}

impl Dispatcher {
    pub fn new(
        printer: Arc<FilterPrinter>,
        tool: ToolRunner,
        config_path: PathBuf,
        channel: Arc<AgentChannel>,
        console: Arc<Console>,
    ) -> Self {
        Self { printer, tool, config_path, channel, console }
    }

    pub fn dispatch_raw(&self, raw: Value) -> DispatchOutcome {
        self.dispatch(&Envelope::from_raw(raw))
    }

    pub fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        match envelope.kind {
            EnvelopeKind::Log => {
                match &envelope.payload {
                    Value::String(line) => self.console.info(format!("SCRIPT: {line}")),
                    other => self.console.info(format!("SCRIPT: {other}")),
                }
                DispatchOutcome::Logged
            }
            EnvelopeKind::Send => match SendMessage::decode(&envelope.payload) {
                Ok(message) => self.dispatch_send(message),
                Err(e) => {
                    self.console.error(format!("Dropping malformed agent message: {e}"));
                    debug!("malformed envelope: {}", envelope.raw());
                    DispatchOutcome::Malformed
                }
            },
            EnvelopeKind::Other => {
                self.console.error(format!("SCRIPT: {}", envelope.raw()));
                DispatchOutcome::Unrecognized
            }
        }
    }

    fn dispatch_send(&self, message: SendMessage) -> DispatchOutcome {
        match message {
            SendMessage::Print(record) => match self.printer.print(&record) {
                Some(id) => DispatchOutcome::Printed(id),
                None => DispatchOutcome::Filtered,
            },
            SendMessage::ToolInvocation { data } => self.run_tool(&data),
            SendMessage::OffsetUpdate(update) => match offsets::append(&self.config_path, &update) {
                Ok(()) => {
                    self.console.info(format!(
                        "Saved new offsets for {} ({}) to {}",
                        update.machine,
                        update.version,
                        self.config_path.display()
                    ));
                    DispatchOutcome::OffsetStored
                }
                Err(e) => {
                    self.console.error(format!("Failed to save offsets: {e}"));
                    DispatchOutcome::OffsetFailed
                }
            },
            SendMessage::Unknown { kind, payload } => {
                debug!("unhandled send type {kind}");
                self.console.warn(format!("SCRIPT: {payload}"));
                DispatchOutcome::UnknownSend
            }
        }
    }

    fn run_tool(&self, data: &str) -> DispatchOutcome {
        let escaped = match self.tool.run(data) {
            Ok(escaped) => escaped,
            Err(e) => {
                self.console.error(format!("{}: {e}", self.tool.program()));
                return DispatchOutcome::ToolFailed;
            }
        };
        match self.channel.post(&tool_reply(&escaped)) {
            Ok(()) => DispatchOutcome::ToolReplied,
            Err(e) => {
                self.console.error(format!("Failed to post {} result: {e}", self.tool.program()));
                DispatchOutcome::ToolFailed
            }
        }
    }
}

/// Dispatcher thread draining the inbound queue
#[derive(Debug)]
pub struct DispatchWorker {
    stop: Sender<()>,
    handle: Option<JoinHandle<u64>>,
}

impl DispatchWorker {
    pub fn spawn(dispatcher: Dispatcher, inbound: Receiver<Value>) -> std::io::Result<Self> {
        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("gxpc-dispatch".to_string())
            .spawn(move || run_worker(&dispatcher, &inbound, &stop_rx))?;
        Ok(Self { stop, handle: Some(handle) })
    }

    /// Stop after the envelope in flight (if any) and return how many were
    /// dispatched
    pub fn shutdown(mut self) -> u64 {
        let _ = self.stop.try_send(());
        self.handle.take().map_or(0, |h| h.join().unwrap_or(0))
    }
}

fn run_worker(dispatcher: &Dispatcher, inbound: &Receiver<Value>, stop: &Receiver<()>) -> u64 {
    let mut dispatched = 0;
    loop {
        crossbeam_channel::select! {
            recv(inbound) -> raw => match raw {
                Ok(raw) => {
                    dispatcher.dispatch_raw(raw);
                    dispatched += 1;
                }
                // every sink dropped: the agent is gone
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        }
    }
    debug!("dispatcher stopped after {dispatched} envelopes");
    dispatched
}
