//! # gxpc - XPC Sniffer Controller
//!
//! gxpc injects an instrumentation agent into a process on a local, USB or
//! remote device. The agent hooks XPC delivery and reports each intercepted
//! message back to the host. gxpc filters those reports by connection name
//! or PID, pretty-prints the decoded dictionaries, runs an external decoder
//! for opaque payloads, and keeps a JSON store of per-OS hook offsets that it
//! hands to the agent at start.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Target process (device)                       │
//! │              agent: XPC hooks, send()/recv()                    │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ envelopes {type, payload}
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          gxpc                                   │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Session    │──▶│   Agent      │──▶│  Dispatcher  │         │
//! │  │  Lifecycle   │   │   Channel    │   │   (thread)   │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │         │                  ▲                  │                 │
//! │         │                  │ jlutil reply     ├──▶ Filter-Printer
//! │         ▼                  └──────────────────┤                 │
//! │  ┌──────────────┐                             └──▶ Offset Store │
//! │  │  Shutdown    │  interrupt | detach → one teardown            │
//! │  └──────────────┘                                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`session`]: device selection, target resolution (pid, name, spawn gate,
//!   spawn), attach, agent load, resume; the interrupt/detach race and the
//!   one-shot teardown
//! - [`agent`]: the backend seam, the agent channel with its unload guard,
//!   and the inbound message queue. The Frida backend sits behind the `frida`
//!   cargo feature.
//! - [`dispatch`]: envelope decoding and routing on a dedicated thread
//! - [`printer`]: allow/deny rules, the global record counter, and the
//!   recursive dictionary renderer
//! - [`offsets`]: the JSON offset store and `--init`
//! - [`console`]: operator output with an optional file copy
//! - [`preflight`]: checks that run before any device interaction
//! - [`cli`]: command-line arguments
//! - [`domain`]: core types and error enums
//!
//! ## Typical Usage
//!
//! ```bash
//! # Build the agent once
//! cargo xtask build-agent
//!
//! # Sniff launchd on the USB device, only Apple services
//! gxpc -U -n launchd -w 'com.apple.*'
//!
//! # Spawn a binary suspended and print everything
//! gxpc -U -f /usr/bin/app -- --flag
//! ```

pub mod agent;
pub mod cli;
pub mod console;
pub mod dispatch;
pub mod domain;
pub mod offsets;
pub mod preflight;
pub mod printer;
pub mod process_lookup;
pub mod session;
