//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep process IDs, device identities and the
//! session state machine explicit in function signatures.

use std::fmt;

/// Process ID
///
/// Represents a process ID on the instrumented device (not on the host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Pid(pid)
    }
}

/// How the host reaches a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Local,
    Usb,
    Remote,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Local => "local",
            DeviceKind::Usb => "usb",
            DeviceKind::Remote => "remote",
        };
        f.write_str(name)
    }
}

/// A device as reported by the instrumentation backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// One entry of a live process enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: Pid,
    pub name: String,
}

/// A process that appeared through spawning or spawn gating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedProcess {
    pub pid: Pid,
    /// Suspended processes must be resumed once the agent is loaded
    pub suspended: bool,
}

/// Session state machine
///
/// `Idle → Attaching → Attached → Loaded → Running → Ended`. `Ended` is
/// terminal and is entered exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Attaching,
    Attached,
    Loaded,
    Running,
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Attaching => "attaching",
            SessionState::Attached => "attached",
            SessionState::Loaded => "loaded",
            SessionState::Running => "running",
            SessionState::Ended => "ended",
        };
        f.write_str(name)
    }
}
