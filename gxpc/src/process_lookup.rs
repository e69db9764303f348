//! Resolve a process name to a PID from a live process enumeration.

use crate::domain::{Pid, ProcessEntry};

/// First process whose name is exactly `name` (case-sensitive).
///
/// Enumeration order decides between several processes with the same name.
pub fn find_pid_by_name(processes: &[ProcessEntry], name: &str) -> Option<Pid> {
    processes.iter().find(|p| p.name == name).map(|p| p.pid)
}

/// PIDs in `current` that were not in `baseline` and carry `name`.
///
/// Used by polling spawn gates: the baseline is the process list taken when
/// the gate was armed.
pub fn new_processes_named<'a>(
    baseline: &'a [ProcessEntry],
    current: &'a [ProcessEntry],
    name: &'a str,
) -> impl Iterator<Item = Pid> + 'a {
    current
        .iter()
        .filter(move |p| p.name == name && !baseline.iter().any(|b| b.pid == p.pid))
        .map(|p| p.pid)
}
