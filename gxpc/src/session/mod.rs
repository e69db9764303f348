//! Session lifecycle and shutdown
//!
//! - [`lifecycle`]: device selection, target resolution, attach, agent load,
//!   resume; owns the backend for the whole run.
//! - [`shutdown`]: the interrupt/detach race and the one-shot teardown.

pub mod lifecycle;
pub mod shutdown;

pub use lifecycle::{Obtained, Session, SpawnRequest, TargetSpec};
pub use shutdown::{
    interrupt_signal, wait_for_shutdown, CrashReport, DetachNotifier, DetachReason, DetachSignal,
    ShutdownCause, ShutdownCoordinator, Teardown,
};
