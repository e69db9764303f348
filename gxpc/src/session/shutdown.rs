//! # Shutdown Coordination
//!
//! A run ends on whichever comes first: an operator interrupt (Ctrl+C or
//! SIGTERM) or the session detaching on its own (process exit, crash, lost
//! device). Both sources feed one `tokio::select!`; the losing source is
//! simply never observed again.
//!
//! Teardown runs exactly once, guarded by a compare-and-swap flag:
//!
//! 1. unload the agent (skipped when the session already detached)
//! 2. release the session
//! 3. release the device

use log::{debug, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub summary: String,
    pub report: String,
}

/// Why the session went away without being asked to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachReason {
    pub reason: String,
    pub crash: Option<CrashReport>,
}

/// Single-slot, non-blocking detach notification.
///
/// Cloned into backend callbacks. Only the first [`notify`](Self::notify)
/// is delivered; later ones are dropped.
#[derive(Debug, Clone)]
pub struct DetachNotifier {
    slot: Arc<Mutex<Option<oneshot::Sender<DetachReason>>>>,
}

impl DetachNotifier {
    pub fn new() -> (Self, DetachSignal) {
        let (tx, rx) = oneshot::channel();
        (Self { slot: Arc::new(Mutex::new(Some(tx))) }, DetachSignal { rx })
    }

    /// Deliver the detach event. Returns `true` if this call delivered it.
    pub fn notify(&self, reason: DetachReason) -> bool {
        let sender = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        match sender {
            Some(tx) => tx.send(reason).is_ok(),
            None => {
                debug!("detach already signalled, dropping: {}", reason.reason);
                false
            }
        }
    }
}

/// Receiving side of a [`DetachNotifier`]
#[derive(Debug)]
pub struct DetachSignal {
    rx: oneshot::Receiver<DetachReason>,
}

impl DetachSignal {
    /// Resolve when the session detaches. If every notifier is dropped
    /// without firing, this never resolves.
    pub async fn wait(self) -> DetachReason {
        match self.rx.await {
            Ok(reason) => reason,
            Err(_) => std::future::pending().await,
        }
    }
}

/// The event that ended the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    Interrupted,
    Detached(DetachReason),
}

/// Wait for the first of `interrupt` and `detached`
pub async fn wait_for_shutdown<I>(interrupt: I, detached: DetachSignal) -> ShutdownCause
where
    I: Future<Output = ()>,
{
    tokio::select! {
        () = interrupt => ShutdownCause::Interrupted,
        reason = detached.wait() => ShutdownCause::Detached(reason),
    }
}

/// Resolve on Ctrl+C, or SIGTERM on unix
pub async fn interrupt_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Resources released at the end of a run, in this order
pub trait Teardown {
    fn unload_agent(&mut self);

    /// The agent went away with the session; nothing left to unload
    fn mark_agent_detached(&mut self);

    fn release_session(&mut self);

    fn release_device(&mut self);
}

/// One-shot teardown guard
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    fired: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the teardown sequence for `cause`.
    ///
    /// Only the first call does anything; it returns `true`. Every later call,
    /// whatever its cause, returns `false` without touching `target`.
    pub fn teardown<T: Teardown + ?Sized>(&self, cause: &ShutdownCause, target: &mut T) -> bool {
        if self.fired.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            debug!("teardown already ran, ignoring {cause:?}");
            return false;
        }

        match cause {
            ShutdownCause::Interrupted => target.unload_agent(),
            ShutdownCause::Detached(_) => target.mark_agent_detached(),
        }
        target.release_session();
        target.release_device();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}
