//! # gxpc - Main Entry Point
//!
//! Wires the pieces together for one run:
//! preflight → device → target → attach → load agent → dispatcher → resume
//! → `setup(offsets)` → wait for interrupt or detach → one teardown.
//!
//! `--init` and `--list` short-circuit before a target is needed.

use anyhow::{anyhow, Result};
use clap::Parser;
use log::debug;
use std::sync::Arc;

use gxpc::agent::{default_backend, EnvelopeSink};
use gxpc::cli::Args;
use gxpc::console::Console;
use gxpc::dispatch::{DispatchWorker, Dispatcher, ToolRunner};
use gxpc::domain::SessionError;
use gxpc::offsets;
use gxpc::preflight::{open_console, run_preflight_checks};
use gxpc::printer::FilterPrinter;
use gxpc::session::{
    interrupt_signal, wait_for_shutdown, DetachNotifier, DetachReason, Session, ShutdownCause,
    ShutdownCoordinator,
};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<SessionError>() {
        Some(SessionError::MissingTarget) => EXIT_USAGE,
        _ => EXIT_ERROR,
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();

    if args.init {
        let path = args.config_path();
        offsets::write_sample(&path)?;
        Console::new().info(format!("Created new config at {}", path.display()));
        return Ok(());
    }

    if args.list {
        let console = Arc::new(open_console(&args)?);
        let mut session = Session::new(default_backend()?, console);
        session.report_devices()?;
        return Ok(());
    }

    let prepared = run_preflight_checks(&args)?;
    let console = prepared.console.clone();

    let backend = default_backend()?;
    let mut session = Session::new(backend, console.clone());

    let spec = args.target_spec();
    if spec.is_empty() {
        return Err(SessionError::MissingTarget.into());
    }

    session.select_device(&args.device_selector())?;
    let target = session.obtain(&spec)?;

    let (notifier, detached) = DetachNotifier::new();
    session.attach(target, notifier)?;

    let (sink, inbound) = EnvelopeSink::channel();
    let channel = session.load(&prepared.agent_source, sink)?;

    let printer = Arc::new(FilterPrinter::new(prepared.rules, console.clone()));
    let dispatcher = Dispatcher::new(
        printer.clone(),
        ToolRunner::new(args.tool.clone()),
        prepared.config_path.clone(),
        channel.clone(),
        console.clone(),
    );
    let worker = DispatchWorker::spawn(dispatcher, inbound)
        .map_err(|e| anyhow!("Failed to start dispatcher: {e}"))?;

    session.start()?;

    channel.setup(prepared.offsets.as_ref(), &console);

    let cause = wait_for_shutdown(interrupt_signal(), detached).await;
    match &cause {
        ShutdownCause::Interrupted => console.info("Exiting..."),
        ShutdownCause::Detached(reason) => report_detach(&console, reason),
    }

    let coordinator = ShutdownCoordinator::new();
    coordinator.teardown(&cause, &mut session);

    let dispatched = worker.shutdown();
    debug!("dispatched {dispatched} envelopes, printed {} records", printer.printed());
    Ok(())
}

fn report_detach(console: &Console, detach: &DetachReason) {
    console.warn(format!("Session detached: {}", detach.reason));
    if let Some(crash) = &detach.crash {
        console.error(format!("Process crashed: {}", crash.summary));
        console.error(&crash.report);
    }
}
