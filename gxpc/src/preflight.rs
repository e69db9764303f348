//! Pre-flight checks for gxpc
//!
//! Everything that can fail without a device is checked here, before the
//! backend is touched: config path and contents, the agent script, filter
//! globs, and the output file. Errors carry the offending path and a hint.

use anyhow::{anyhow, bail, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::Args;
use crate::console::Console;
use crate::domain::ConfigError;
use crate::offsets::{self, OffsetRecord};
use crate::printer::FilterRules;

/// Inputs validated before the first device interaction
#[derive(Debug)]
pub struct Prepared {
    pub config_path: PathBuf,
    /// `None` when the config file does not exist yet
    pub offsets: Option<OffsetRecord>,
    pub agent_source: String,
    pub rules: FilterRules,
    pub console: Arc<Console>,
}

/// Run all pre-flight checks
pub fn run_preflight_checks(args: &Args) -> Result<Prepared> {
    let config_path = args.config_path();
    check_config_path(&config_path)?;
    let offsets = offsets::load_if_present(&config_path)?;

    let agent_source = read_agent_source(&args.agent_path())?;

    let rules = FilterRules::compile(
        args.whitelist.as_slice(),
        &args.blacklist,
        &args.whitelistp,
        &args.blacklistp,
    )?;

    let console = open_console(args)?;

    Ok(Prepared { config_path, offsets, agent_source, rules, console: Arc::new(console) })
}

/// Operator console, with the `--output` copy when requested
pub fn open_console(args: &Args) -> Result<Console> {
    match &args.output {
        Some(path) => Console::with_output(path)
            .map_err(|e| anyhow!("Failed to open output file {}: {e}", path.display())),
        None => Ok(Console::new()),
    }
}

/// The config may be missing, but it must be creatable later
pub fn check_config_path(path: &Path) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidPath { path: path.to_path_buf(), reason: reason.to_string() };
    if path.is_dir() {
        return Err(invalid("is a directory"));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            return Err(invalid("parent directory does not exist"));
        }
    }
    Ok(())
}

/// Read the compiled agent script
pub fn read_agent_source(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!(
            "Agent script not found: {}\n\n\
             Build it with: cargo xtask build-agent\n\
             or pass --agent <FILE>",
            path.display()
        );
    }
    let source = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read agent script {}: {e}", path.display()))?;
    if source.trim().is_empty() {
        bail!("Agent script {} is empty", path.display());
    }
    Ok(source)
}
