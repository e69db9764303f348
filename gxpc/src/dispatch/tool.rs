//! External decoder invocation (`jlutil`)
//!
//! The agent cannot decode `bplist16` payloads itself. It sends them here
//! base64-encoded; we write the bytes to a scoped temp file, run the decoder
//! with the file path as its only argument and hand back the combined output.
//!
//! The temp file is removed on every exit path, including decode and spawn
//! failures. The call is synchronous with no timeout.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::debug;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use super::envelope::escape_json_text;
use crate::domain::ToolError;

/// Default decoder, looked up on `PATH`
pub const DEFAULT_TOOL: &str = "jlutil";

#[derive(Debug, Clone)]
pub struct ToolRunner {
    program: String,
    temp_dir: PathBuf,
}

impl ToolRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), temp_dir: std::env::temp_dir() }
    }

    /// Create temp files in `dir` instead of the system temp directory
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Decode `data`, run the tool on it and return its output escaped for a
    /// JSON string literal.
    pub fn run(&self, data: &str) -> Result<String, ToolError> {
        let bytes = STANDARD.decode(data.trim())?;

        let mut file = tempfile::Builder::new().prefix("gxpc-").tempfile_in(&self.temp_dir)?;
        file.write_all(&bytes)?;
        file.flush()?;
        // close our handle; the path is deleted when `path` drops
        let path = file.into_temp_path();

        debug!("running {} on {} ({} bytes)", self.program, path.display(), bytes.len());
        let output = Command::new(&self.program)
            .arg(&*path)
            .output()
            .map_err(|source| ToolError::Spawn { tool: self.program.clone(), source })?;

        if !output.status.success() {
            return Err(ToolError::ExitStatus { tool: self.program.clone(), status: output.status });
        }

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(escape_json_text(&String::from_utf8_lossy(&combined)))
    }
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL)
    }
}
