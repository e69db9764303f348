//! Operator-facing output
//!
//! Every line shown to the operator goes through [`Console`]: a short coloured
//! prefix per level on the terminal, and (with `--output`) a timestamped copy
//! appended to a file. Internal diagnostics use the `log` facade instead.

use chrono::{Local, SecondsFormat};
use crossterm::style::Stylize;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Width of the separator line closing every record
pub const SEPARATOR_WIDTH: usize = 80;

/// The separator line itself
pub fn separator() -> String {
    "=".repeat(SEPARATOR_WIDTH)
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn file_tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERRO",
        }
    }
}

#[derive(Debug, Default)]
pub struct Console {
    file: Option<Mutex<File>>,
}

impl Console {
    /// Console without a file copy
    pub fn new() -> Self {
        Self { file: None }
    }

    /// Console that also appends to `path` (created if missing)
    pub fn with_output(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Some(Mutex::new(file)) })
    }

    pub fn info(&self, msg: impl Display) {
        let msg = msg.to_string();
        println!("{}  {msg}", "⚡".green());
        self.append_line(Level::Info, &msg);
    }

    pub fn warn(&self, msg: impl Display) {
        let msg = msg.to_string();
        println!("{}  {msg}", "⚠".yellow());
        self.append_line(Level::Warn, &msg);
    }

    pub fn error(&self, msg: impl Display) {
        let msg = msg.to_string();
        eprintln!("{}  {msg}", "❗️".red());
        self.append_line(Level::Error, &msg);
    }

    /// Write one rendered agent record.
    ///
    /// `body` is the complete record including its trailing separator line.
    /// It is written to stdout with a single locked write so that records
    /// produced concurrently never interleave.
    pub fn record(&self, body: &str) {
        let prefix = "✅".magenta();
        let mut rendered = String::with_capacity(body.len() + 64);
        for line in body.lines() {
            if line.is_empty() || line.starts_with('=') {
                rendered.push_str(line);
            } else {
                rendered.push_str(&format!("{prefix}  {line}"));
            }
            rendered.push('\n');
        }
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let _ = out.write_all(rendered.as_bytes());
        let _ = out.flush();

        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = write!(file, "{}\nSCRI: {body}", timestamp()) {
                log::warn!("Failed to write record to output file: {e}");
            }
        }
    }

    fn append_line(&self, level: Level, msg: &str) {
        let Some(file) = &self.file else {
            return;
        };
        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = format!("{}\n{}: {msg}\n{}\n", timestamp(), level.file_tag(), separator());
        if let Err(e) = file.write_all(entry.as_bytes()) {
            log::warn!("Failed to write to output file: {e}");
        }
    }
}

fn timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}
