//! # Filter-Printer
//!
//! Turns `print` records from the agent into numbered text blocks for the
//! operator, after applying the connection-name / pid rules.
//!
//! ## Record layout
//!
//! ```text
//! 12) Name: xpc_connection_send_message
//! Connection Name: com.apple.locationd.registration
//! Process: locationd[87]
//! Data:
//!     key => value
//!     ...
//!
//! ================================================================================
//! ```
//!
//! ## Concurrency
//!
//! Records may be printed from several threads at once. The message counter
//! is an atomic owned by the [`FilterPrinter`], so every record that passes the
//! filters gets a distinct id and ids are handed out without gaps.

pub mod filter;
pub mod render;
pub mod value;

pub use filter::{FilterRules, PatternList};
pub use render::render;
pub use value::{DynValue, Scalar};

use serde::{Deserialize, Deserializer};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::console::{separator, Console};
use crate::domain::Pid;

/// Payload of a `print` message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintRecord {
    /// Hooked function name
    #[serde(default)]
    pub name: String,
    pub conn_name: String,
    #[serde(default)]
    pub proc_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_pid")]
    pub pid: Option<Pid>,
    #[serde(default)]
    pub dictionary: Option<DynValue>,
}

/// Pids arrive as JSON numbers, sometimes as integral floats. Anything else
/// counts as no pid.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn deserialize_pid<'de, D>(deserializer: D) -> Result<Option<Pid>, D::Error>
where
    D: Deserializer<'de>,
{
    let serde_json::Value::Number(number) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    let pid = number
        .as_u64()
        .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64));
    Ok(pid.and_then(|p| u32::try_from(p).ok()).map(Pid))
}

/// Outcome of rendering one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// Dropped by the filter rules
    Skipped,
    Record { id: u64, text: String },
}

#[derive(Debug)]
pub struct FilterPrinter {
    rules: FilterRules,
    counter: AtomicU64,
    console: Arc<Console>,
}

impl FilterPrinter {
    pub fn new(rules: FilterRules, console: Arc<Console>) -> Self {
        Self { rules, counter: AtomicU64::new(0), console }
    }

    /// Filter and render a record without emitting it
    pub fn render(&self, record: &PrintRecord) -> Rendered {
        if !self.rules.allows(&record.conn_name, record.pid) {
            return Rendered::Skipped;
        }

        let id = self.counter.fetch_add(1, Ordering::SeqCst);

        let mut text = String::new();
        let _ = writeln!(text, "{id}) Name: {}", record.name);
        let _ = writeln!(text, "Connection Name: {}", record.conn_name);
        if let Some(pid) = record.pid {
            let _ = writeln!(text, "Process: {}[{pid}]", record.proc_name.as_deref().unwrap_or(""));
        }
        text.push_str("Data:\n");
        if let Some(dictionary) = &record.dictionary {
            text.push_str(&render("", dictionary));
        }
        let _ = writeln!(text, "\n{}", separator());

        Rendered::Record { id, text }
    }

    /// Filter, render and emit a record. Returns the record id when printed.
    pub fn print(&self, record: &PrintRecord) -> Option<u64> {
        match self.render(record) {
            Rendered::Skipped => None,
            Rendered::Record { id, text } => {
                self.console.record(&text);
                Some(id)
            }
        }
    }

    /// Number of records printed so far
    pub fn printed(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn printer() -> FilterPrinter {
        FilterPrinter::new(FilterRules::default(), Arc::new(Console::new()))
    }

    #[test]
    fn test_record_layout() {
        let record: PrintRecord = serde_json::from_value(json!({
            "name": "xpc_connection_send_message",
            "connName": "com.apple.locationd.registration",
            "procName": "locationd",
            "pid": 87,
            "dictionary": {"msg": "hello"}
        }))
        .unwrap();

        let Rendered::Record { id, text } = printer().render(&record) else {
            panic!("record was filtered");
        };
        assert_eq!(id, 0);
        assert!(text.starts_with("0) Name: xpc_connection_send_message\n"));
        assert!(text.contains("Connection Name: com.apple.locationd.registration\n"));
        assert!(text.contains("Process: locationd[87]\n"));
        assert!(text.contains("Data:\n\tmsg => hello\n"));
        assert!(text.ends_with(&format!("\n{}\n", separator())));
    }

    #[test]
    fn test_float_pid_is_integral() {
        let record: PrintRecord =
            serde_json::from_value(json!({"connName": "x", "pid": 123.0})).unwrap();
        assert_eq!(record.pid, Some(Pid(123)));
    }

    #[test]
    fn test_wrong_typed_pid_is_absent() {
        for pid in [json!("123"), json!(true), json!([1]), json!(-5)] {
            let record: PrintRecord =
                serde_json::from_value(json!({"connName": "x", "pid": pid})).unwrap();
            assert_eq!(record.pid, None);
        }
    }

    #[test]
    fn test_conn_name_is_required() {
        let result = serde_json::from_value::<PrintRecord>(json!({"name": "f", "pid": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn test_ids_increase() {
        let printer = printer();
        let record: PrintRecord = serde_json::from_value(json!({"connName": "a"})).unwrap();
        assert_eq!(printer.print(&record), Some(0));
        assert_eq!(printer.print(&record), Some(1));
        assert_eq!(printer.printed(), 2);
    }
}
