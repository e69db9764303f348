//! Recursive text rendering of [`DynValue`]s
//!
//! Output shape, one line per node:
//!
//! ```text
//! key =>              mapping, children one tab deeper
//! key => [            sequence, children keyed by index
//! ]
//! key => value        scalar
//! ```

use std::fmt::Write;

use super::value::DynValue;

/// Render `value` under `key`, starting at indentation level zero
pub fn render(key: &str, value: &DynValue) -> String {
    let mut out = String::new();
    render_into(key, value, "", &mut out);
    out
}

/// Render `value` into `out` at the given indentation.
///
/// An empty `key` is the root: a root mapping emits no header line, and its
/// children start one level deeper.
pub fn render_into(key: &str, value: &DynValue, indent: &str, out: &mut String) {
    let child_indent = format!("{indent}\t");
    match value {
        DynValue::Mapping(entries) => {
            if !key.is_empty() {
                let _ = writeln!(out, "{indent}{key} => ");
            }
            for (k, v) in entries {
                render_into(k, v, &child_indent, out);
            }
        }
        DynValue::Sequence(items) => {
            let _ = writeln!(out, "{indent}{key} => [");
            for (i, item) in items.iter().enumerate() {
                render_into(&i.to_string(), item, &child_indent, out);
            }
            let _ = writeln!(out, "{indent}]");
        }
        DynValue::Scalar(scalar) => {
            let _ = writeln!(out, "{indent}{key} => {scalar}");
        }
    }
}
