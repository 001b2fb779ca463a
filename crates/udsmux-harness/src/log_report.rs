//! JSON summary for `UDSMUX_LOG` files.

use std::path::Path;

use serde::Serialize;
use udsmux_membrane::structured_log::validate_log_file;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct LogReport {
    pub path: String,
    pub lines: usize,
    pub ok: bool,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub line: usize,
    pub field: String,
    pub message: String,
}

/// Validate every line of the log at `path`.
pub fn validate_log(path: &Path) -> Result<LogReport> {
    let (lines, errors) = validate_log_file(path)?;
    let violations: Vec<Violation> = errors
        .into_iter()
        .map(|e| Violation {
            line: e.line_number,
            field: e.field,
            message: e.message,
        })
        .collect();
    Ok(LogReport {
        path: path.display().to_string(),
        lines,
        ok: violations.is_empty(),
        violations,
    })
}
