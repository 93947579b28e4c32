//! Terminal output
//!
//! Human mode prints status lines with a check or cross prefix. JSON mode
//! prints one document per command so output can be piped into `jq`;
//! decorative lines are suppressed there.

use foldsync_ipc::AckOutcome;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct Output {
    format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("\u{2713} {message}"),
            OutputFormat::Json => println!("{}", json!({"success": true, "message": message})),
        }
    }

    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Human => eprintln!("\u{2717} Error: {message}"),
            OutputFormat::Json => eprintln!("{}", json!({"success": false, "error": message})),
        }
    }

    pub fn warn(&self, message: &str) {
        match self.format {
            OutputFormat::Human => eprintln!("\u{26a0} Warning: {message}"),
            OutputFormat::Json => eprintln!("{}", json!({"level": "warning", "message": message})),
        }
    }

    /// Indented detail line, human mode only
    pub fn note(&self, message: &str) {
        if self.format == OutputFormat::Human {
            println!("  {message}");
        }
    }

    /// Pretty JSON document, JSON mode only
    pub fn json(&self, value: &Value) {
        if self.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
        }
    }

    /// Reports a command acknowledgement
    ///
    /// `details` is merged into the JSON document next to the outcome.
    pub fn ack(&self, outcome: AckOutcome, applied: &str, no_op: &str, details: Value) {
        if self.is_json() {
            let mut document = details;
            if let Value::Object(map) = &mut document {
                map.insert("outcome".into(), json!(outcome));
            }
            self.json(&document);
            return;
        }
        match outcome {
            AckOutcome::Applied => self.success(applied),
            AckOutcome::NoOp => self.note(no_op),
        }
    }
}

/// Byte count in binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

pub fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}
