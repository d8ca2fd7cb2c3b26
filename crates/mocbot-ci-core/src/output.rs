//! Captured output of delegate steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A line of log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

impl LogLine {
    pub fn new(stream: LogStream, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Output collected from a finished step.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub lines: Vec<LogLine>,
    pub exit_code: Option<i64>,
}

impl CapturedOutput {
    pub fn push(&mut self, line: LogLine) {
        self.lines.push(line);
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout only, newline-joined.
    pub fn stdout(&self) -> String {
        self.joined(|s| s == LogStream::Stdout)
    }

    /// Both streams in arrival order, newline-joined.
    pub fn combined(&self) -> String {
        self.joined(|_| true)
    }

    fn joined(&self, keep: impl Fn(LogStream) -> bool) -> String {
        let mut out = String::new();
        for line in self.lines.iter().filter(|l| keep(l.stream)) {
            out.push_str(&line.content);
            out.push('\n');
        }
        out
    }
}
