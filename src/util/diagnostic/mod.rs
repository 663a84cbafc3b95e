//! 诊断收集
//!
//! Compiler and runtime messages accumulate here and are queried once per
//! build or run. The collector is passed by `&mut` rather than living in
//! process-wide state.
//!
//! # 消息格式
//!
//! ```text
//! file: main.script
//! line: 12 (5)
//! ERROR: Expected ';'
//! ```
//!
//! Information messages are never shown alone: the most recent one is held
//! and prefixed onto every following warning or error until another
//! information message replaces it.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Error,
    Warning,
    Information,
}

impl MessageKind {
    pub fn label(self) -> &'static str {
        match self {
            MessageKind::Error => "ERROR",
            MessageKind::Warning => "WARNING",
            MessageKind::Information => "INFO",
        }
    }
}

/// One message from the compiler or the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMessage {
    /// Script section (usually a file name)
    pub section: String,
    pub row: i32,
    pub col: i32,
    pub kind: MessageKind,
    pub text: String,
}

impl ScriptMessage {
    pub fn new(
        section: impl Into<String>,
        row: i32,
        col: i32,
        kind: MessageKind,
        text: impl Into<String>,
    ) -> Self {
        Self {
            section: section.into(),
            row,
            col,
            kind,
            text: text.into(),
        }
    }

    /// An error with no position, as reported by build and run plumbing.
    pub fn unpositioned(
        section: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(section, 0, 0, MessageKind::Error, text)
    }
}

impl fmt::Display for ScriptMessage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "file: {}\r\nline: {} ({})\r\n{}: {}\r\n\r\n",
            self.section,
            self.row.max(0),
            self.col.max(0),
            self.kind.label(),
            self.text
        )
    }
}

/// Batch of messages ready for presentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub title: String,
    pub body: String,
    /// Whether the batch counts as a failure
    pub failed: bool,
}

/// 诊断收集器
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    warnings: String,
    errors: String,
    /// Errors without a position; shown only when no positioned error exists
    line0: String,
    info: String,
    error_count: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message.
    pub fn push(
        &mut self,
        message: &ScriptMessage,
    ) {
        let text = message.to_string();
        match message.kind {
            MessageKind::Information => self.info = text,
            MessageKind::Error => {
                self.error_count += 1;
                let target = if message.row != 0 {
                    &mut self.errors
                } else {
                    &mut self.line0
                };
                target.push_str(&self.info);
                target.push_str(&text);
            }
            MessageKind::Warning => {
                self.warnings.push_str(&self.info);
                self.warnings.push_str(&text);
            }
        }
    }

    /// Record an unpositioned error for `section`.
    pub fn error(
        &mut self,
        section: &str,
        text: impl Into<String>,
    ) {
        self.push(&ScriptMessage::unpositioned(section, text));
    }

    /// Forget the held information message.
    pub fn clear_info(&mut self) {
        self.info.clear();
    }

    /// Move the held information message into the error buffer.
    ///
    /// Used when global initialisation fails: the engine explains the
    /// failure only through an information message.
    pub fn promote_info_to_errors(&mut self) {
        let info = std::mem::take(&mut self.info);
        self.errors.push_str(&info);
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn errors(&self) -> &str {
        &self.errors
    }

    pub fn warnings(&self) -> &str {
        &self.warnings
    }

    pub fn line0(&self) -> &str {
        &self.line0
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty() && self.line0.is_empty()
    }

    /// Build the report for everything collected so far and clear the
    /// buffers, so a second call only reports new messages.
    ///
    /// `show_warnings` prefixes warnings onto an error report; a report with
    /// no errors always consists of the warnings.
    pub fn report(
        &mut self,
        show_warnings: bool,
    ) -> Option<Report> {
        if self.is_empty() {
            return None;
        }

        let report = if self.error_count > 0 {
            let mut body = String::new();
            if show_warnings {
                body.push_str(&self.warnings);
            }
            if !self.errors.is_empty() {
                body.push_str(&self.errors);
            } else {
                body.push_str(&self.line0);
            }
            Report {
                title: "Compilation error".to_string(),
                body,
                failed: true,
            }
        } else {
            Report {
                title: "Compilation warnings".to_string(),
                body: self.warnings.clone(),
                failed: false,
            }
        };

        self.errors.clear();
        self.warnings.clear();
        self.line0.clear();
        self.error_count = 0;
        Some(report)
    }
}

/// Call stack of the most recent script exception, shared between the
/// contexts that raise and the scheduler that reports.
#[derive(Debug, Clone, Default)]
pub struct ExceptionSlot {
    inner: Arc<Mutex<String>>,
}

impl ExceptionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored call stack.
    pub fn record(
        &self,
        call_stack: impl Into<String>,
    ) {
        *self.inner.lock() = call_stack.into();
    }

    /// Current contents.
    pub fn get(&self) -> String {
        self.inner.lock().clone()
    }

    /// Take the contents, leaving the slot empty.
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests;
