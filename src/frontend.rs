//! Sinks for provider output.
//!
//! Providers report through a [`Frontend`] rather than printing. Messages
//! arrive either whole (`info`/`error`) or as raw chunks streamed from a
//! subprocess (`partial_info`/`partial_error`), which are reassembled into
//! lines by a [`LineBuffer`].

use crate::ui::UserInterface;

/// Receiver for messages produced while preparing a project.
pub trait Frontend {
    /// Log an info-level message.
    fn info(&mut self, message: &str);

    /// Log an error-level message.
    ///
    /// If the caller also returns a status, the same text belongs in that
    /// status's errors.
    fn error(&mut self, message: &str);

    /// Receive a chunk of streamed standard output.
    fn partial_info(&mut self, chunk: &str);

    /// Receive a chunk of streamed standard error.
    fn partial_error(&mut self, chunk: &str);

    /// Emit whatever is left of an unterminated streamed line.
    fn flush_partial(&mut self) {}
}

/// Reassembles streamed chunks into complete lines.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let mut line: String = self.pending.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Take the unterminated tail, if any.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// A frontend that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFrontend;

impl Frontend for NullFrontend {
    fn info(&mut self, _message: &str) {}
    fn error(&mut self, _message: &str) {}
    fn partial_info(&mut self, _chunk: &str) {}
    fn partial_error(&mut self, _chunk: &str) {}
}

/// Forwards to another frontend while remembering every error.
pub struct ErrorRecorder<'a> {
    underlying: &'a mut dyn Frontend,
    errors: Vec<String>,
}

impl<'a> ErrorRecorder<'a> {
    /// Wrap `underlying`.
    pub fn new(underlying: &'a mut dyn Frontend) -> Self {
        Self {
            underlying,
            errors: Vec::new(),
        }
    }

    /// Take the errors recorded so far.
    pub fn pop_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }
}

impl Frontend for ErrorRecorder<'_> {
    fn info(&mut self, message: &str) {
        self.underlying.info(message);
    }

    fn error(&mut self, message: &str) {
        self.errors.push(message.to_string());
        self.underlying.error(message);
    }

    fn partial_info(&mut self, chunk: &str) {
        self.underlying.partial_info(chunk);
    }

    fn partial_error(&mut self, chunk: &str) {
        self.underlying.partial_error(chunk);
    }

    fn flush_partial(&mut self) {
        self.underlying.flush_partial();
    }
}

/// Keeps every message; used by tests and by callers that report later.
#[derive(Debug, Default, Clone)]
pub struct CollectingFrontend {
    /// Info messages, including completed streamed stdout lines.
    pub infos: Vec<String>,
    /// Error messages, including completed streamed stderr lines.
    pub errors: Vec<String>,
    out: LineBuffer,
    err: LineBuffer,
}

impl CollectingFrontend {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if any info line contains `needle`.
    pub fn has_info(&self, needle: &str) -> bool {
        self.infos.iter().any(|m| m.contains(needle))
    }

    /// True if any error line contains `needle`.
    pub fn has_error(&self, needle: &str) -> bool {
        self.errors.iter().any(|m| m.contains(needle))
    }
}

impl Frontend for CollectingFrontend {
    fn info(&mut self, message: &str) {
        self.infos.push(message.to_string());
    }

    fn error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    fn partial_info(&mut self, chunk: &str) {
        let lines = self.out.push(chunk);
        self.infos.extend(lines);
    }

    fn partial_error(&mut self, chunk: &str) {
        let lines = self.err.push(chunk);
        self.errors.extend(lines);
    }

    fn flush_partial(&mut self) {
        if let Some(rest) = self.out.take_remainder() {
            self.infos.push(rest);
        }
        if let Some(rest) = self.err.take_remainder() {
            self.errors.push(rest);
        }
    }
}

/// Routes provider output to a [`UserInterface`].
///
/// Streamed subprocess output is only shown in verbose mode.
pub struct UiFrontend<'a> {
    ui: &'a mut dyn UserInterface,
    out: LineBuffer,
    err: LineBuffer,
}

impl<'a> UiFrontend<'a> {
    /// Wrap a UI.
    pub fn new(ui: &'a mut dyn UserInterface) -> Self {
        Self {
            ui,
            out: LineBuffer::new(),
            err: LineBuffer::new(),
        }
    }

    fn show_streamed(&mut self, line: &str) {
        if self.ui.output_mode().shows_command_output() {
            self.ui.message(&format!("  {}", line));
        }
    }
}

impl Frontend for UiFrontend<'_> {
    fn info(&mut self, message: &str) {
        self.ui.message(message);
    }

    fn error(&mut self, message: &str) {
        self.ui.error(message);
    }

    fn partial_info(&mut self, chunk: &str) {
        for line in self.out.push(chunk) {
            self.show_streamed(&line);
        }
    }

    fn partial_error(&mut self, chunk: &str) {
        for line in self.err.push(chunk) {
            self.show_streamed(&line);
        }
    }

    fn flush_partial(&mut self) {
        let rest: Vec<String> = [self.out.take_remainder(), self.err.take_remainder()]
            .into_iter()
            .flatten()
            .collect();
        for line in rest {
            self.show_streamed(&line);
        }
    }
}
