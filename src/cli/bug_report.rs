//! Reports for unexpected crashes.
//!
//! A panic hook records the panic and a backtrace; `main` then prints a
//! short notice and saves the details to a file in the temp directory.

use std::any::Any;
use std::backtrace::Backtrace;
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;

/// First line printed after a crash.
pub const BUG_NOTICE: &str = "An unexpected error occurred, most likely a bug in kapsel.";

static LAST_PANIC: Mutex<Option<String>> = Mutex::new(None);

/// Record panics instead of printing them.
pub fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        let details = format!("{}\n\n{}", info, Backtrace::force_capture());
        if let Ok(mut slot) = LAST_PANIC.lock() {
            *slot = Some(details);
        }
    }));
}

fn take_panic_details() -> Option<String> {
    LAST_PANIC.lock().ok().and_then(|mut slot| slot.take())
}

/// Text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Everything saved about one crash.
#[derive(Debug, Clone)]
pub struct BugReport {
    /// Command-line arguments.
    pub args: Vec<String>,
    /// The panic message.
    pub error: String,
    /// Panic location and backtrace, if recorded.
    pub details: Option<String>,
}

impl BugReport {
    /// Report text.
    pub fn render(&self, when: NaiveDate) -> String {
        let mut text = format!("Bug details for kapsel error on {}\n\n", when);
        text.push_str(&format!("args: {:?}\n\n", self.args));
        text.push_str(&format!("error: {}\n", self.error));
        if let Some(details) = &self.details {
            text.push('\n');
            text.push_str(details);
            text.push('\n');
        }
        text
    }

    /// Write the report to a new `bug_details_kapsel_<date>_*.txt` in `dir`.
    pub fn save(&self, dir: &Path) -> io::Result<PathBuf> {
        let when = chrono::Local::now().date_naive();
        let prefix = format!("bug_details_kapsel_{}_", when.format("%Y-%m-%d"));
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".txt")
            .tempfile_in(dir)?;
        file.write_all(self.render(when).as_bytes())?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(path)
    }
}

/// Tell the user about a crash and save the details.
pub fn report_panic(payload: &(dyn Any + Send), args: Vec<String>) {
    let report = BugReport {
        args,
        error: panic_message(payload),
        details: take_panic_details(),
    };
    eprintln!("{}", BUG_NOTICE);
    eprintln!("    (The error was: {})", report.error);
    match report.save(&std::env::temp_dir()) {
        Ok(path) => eprintln!("Details about the error were saved to {}", path.display()),
        Err(e) => eprintln!("Could not save details about the error: {}", e),
    }
}
