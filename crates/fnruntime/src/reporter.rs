//! User-facing progress reporting, passed explicitly to runners.

use std::io::Write;

/// Sink for the human-readable pipeline transcript. Distinct from logging.
pub trait Reporter: Send {
    fn write_out(&mut self, text: &str);
    fn write_err(&mut self, text: &str);

    fn running(&mut self, name: &str) {
        self.write_out(&format!("[RUNNING] {:?}\n", name));
    }

    fn pass(&mut self, name: &str) {
        self.write_out(&format!("[PASS] {:?}\n", name));
    }

    fn fail(&mut self, name: &str) {
        self.write_out(&format!("[FAIL] {:?}\n", name));
    }
}

/// Writes to the process stdout/stderr.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn write_out(&mut self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn write_err(&mut self, text: &str) {
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(text.as_bytes());
    }
}

/// Sends the whole transcript to stderr, for runs whose stdout carries
/// resources.
#[derive(Debug, Default)]
pub struct StderrReporter;

impl Reporter for StderrReporter {
    fn write_out(&mut self, text: &str) {
        let _ = std::io::stderr().lock().write_all(text.as_bytes());
    }

    fn write_err(&mut self, text: &str) {
        self.write_out(text);
    }
}

/// Keeps the transcript in memory.
#[derive(Debug, Default, Clone)]
pub struct BufferReporter {
    pub out: String,
    pub err: String,
}

impl Reporter for BufferReporter {
    fn write_out(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn write_err(&mut self, text: &str) {
        self.err.push_str(text);
    }
}
