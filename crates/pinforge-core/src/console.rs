//! CI console protocol.
//!
//! Everything an operator or the surrounding CI system reads goes through
//! [`Console`]: echoed subprocess lines plus workflow-command markers
//! (`::group::`, `::endgroup::`, `::error::`, `::warning::`). Every write
//! is flushed so progress shows up as it happens.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Line-oriented, flushed writer for the console protocol.
#[derive(Clone)]
pub struct Console {
    out: Sink,
    err: Sink,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

/// In-memory copy of everything written to a capturing [`Console`].
#[derive(Clone, Default)]
pub struct Captured {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Captured {
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.0.lock().unwrap_or_else(|p| p.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Console {
    /// Console on the process's stdout and stderr.
    pub fn stdio() -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(io::stdout()))),
            err: Arc::new(Mutex::new(Box::new(io::stderr()))),
        }
    }

    /// Console writing both streams into one shared buffer.
    pub fn capture() -> (Self, Captured) {
        let captured = Captured::default();
        let sink: Sink = Arc::new(Mutex::new(Box::new(CaptureWriter(captured.buf.clone()))));
        (
            Self {
                out: sink.clone(),
                err: sink,
            },
            captured,
        )
    }

    fn emit(sink: &Sink, line: &str) {
        let mut w = sink.lock().unwrap_or_else(|p| p.into_inner());
        // console output is best effort, a closed pipe must not abort a build
        let _ = writeln!(w, "{line}");
        let _ = w.flush();
    }

    /// Write a plain line to stdout.
    pub fn line(&self, line: &str) {
        Self::emit(&self.out, line);
    }

    /// Write a plain line to stderr.
    pub fn eline(&self, line: &str) {
        Self::emit(&self.err, line);
    }

    pub fn group(&self, title: &str) {
        self.line(&format!("::group::{title}"));
    }

    pub fn end_group(&self) {
        self.line("::endgroup::");
    }

    pub fn error(&self, message: &str) {
        self.line(&format!("::error::{message}"));
    }

    /// Error annotation on stderr, used for fatal environment problems.
    pub fn fatal(&self, message: &str) {
        self.eline(&format!("::error::{message}"));
    }

    pub fn warning(&self, message: &str) {
        self.line(&format!("::warning::{message}"));
    }
}
