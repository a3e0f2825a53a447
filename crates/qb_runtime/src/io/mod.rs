//! Console gateway.
//!
//! All process I/O funnels through one `IoGateway`. Writes are
//! immediate under a lock. Reads are non-blocking from the worker's
//! point of view: when no input line is buffered the process parks and
//! a pump thread, which owns the real input stream, later hands the
//! line (or the end-of-input notice) back through the `Wake` hook the
//! scheduler installs.

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::errors::{Fault, messages};
use crate::sched::Pid;

/// Callback the scheduler registers to resume parked readers.
pub trait Wake: Send + Sync {
    /// Hands a read result to a parked process. `None` means the input
    /// stream ended.
    fn deliver(&self, pid: Pid, line: Option<String>);
}

/// Result of a read attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    /// No line yet; the caller parks and the pump delivers later.
    WouldBlock,
    Closed,
}

enum InputSource {
    Stdin,
    Reader(Box<dyn BufRead + Send>),
}

struct InputQueue {
    lines: VecDeque<String>,
    waiting: VecDeque<Pid>,
    source: Option<InputSource>,
    pumping: bool,
    closed: bool,
}

pub struct IoGateway {
    input: Mutex<InputQueue>,
    out: Mutex<Box<dyn Write + Send>>,
    err: Mutex<Box<dyn Write + Send>>,
    waker: OnceLock<Arc<dyn Wake>>,
}

impl IoGateway {
    pub fn new(
        input: Box<dyn BufRead + Send>,
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
    ) -> Arc<IoGateway> {
        IoGateway::with_source(InputSource::Reader(input), out, err)
    }

    /// Gateway over the real process streams. The stdin lock is taken
    /// inside the pump thread, so construction never contends on it.
    pub fn stdio() -> Arc<IoGateway> {
        IoGateway::with_source(
            InputSource::Stdin,
            Box::new(std::io::stdout()),
            Box::new(std::io::stderr()),
        )
    }

    fn with_source(
        source: InputSource,
        out: Box<dyn Write + Send>,
        err: Box<dyn Write + Send>,
    ) -> Arc<IoGateway> {
        Arc::new(IoGateway {
            input: Mutex::new(InputQueue {
                lines: VecDeque::new(),
                waiting: VecDeque::new(),
                source: Some(source),
                pumping: false,
                closed: false,
            }),
            out: Mutex::new(out),
            err: Mutex::new(err),
            waker: OnceLock::new(),
        })
    }

    /// Installs the resume hook. Must happen before any process reads.
    pub fn set_waker(&self, waker: Arc<dyn Wake>) {
        let _ = self.waker.set(waker);
    }

    pub fn write(&self, text: &str) -> Result<(), Fault> {
        let mut out = self.out.lock();
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| Fault::io_closed(format!("write failed: {e}")))
    }

    /// Diagnostic output. Failures here have nowhere to go.
    pub fn error(&self, message: &str) {
        let mut err = self.err.lock();
        let _ = writeln!(err, "{message}");
        let _ = err.flush();
    }

    /// Attempts to take the next input line for `pid`. On `WouldBlock`
    /// the pid is queued and the pump thread delivers the line through
    /// the waker once one arrives.
    pub fn read_line(self: &Arc<Self>, pid: Pid) -> ReadOutcome {
        let mut input = self.input.lock();
        if let Some(line) = input.lines.pop_front() {
            return ReadOutcome::Line(line);
        }
        if input.closed {
            return ReadOutcome::Closed;
        }
        input.waiting.push_back(pid);
        if !input.pumping {
            input.pumping = true;
            let source = input.source.take().expect("input source taken once");
            let gateway = Arc::clone(self);
            std::thread::Builder::new()
                .name("qbrt-io-pump".into())
                .spawn(move || pump(gateway, source))
                .expect("spawn io pump thread");
        }
        ReadOutcome::WouldBlock
    }

    fn push_line(&self, line: String) {
        let woken = {
            let mut input = self.input.lock();
            match input.waiting.pop_front() {
                Some(pid) => Some((pid, line)),
                None => {
                    input.lines.push_back(line);
                    None
                }
            }
        };
        if let Some((pid, line)) = woken {
            if let Some(waker) = self.waker.get() {
                waker.deliver(pid, Some(line));
            }
        }
    }

    fn close_input(&self) {
        let waiting: Vec<Pid> = {
            let mut input = self.input.lock();
            input.closed = true;
            input.waiting.drain(..).collect()
        };
        if let Some(waker) = self.waker.get() {
            for pid in waiting {
                waker.deliver(pid, None);
            }
        }
    }
}

/// Reads lines until end of input, stripping the trailing newline the
/// way interactive readers expect.
fn pump(gateway: Arc<IoGateway>, source: InputSource) {
    let mut reader: Box<dyn BufRead> = match source {
        InputSource::Stdin => Box::new(std::io::stdin().lock()),
        InputSource::Reader(r) => r,
    };
    loop {
        let mut buf = String::new();
        match reader.read_line(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if buf.ends_with('\n') {
                    buf.pop();
                    if buf.ends_with('\r') {
                        buf.pop();
                    }
                }
                gateway.push_line(buf);
            }
        }
    }
    gateway.close_input();
}

/// End-of-input fault for a process that reads past the last line.
pub fn closed_fault() -> Fault {
    Fault::io_closed(messages::INPUT_CLOSED)
}

/// Clonable in-memory sink for capturing output in tests.
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn new() -> SharedBuf {
        SharedBuf::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(Pid, Option<String>)>>);

    impl Wake for Recorder {
        fn deliver(&self, pid: Pid, line: Option<String>) {
            self.0.lock().push((pid, line));
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for io pump");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn pump_delivers_lines_to_parked_readers_in_order() {
        let gw = IoGateway::new(
            Box::new(Cursor::new("a\r\nb\n")),
            Box::new(std::io::sink()),
            Box::new(std::io::sink()),
        );
        let rec = Arc::new(Recorder::default());
        gw.set_waker(rec.clone());

        assert_eq!(gw.read_line(1), ReadOutcome::WouldBlock);
        assert_eq!(gw.read_line(2), ReadOutcome::WouldBlock);
        wait_until(|| rec.0.lock().len() == 2);
        assert_eq!(
            *rec.0.lock(),
            vec![(1, Some("a".to_string())), (2, Some("b".to_string()))]
        );
        wait_until(|| gw.read_line(3) == ReadOutcome::Closed);
    }

    #[test]
    fn end_of_input_unparks_readers_with_none() {
        let gw = IoGateway::new(
            Box::new(Cursor::new("")),
            Box::new(std::io::sink()),
            Box::new(std::io::sink()),
        );
        let rec = Arc::new(Recorder::default());
        gw.set_waker(rec.clone());

        assert_eq!(gw.read_line(7), ReadOutcome::WouldBlock);
        wait_until(|| rec.0.lock().as_slice() == [(7, None)]);
        assert_eq!(gw.read_line(7), ReadOutcome::Closed);
    }

    #[test]
    fn writes_reach_the_output_sink() {
        let out = SharedBuf::new();
        let gw = IoGateway::new(
            Box::new(Cursor::new("")),
            Box::new(out.clone()),
            Box::new(std::io::sink()),
        );
        gw.write("hello").unwrap();
        gw.write(" world").unwrap();
        assert_eq!(out.contents(), "hello world");
    }
}
