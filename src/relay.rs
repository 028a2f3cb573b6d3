//! Output relay: forwards the worker's stdout/stderr lines to a sink.
//!
//! One reader thread per stream pushes each non-empty line as soon as it is
//! complete. Order is preserved within a stream only; there is no ordering
//! across stdout and stderr. Sinks are called on the reader threads and must
//! return quickly; thread-affinity (UI thread, log file) is the sink owner's
//! concern.
use std::io::{self, BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

/// Receiver of relayed lines. Called from reader threads; must not block.
pub trait LineSink: Send + Sync {
    fn push(&self, line: OutputLine);
}

impl<F> LineSink for F
where
    F: Fn(OutputLine) + Send + Sync,
{
    fn push(&self, line: OutputLine) {
        self(line)
    }
}

/// Sink queueing lines on an unbounded channel for another thread to render.
pub struct ChannelSink {
    tx: Sender<OutputLine>,
}

impl LineSink for ChannelSink {
    fn push(&self, line: OutputLine) {
        // Receiver gone means nobody is rendering anymore; dropping is fine.
        let _ = self.tx.send(line);
    }
}

pub fn channel_sink() -> (Arc<ChannelSink>, Receiver<OutputLine>) {
    let (tx, rx) = mpsc::channel();
    (Arc::new(ChannelSink { tx }), rx)
}

/// Sink that discards everything.
pub fn null_sink() -> Arc<dyn LineSink> {
    Arc::new(|_line: OutputLine| {})
}

/// Running reader threads of one worker process.
pub struct Relay {
    readers: Vec<thread::JoinHandle<()>>,
    closed: Receiver<StreamKind>,
    open_streams: usize,
}

impl Relay {
    /// Start consuming both streams. Readers are running when this returns,
    /// so nothing the worker wrote before is lost (it waits in the pipe).
    pub fn attach<O, E>(
        stdout: Option<O>,
        stderr: Option<E>,
        sink: Arc<dyn LineSink>,
    ) -> io::Result<Relay>
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        let (closed_tx, closed) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = stdout {
            readers.push(spawn_reader(
                out,
                StreamKind::Stdout,
                sink.clone(),
                closed_tx.clone(),
            )?);
        }
        if let Some(err) = stderr {
            readers.push(spawn_reader(err, StreamKind::Stderr, sink, closed_tx)?);
        }
        let open_streams = readers.len();
        Ok(Relay {
            readers,
            closed,
            open_streams,
        })
    }

    /// Wait up to `timeout` for the next end-of-stream. `Some(kind)` reports
    /// which pipe closed; `None` means nothing closed in time, or every
    /// stream has already closed.
    pub fn wait_closed(&mut self, timeout: Duration) -> Option<StreamKind> {
        if self.open_streams == 0 {
            return None;
        }
        match self.closed.recv_timeout(timeout) {
            Ok(kind) => {
                self.open_streams -= 1;
                Some(kind)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.open_streams = 0;
                None
            }
        }
    }

    /// Number of streams still open.
    pub fn open_streams(&self) -> usize {
        self.open_streams
    }

    /// Block until both readers have finished (i.e. both pipes hit EOF).
    pub fn join(self) {
        for h in self.readers {
            let _ = h.join();
        }
    }
}

fn spawn_reader<R>(
    reader: R,
    kind: StreamKind,
    sink: Arc<dyn LineSink>,
    closed_tx: Sender<StreamKind>,
) -> io::Result<thread::JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("echw-relay-{}", kind.as_str()))
        .spawn(move || {
            pump(reader, kind, sink.as_ref());
            let _ = closed_tx.send(kind);
        })
}

/// Read `reader` to EOF, pushing every non-empty line. Invalid UTF-8 is
/// replaced rather than aborting the stream.
fn pump<R: Read>(reader: R, kind: StreamKind, sink: &dyn LineSink) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(512);
    let mut lines = 0usize;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(&['\n', '\r'][..]);
                if line.is_empty() {
                    continue;
                }
                trace!(stream = kind.as_str(), "{line}");
                lines += 1;
                sink.push(OutputLine {
                    stream: kind,
                    text: line.to_string(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(stream = kind.as_str(), "reader ended: {e}");
                break;
            }
        }
    }
    debug!(stream = kind.as_str(), lines, "end of stream");
}
