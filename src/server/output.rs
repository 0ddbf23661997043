use futures_lite::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

// Longer lines are split into chunks of this size.
const MAX_LINE_BYTES: u64 = 4096;

/// Which child stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Ring buffer holding the most recent lines a child printed.
///
/// The buffer is for diagnostics only; nothing in the lifecycle decides
/// anything based on its contents. Stderr lines are prefixed with
/// `[stderr] `.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, stream: Stream, line: String) {
        let line = match stream {
            Stream::Stdout => line,
            Stream::Stderr => format!("[stderr] {}", line),
        };

        if let Ok(mut lines) = self.lines.lock() {
            lines.push_back(line);
            while lines.len() > self.capacity {
                lines.pop_front();
            }
        }
    }

    /// Copy of the buffered lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().map(|lines| lines.is_empty()).unwrap_or(true)
    }
}

/// Drains `reader` into `buffer` line by line until EOF.
///
/// The pipe is always drained even when the buffer is full, so a chatty
/// child never blocks on a full pipe.
pub(crate) fn capture<R>(
    server_name: String,
    stream: Stream,
    reader: R,
    buffer: OutputBuffer,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut bytes = Vec::new();

        loop {
            bytes.clear();
            match (&mut reader)
                .take(MAX_LINE_BYTES)
                .read_until(b'\n', &mut bytes)
                .await
            {
                Ok(0) => break,
                Ok(_) => {
                    while matches!(bytes.last(), Some(b'\n' | b'\r')) {
                        bytes.pop();
                    }
                    let line = String::from_utf8_lossy(&bytes).into_owned();
                    tracing::trace!(server = %server_name, ?stream, %line, "Child output");
                    buffer.push(stream, line);
                }
                Err(e) => {
                    tracing::debug!(server = %server_name, ?stream, error = %e, "Output capture ended");
                    break;
                }
            }
        }
    })
}
