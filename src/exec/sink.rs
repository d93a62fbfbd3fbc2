// src/exec/sink.rs

//! Shared, line-prefixing output sink.
//!
//! All task output ends up in one stream. Each task writes through its own
//! [`TaskWriter`] view, which tags every line with `[<task>] `. Writes from
//! all views go through one async mutex and are rendered a whole chunk at a
//! time, so lines from concurrent tasks never splice into each other.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const READ_BUF_SIZE: usize = 8 * 1024;

/// Cloneable handle to the shared output stream.
#[derive(Debug)]
pub struct PrefixingSink<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for PrefixingSink<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W> PrefixingSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Line-buffering view that prefixes everything with `[<task>] `.
    pub fn view(&self, task: &str) -> TaskWriter<W> {
        TaskWriter {
            sink: self.clone(),
            prefix: format!("[{task}] ").into_bytes(),
            pending: Vec::new(),
        }
    }

    /// Write one unprefixed line (a `---- ... ----` marker).
    pub async fn notice(&self, line: &str) -> io::Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.write_raw(&buf).await
    }

    async fn write_raw(&self, bytes: &[u8]) -> io::Result<()> {
        let mut out = self.inner.lock().await;
        out.write_all(bytes).await?;
        out.flush().await
    }

    /// Take the underlying writer back once every view has been dropped.
    pub fn into_inner(self) -> Option<W> {
        Arc::try_unwrap(self.inner).ok().map(Mutex::into_inner)
    }
}

/// One task's view of a [`PrefixingSink`].
///
/// Bytes are buffered until a newline; a trailing partial line is held back
/// until more data arrives or [`finish`](Self::finish) is called.
#[derive(Debug)]
pub struct TaskWriter<W> {
    sink: PrefixingSink<W>,
    prefix: Vec<u8>,
    pending: Vec<u8>,
}

impl<W> TaskWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Feed an arbitrary chunk of output.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Ok(());
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        let rendered = render_lines(&self.prefix, &complete[..complete.len() - 1]);

        self.sink.write_raw(&rendered).await
    }

    /// Flush a held-back partial line, if any.
    pub async fn finish(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let partial = std::mem::take(&mut self.pending);
        let rendered = render_lines(&self.prefix, &partial);
        self.sink.write_raw(&rendered).await
    }

    /// Copy `reader` to this view until end of stream.
    ///
    /// If writing fails the reader is still drained, so a child process
    /// never blocks on a full pipe; the first write error is returned at the
    /// end.
    pub async fn copy_from<R>(self, reader: R) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        self.copy_until(reader, std::future::pending()).await
    }

    /// Like [`copy_from`](Self::copy_from), but gives up on the reader once
    /// `stop` resolves.
    ///
    /// Data that is already readable is still taken before stopping. A
    /// held-back partial line is flushed either way.
    pub async fn copy_until<R, F>(mut self, mut reader: R, stop: F) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut write_error: Option<io::Error> = None;

        loop {
            let n = tokio::select! {
                biased;
                read = reader.read(&mut buf) => read?,
                () = &mut stop => {
                    debug!("output stream still open; detaching");
                    break;
                }
            };
            if n == 0 {
                break;
            }
            if write_error.is_some() {
                continue;
            }
            if let Err(err) = self.write_chunk(&buf[..n]).await {
                warn!(error = %err, "output write failed; discarding remaining output");
                write_error = Some(err);
            }
        }

        match write_error {
            Some(err) => Err(err),
            None => self.finish().await,
        }
    }
}

/// Render newline-separated `text` (without its final terminator) as
/// prefixed lines. Empty lines stay blank.
fn render_lines(prefix: &[u8], text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + prefix.len() * 2 + 1);
    for line in text.split(|&b| b == b'\n') {
        if !line.is_empty() {
            out.extend_from_slice(prefix);
            out.extend_from_slice(line);
        }
        out.push(b'\n');
    }
    out
}
