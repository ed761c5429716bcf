//! Line-oriented output capture
//!
//! Exec calls stream a container's stdout into a [`LineWriter`]. Every
//! complete line is sent over an unbounded channel to the paired
//! [`CapturedLines`], which yields them in write order. Dropping or closing
//! the writer flushes any partial last line and ends the sequence.

use std::io::{self, Write};
use tokio::sync::mpsc;

/// Create a connected writer and line receiver
pub fn line_capture() -> (LineWriter, CapturedLines) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        LineWriter {
            tx: Some(tx),
            pending: Vec::new(),
        },
        CapturedLines { rx },
    )
}

/// Writing half; implements [`std::io::Write`]
#[derive(Debug)]
pub struct LineWriter {
    tx: Option<mpsc::UnboundedSender<String>>,
    pending: Vec<u8>,
}

impl LineWriter {
    /// Flush the partial tail and end the line sequence
    pub fn close(&mut self) {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.send(tail);
        }
        self.tx = None;
    }

    fn send(&self, mut line: Vec<u8>) {
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody wants the output
            let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

impl Write for LineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.tx.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "line writer is closed",
            ));
        }
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            self.send(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reading half: the captured lines, in order
#[derive(Debug)]
pub struct CapturedLines {
    rx: mpsc::UnboundedReceiver<String>,
}

impl CapturedLines {
    /// Next line, or `None` once the writer is closed and drained
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Drain every line until the writer closes
    pub async fn collect(mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.rx.recv().await {
            lines.push(line);
        }
        lines
    }
}
