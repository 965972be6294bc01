//! Line-oriented output sink for build and run output

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// Receives output lines as they are produced
pub type OutputReceiver = mpsc::UnboundedReceiver<String>;

/// Where an operation writes its output.
///
/// Lines are handed off immediately; nothing is buffered until completion.
/// A sink whose receiver has gone away silently drops lines so the
/// operation keeps running after its caller disconnects.
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl OutputSink {
    /// Sink paired with its receiving end
    pub fn channel() -> (Self, OutputReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that drops everything
    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Emit one line
    pub fn line(&self, line: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(line.into());
        }
    }

    /// Forward every line of `reader`, returning the last non-blank one
    pub async fn copy_lines<R: AsyncRead + Unpin>(&self, reader: Option<R>) -> Option<String> {
        let mut lines = BufReader::new(reader?).lines();
        let mut last = None;
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                last = Some(line.clone());
            }
            self.line(line);
        }
        last
    }
}
