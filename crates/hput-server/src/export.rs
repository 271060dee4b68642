//! Replay-script export of stored runnables.
//!
//! `GET <prefix>/dump` streams a JavaScript program that, pasted into a
//! browser console on the target host, re-creates every runnable under the
//! prefix with one `PUT` each. The same rendering produces the "put it back"
//! snippet returned when an upload overwrites something.
//!
//! # Format
//!
//! ```text
//! //Dumping creation instructions v0.2
//! var xhr = new XMLHttpRequest();
//! xhr.withCredentials = true;
//! xhr.open("PUT", "http://localhost/a/x");
//! xhr.send(`payload`);
//! ```
//!
//! Later runnables reuse the variable (`xhr = new XMLHttpRequest();`).
//! Binary runnables cannot be expressed this way and become a comment.

use std::sync::Arc;

use hput_common::{HputError, Payload, Result, Runnable};
use hput_store::{Saver, StreamEvent, stream_channel};
use tokio::sync::mpsc;

/// First line of every export.
pub const EXPORT_HEADER: &str = "//Dumping creation instructions v0.2\n";

/// Escapes `text` for use inside a JavaScript template literal.
pub fn escape_template(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '`' => escaped.push_str("\\`"),
            '$' if chars.peek() == Some(&'{') => escaped.push_str("\\$"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Renders runnables as replay statements.
#[derive(Debug, Clone)]
pub struct ReplayWriter {
    base_url: String,
    declared: bool,
}

impl ReplayWriter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            declared: false,
        }
    }

    /// Statements re-creating `runnable`, ending with a newline.
    pub fn render(&mut self, runnable: &Runnable) -> String {
        let target = format!("{}{}", self.base_url, runnable.path);
        let text = match &runnable.payload {
            Payload::Text(text) | Payload::Script(text) => text,
            Payload::Binary(_) => return format!("// binary at {target}\n"),
        };

        let declaration = if self.declared { "" } else { "var " };
        self.declared = true;
        format!(
            "{declaration}xhr = new XMLHttpRequest();\n\
             xhr.withCredentials = true;\n\
             xhr.open(\"PUT\", \"{target}\");\n\
             xhr.send(`{}`);\n",
            escape_template(text)
        )
    }
}

/// Snippet handed back when an upload replaced `previous`.
pub fn replay_notice(base_url: &str, previous: &Runnable) -> String {
    format!(
        "overwriting something, use this Javascript to add it back.\n\n{}\n\n",
        ReplayWriter::new(base_url).render(previous).trim_end()
    )
}

/// Incrementally rendered export of one prefix.
///
/// The store scan runs in its own task and is paced by a bounded channel,
/// so the export never holds more than a channel's worth of runnables.
pub struct ExportStream {
    events: mpsc::Receiver<StreamEvent>,
    writer: ReplayWriter,
    header_sent: bool,
    finished: bool,
}

impl ExportStream {
    /// Starts scanning `prefix` in `saver`. Must be called inside a tokio runtime.
    pub fn spawn(saver: Arc<dyn Saver>, prefix: String, base_url: &str) -> Self {
        let (tx, rx) = stream_channel();
        tokio::spawn(async move {
            let failure_tx = tx.clone();
            if let Err(e) = saver.stream_by_prefix(&prefix, tx).await {
                tracing::warn!(prefix = %prefix, error = %e, "export scan failed");
                let _ = failure_tx.send(StreamEvent::Failed(e.to_string())).await;
            }
        });
        Self::from_events(rx, base_url)
    }

    pub fn from_events(events: mpsc::Receiver<StreamEvent>, base_url: &str) -> Self {
        Self {
            events,
            writer: ReplayWriter::new(base_url),
            header_sent: false,
            finished: false,
        }
    }

    /// Next chunk of the export, or `None` once it is complete.
    ///
    /// # Errors
    ///
    /// Returns [`HputError::Storage`] if the scan failed or ended without
    /// signalling completion. The stream is finished after an error.
    pub async fn next_chunk(&mut self) -> Option<Result<String>> {
        if self.finished {
            return None;
        }
        if !self.header_sent {
            self.header_sent = true;
            return Some(Ok(EXPORT_HEADER.to_string()));
        }
        match self.events.recv().await {
            Some(StreamEvent::Runnable(runnable)) => Some(Ok(self.writer.render(&runnable))),
            Some(StreamEvent::Done) => {
                self.finished = true;
                None
            }
            Some(StreamEvent::Failed(e)) => {
                self.finished = true;
                Some(Err(HputError::Storage(e)))
            }
            None => {
                self.finished = true;
                Some(Err(HputError::Storage(
                    "export scan ended without completing".to_string(),
                )))
            }
        }
    }

    /// Drains the whole export into one string.
    pub async fn collect(mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(chunk) = self.next_chunk().await {
            out.push_str(&chunk?);
        }
        Ok(out)
    }
}
