//! hput Runnable Store
//!
//! This crate defines the [`Saver`] contract every persistence backend
//! implements, plus two backends:
//!
//! - [`MemorySaver`]: a process-local map, lost on restart
//! - [`FileSaver`]: one JSON record per path inside a directory
//!
//! # Streaming
//!
//! [`Saver::stream_by_prefix`] pushes matches into a bounded channel one at a
//! time and finishes with exactly one [`StreamEvent::Done`] (or
//! [`StreamEvent::Failed`]), so a consumer can tell "no more data" apart from
//! any item, and memory stays proportional to the channel capacity rather
//! than to the number of stored runnables.
//!
//! # Example
//!
//! ```no_run
//! use hput_common::Payload;
//! use hput_store::{MemorySaver, Saver, StreamEvent};
//!
//! # async fn demo() -> hput_common::Result<()> {
//! let saver = MemorySaver::new();
//! let replaced = saver.put(Payload::Text("hello".into()), "/a/x").await?;
//! assert!(replaced.is_none());
//!
//! let (tx, mut rx) = hput_store::stream_channel();
//! saver.stream_by_prefix("/a", tx).await?;
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         StreamEvent::Runnable(r) => println!("{}", r.path),
//!         StreamEvent::Done => break,
//!         StreamEvent::Failed(e) => eprintln!("{e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod file;
pub mod memory;

use async_trait::async_trait;
use hput_common::{Payload, Result, Runnable};
use tokio::sync::mpsc;

pub use file::FileSaver;
pub use memory::MemorySaver;

/// Number of runnables that may sit in an export channel at once.
pub const STREAM_CAPACITY: usize = 16;

/// One message of a prefix scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Runnable(Runnable),
    /// The scan finished; nothing follows.
    Done,
    /// The scan stopped early because the backend failed.
    Failed(String),
}

/// Creates the bounded channel used by [`Saver::stream_by_prefix`].
pub fn stream_channel() -> (mpsc::Sender<StreamEvent>, mpsc::Receiver<StreamEvent>) {
    mpsc::channel(STREAM_CAPACITY)
}

/// Storage contract used by the request coordinator.
#[async_trait]
pub trait Saver: Send + Sync {
    /// Stores `payload` at `path`, replacing whatever was there.
    ///
    /// Returns the replaced payload, if any. Read and write happen as one
    /// operation, so two concurrent writers never both see `None` and every
    /// replaced value is handed to exactly one writer.
    async fn put(&self, payload: Payload, path: &str) -> Result<Option<Payload>>;

    /// Loads the runnable at exactly `path`. Absence is `Ok(None)`.
    async fn get(&self, path: &str) -> Result<Option<Runnable>>;

    /// Sends every runnable whose path starts with `prefix` into `sink`,
    /// followed by [`StreamEvent::Done`].
    ///
    /// Backends report their own failures as [`StreamEvent::Failed`] before
    /// returning the error. A closed `sink` ends the scan quietly.
    async fn stream_by_prefix(&self, prefix: &str, sink: mpsc::Sender<StreamEvent>) -> Result<()>;
}

/// Drains a prefix scan into a vector. Handy for callers that know the
/// result set is small.
pub async fn collect_stream(mut rx: mpsc::Receiver<StreamEvent>) -> Result<Vec<Runnable>> {
    let mut runnables = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Runnable(r) => runnables.push(r),
            StreamEvent::Done => return Ok(runnables),
            StreamEvent::Failed(e) => return Err(hput_common::HputError::Storage(e)),
        }
    }
    Err(hput_common::HputError::Storage(
        "stream closed before completion".into(),
    ))
}
