//! In-memory runnable store.

use crate::{Saver, StreamEvent};
use async_trait::async_trait;
use hput_common::{HputError, Payload, Result, Runnable};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Runnables held in a process-local ordered map.
///
/// One mutex guards every read-modify-write, which is what makes
/// [`Saver::put`]'s overwrite report exact. Instances are explicit and meant
/// to be injected; there is no shared global map.
#[derive(Debug, Default)]
pub struct MemorySaver {
    entries: Mutex<BTreeMap<String, Payload>>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Payload>>> {
        self.entries
            .lock()
            .map_err(|e| HputError::Storage(format!("memory store lock poisoned: {}", e)))
    }

    /// The first entry after `after` (or at `prefix` when starting) that
    /// still carries `prefix`.
    fn next_match(&self, prefix: &str, after: Option<&str>) -> Result<Option<Runnable>> {
        let entries = self.lock()?;
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Included(prefix),
        };
        Ok(entries
            .range::<str, _>((lower, Bound::Unbounded))
            .next()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, payload)| Runnable::new(key.clone(), payload.clone())))
    }
}

#[async_trait]
impl Saver for MemorySaver {
    async fn put(&self, payload: Payload, path: &str) -> Result<Option<Payload>> {
        tracing::debug!("memory put: {} bytes of {} at {}", payload.len(), payload.kind(), path);
        let mut entries = self.lock()?;
        let replaced = entries.insert(path.to_string(), payload);
        if replaced.is_some() {
            tracing::debug!("memory put: replaced existing value at {}", path);
        }
        Ok(replaced)
    }

    async fn get(&self, path: &str) -> Result<Option<Runnable>> {
        let entries = self.lock()?;
        Ok(entries
            .get(path)
            .map(|payload| Runnable::new(path, payload.clone())))
    }

    async fn stream_by_prefix(&self, prefix: &str, sink: mpsc::Sender<StreamEvent>) -> Result<()> {
        // Walk the map one key at a time so the lock is never held across an
        // await and only one cloned runnable is alive per step.
        let mut cursor: Option<String> = None;
        loop {
            let next = match self.next_match(prefix, cursor.as_deref()) {
                Ok(next) => next,
                Err(e) => {
                    let _ = sink.send(StreamEvent::Failed(e.to_string())).await;
                    return Err(e);
                }
            };
            let Some(runnable) = next else {
                break;
            };
            cursor = Some(runnable.path.clone());
            if sink.send(StreamEvent::Runnable(runnable)).await.is_err() {
                tracing::debug!("memory stream: consumer went away for prefix {}", prefix);
                return Ok(());
            }
        }
        let _ = sink.send(StreamEvent::Done).await;
        Ok(())
    }
}
