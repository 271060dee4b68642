//! Storage and execution rules shared by every transport.
//!
//! [`Service::put`] classifies and stores a payload; [`Service::run`] resolves
//! a path to stored content, an execution result, or an export stream. The
//! HTTP layer only translates these outcomes to responses.

use std::sync::Arc;

use hput_common::{HputError, Payload, PutResult, Result, Runnable};
use hput_store::Saver;

use crate::classifier::classify;
use crate::export::{ExportStream, replay_notice};
use crate::runtime::{RequestView, ResponseSink, Sandbox};

/// Path suffix that turns a read into an export of everything under it.
pub const DUMP_SUFFIX: &str = "/dump";

/// Path suffixes nothing may be stored at.
pub const RESERVED_SUFFIXES: [&str; 2] = [DUMP_SUFFIX, "/logs"];

fn ends_with_ignore_case(path: &str, suffix: &str) -> bool {
    path.len()
        .checked_sub(suffix.len())
        .and_then(|split| path.get(split..))
        .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

/// Splits `<prefix>/dump` (any case) into `<prefix>`.
pub fn dump_prefix(path: &str) -> Option<&str> {
    let split = path.len().checked_sub(DUMP_SUFFIX.len())?;
    let suffix = path.get(split..)?;
    suffix
        .eq_ignore_ascii_case(DUMP_SUFFIX)
        .then(|| &path[..split])
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PutOutcome {
    pub result: PutResult,
    /// Snippet that restores what the upload replaced.
    pub replay: Option<String>,
}

/// What a read resolved to.
pub enum RunOutcome {
    /// Nothing (or an empty payload) is stored at the path.
    Missing(String),
    /// Text or binary content, served as stored.
    Content(Vec<u8>),
    /// A script ran; this is the response it built.
    Executed(ResponseSink),
    /// Replay script for everything under a prefix.
    Export(ExportStream),
}

pub struct Service {
    saver: Arc<dyn Saver>,
    sandbox: Sandbox,
    base_url: String,
}

impl Service {
    pub fn new(saver: Arc<dyn Saver>, sandbox: Sandbox, base_url: impl Into<String>) -> Self {
        Self {
            saver,
            sandbox,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Classifies `body` and stores it at `path`. The replay text is built
    /// from the value the store replaced, so no overwrite goes unreported.
    ///
    /// # Errors
    ///
    /// - [`HputError::ReservedPath`] if `path` ends in `/dump` or `/logs`
    /// - Storage errors from the backend
    pub async fn put(&self, path: &str, body: Vec<u8>) -> Result<PutOutcome> {
        if let Some(suffix) = RESERVED_SUFFIXES
            .iter()
            .find(|suffix| ends_with_ignore_case(path, suffix))
        {
            return Err(HputError::ReservedPath(suffix.to_string()));
        }

        // Parsing a large payload is CPU work; keep it off the async workers.
        let classification = tokio::task::spawn_blocking(move || classify(body))
            .await
            .map_err(|e| HputError::Internal(format!("classification task failed: {e}")))?;
        let kind = classification.kind();
        let replaced = self.saver.put(classification.payload, path).await?;
        let overwrote = replaced.is_some();

        let replay = replaced
            .filter(|previous| !previous.is_empty())
            .map(|previous| replay_notice(&self.base_url, &Runnable::new(path, previous)));

        tracing::info!(path, kind = %kind, overwrote, "stored input");
        Ok(PutOutcome {
            result: PutResult {
                kind,
                overwrote,
                message: classification.message,
            },
            replay,
        })
    }

    /// Resolves `request.path`.
    ///
    /// Scripts run on the blocking pool with a fresh context per call.
    ///
    /// # Errors
    ///
    /// - [`HputError::Execution`] if the script failed
    /// - Storage errors from the backend
    pub async fn run(&self, request: RequestView) -> Result<RunOutcome> {
        if let Some(prefix) = dump_prefix(&request.path) {
            tracing::debug!(prefix, "exporting");
            return Ok(RunOutcome::Export(ExportStream::spawn(
                Arc::clone(&self.saver),
                prefix.to_string(),
                &self.base_url,
            )));
        }

        let runnable = match self.saver.get(&request.path).await? {
            Some(runnable) if !runnable.payload.is_empty() => runnable,
            _ => {
                return Ok(RunOutcome::Missing(format!(
                    "There is nothing at path: '{}', you can use a PUT verb to add something\n",
                    request.path
                )));
            }
        };

        let source = match runnable.payload {
            Payload::Script(source) => source,
            Payload::Text(text) => return Ok(RunOutcome::Content(text.into_bytes())),
            Payload::Binary(bytes) => return Ok(RunOutcome::Content(bytes)),
        };

        let sandbox = self.sandbox.clone();
        let response = tokio::task::spawn_blocking(move || sandbox.execute(&source, &request))
            .await
            .map_err(|e| HputError::Internal(format!("execution task failed: {e}")))??;
        Ok(RunOutcome::Executed(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_limits::ResourceLimits;
    use hput_common::{ExecutionError, Kind};
    use hput_store::MemorySaver;

    fn service() -> Service {
        Service::new(
            Arc::new(MemorySaver::new()),
            Sandbox::new(ResourceLimits::default()),
            "http://localhost",
        )
    }

    async fn body_of(service: &Service, path: &str) -> Vec<u8> {
        match service.run(RequestView::new("GET", path)).await.unwrap() {
            RunOutcome::Content(bytes) => bytes,
            RunOutcome::Executed(response) => response.body().to_vec(),
            RunOutcome::Missing(msg) => panic!("unexpected missing: {msg}"),
            RunOutcome::Export(export) => export.collect().await.unwrap().into_bytes(),
        }
    }

    #[test]
    fn test_dump_prefix() {
        assert_eq!(dump_prefix("/a/dump"), Some("/a"));
        assert_eq!(dump_prefix("/a/DUMP"), Some("/a"));
        assert_eq!(dump_prefix("/dump"), Some(""));
        assert_eq!(dump_prefix("/a/dumpster"), None);
        assert_eq!(dump_prefix("dump"), None);
        assert_eq!(dump_prefix("/é"), None);
    }

    #[tokio::test]
    async fn test_put_then_run_script() {
        let service = service();
        let outcome = service
            .put("/greet", b"'Hello, ' + request.query.name".to_vec())
            .await
            .unwrap();
        assert_eq!(outcome.result.kind, Kind::Script);
        assert!(!outcome.result.overwrote);
        assert!(outcome.replay.is_none());

        let request = RequestView::new("GET", "/greet").with_query("name=Ada");
        match service.run(request).await.unwrap() {
            RunOutcome::Executed(response) => assert_eq!(response.body(), b"Hello, Ada"),
            _ => panic!("expected execution"),
        }
    }

    #[tokio::test]
    async fn test_overwrite_returns_replay() {
        let service = service();
        service.put("/greet", b"'hi'".to_vec()).await.unwrap();
        let outcome = service.put("/greet", b"bye".to_vec()).await.unwrap();

        assert!(outcome.result.overwrote);
        let replay = outcome.replay.unwrap();
        assert!(replay.contains("xhr.open(\"PUT\", \"http://localhost/greet\");"));
        assert!(replay.contains("xhr.send(`'hi'`);"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_report_every_overwrite() {
        let service = Arc::new(service());
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service
                        .put("/shared", format!("plain words {i} here").into_bytes())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut fresh = 0;
        let mut replays = Vec::new();
        for handle in handles {
            let outcome = handle.await.unwrap();
            if outcome.result.overwrote {
                replays.push(outcome.replay.expect("overwrite without replay"));
            } else {
                assert!(outcome.replay.is_none());
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
        assert_eq!(replays.len(), 9);
        replays.sort();
        replays.dedup();
        assert_eq!(replays.len(), 9);
    }

    #[tokio::test]
    async fn test_text_and_binary_served_verbatim() {
        let service = service();
        service.put("/note", b"just some words here".to_vec()).await.unwrap();
        service.put("/bin", vec![0xff, 0x00, 0xfe]).await.unwrap();

        assert_eq!(body_of(&service, "/note").await, b"just some words here");
        assert_eq!(body_of(&service, "/bin").await, vec![0xff, 0x00, 0xfe]);
    }

    #[tokio::test]
    async fn test_missing_and_empty_paths() {
        let service = service();
        service.put("/empty", Vec::new()).await.unwrap();

        for path in ["/nothing", "/empty"] {
            match service.run(RequestView::new("GET", path)).await.unwrap() {
                RunOutcome::Missing(msg) => assert_eq!(
                    msg,
                    format!("There is nothing at path: '{path}', you can use a PUT verb to add something\n")
                ),
                _ => panic!("expected missing for {path}"),
            }
        }
    }

    #[tokio::test]
    async fn test_put_to_dump_is_rejected() {
        let service = service();
        let err = service.put("/a/Dump", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, HputError::ReservedPath(_)));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_put_to_logs_is_rejected() {
        let service = service();
        let err = service.put("/app/LOGS", b"x".to_vec()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "attempted to add something to /logs which is not allowed"
        );
    }

    #[tokio::test]
    async fn test_dump_exports_prefix() {
        let service = service();
        service.put("/greet", b"bye".to_vec()).await.unwrap();
        service.put("/other/x", b"1".to_vec()).await.unwrap();

        let export = String::from_utf8(body_of(&service, "/greet/dump").await).unwrap();
        assert!(export.contains("xhr.send(`bye`);"));
        assert!(!export.contains("/other/x"));
    }

    #[tokio::test]
    async fn test_failing_script_is_execution_error() {
        let service = service();
        service.put("/bad", b"throw new Error('boom')".to_vec()).await.unwrap();

        match service.run(RequestView::new("GET", "/bad")).await {
            Err(HputError::Execution(ExecutionError::Uncaught(msg))) => assert!(msg.contains("boom")),
            _ => panic!("expected execution error"),
        }
    }
}
