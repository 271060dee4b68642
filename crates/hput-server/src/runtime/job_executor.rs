//! Microtask queue for Boa's promise jobs.
//!
//! Scripts run on a blocking thread, one context per execution, so promise
//! reactions are drained synchronously: after the top-level script finishes
//! and after every timer callback. Draining runs jobs enqueued by other jobs
//! too, until both queues are empty or the execution deadline passes. A
//! promise chain that keeps re-queuing itself therefore ends at the deadline
//! with jobs still queued.
//!
//! # Job Types
//!
//! - **PromiseJob**: Microtasks for promise resolution (then/catch handlers)
//! - **GenericJob**: General-purpose jobs, run in the same checkpoint
//!
//! Native async jobs are never produced by the host bindings (`fetch` settles
//! its promise before returning), so they are logged and dropped.

use boa_engine::{
    JsResult,
    context::Context,
    job::{GenericJob, Job, JobExecutor, PromiseJob},
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use super::event_loop::Clock;

/// Job executor installed into every execution context.
///
/// # Example
///
/// ```ignore
/// let microtasks = Rc::new(MicrotaskQueue::new());
/// let mut ctx = Context::builder()
///     .job_executor(microtasks.clone())
///     .build()?;
///
/// ctx.eval(Source::from_bytes("Promise.resolve(1).then(v => v + 1)"))?;
/// microtasks.drain(&mut ctx);
/// ```
pub struct MicrotaskQueue {
    promise_jobs: RefCell<VecDeque<PromiseJob>>,
    generic_jobs: RefCell<VecDeque<GenericJob>>,
    deadline: Option<(Arc<dyn Clock>, Instant)>,
}

impl MicrotaskQueue {
    /// A queue that drains until empty, however long that takes.
    pub fn new() -> Self {
        Self {
            promise_jobs: RefCell::default(),
            generic_jobs: RefCell::default(),
            deadline: None,
        }
    }

    /// A queue whose drains stop once `clock` reaches `deadline`.
    pub fn with_deadline(clock: Arc<dyn Clock>, deadline: Instant) -> Self {
        Self {
            deadline: Some((clock, deadline)),
            ..Self::new()
        }
    }

    /// True once the deadline, if any, has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline
            .as_ref()
            .is_some_and(|(clock, deadline)| clock.now() >= *deadline)
    }

    /// Drops every queued job without running it.
    pub fn clear(&self) {
        self.promise_jobs.borrow_mut().clear();
        self.generic_jobs.borrow_mut().clear();
    }

    /// Returns true if there are pending jobs in either queue.
    pub fn has_pending_jobs(&self) -> bool {
        !self.promise_jobs.borrow().is_empty() || !self.generic_jobs.borrow().is_empty()
    }

    /// Runs jobs until both queues are empty or the deadline passes, and
    /// returns how many ran.
    ///
    /// Promise jobs go first; a generic job runs only once no promise job is
    /// waiting. A job that throws is logged and does not stop the drain: the
    /// rejection it causes is observed through the promise it belongs to.
    pub fn drain(&self, context: &mut Context) -> usize {
        let mut ran = 0;
        loop {
            if self.is_expired() {
                tracing::debug!(ran, "microtask drain stopped at the deadline");
                break;
            }

            // The queue borrow must end before the job runs; jobs enqueue jobs.
            let promise_job = self.promise_jobs.borrow_mut().pop_front();
            if let Some(job) = promise_job {
                if let Err(err) = job.call(context) {
                    tracing::debug!("Uncaught error in promise job: {err}");
                }
                ran += 1;
                continue;
            }

            let generic_job = self.generic_jobs.borrow_mut().pop_front();
            match generic_job {
                Some(job) => {
                    if let Err(err) = job.call(context) {
                        tracing::debug!("Uncaught error in generic job: {err}");
                    }
                    ran += 1;
                }
                None => break,
            }
        }

        context.clear_kept_objects();
        ran
    }
}

impl Default for MicrotaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobExecutor for MicrotaskQueue {
    fn enqueue_job(self: Rc<Self>, job: Job, _context: &mut Context) {
        match job {
            Job::PromiseJob(job) => self.promise_jobs.borrow_mut().push_back(job),
            Job::GenericJob(job) => self.generic_jobs.borrow_mut().push_back(job),
            _ => {
                tracing::warn!("Unsupported job type enqueued, ignoring");
            }
        }
    }

    fn run_jobs(self: Rc<Self>, context: &mut Context) -> JsResult<()> {
        self.drain(context);
        Ok(())
    }

    async fn run_jobs_async(self: Rc<Self>, context: &RefCell<&mut Context>) -> JsResult<()>
    where
        Self: Sized,
    {
        self.drain(&mut context.borrow_mut());
        Ok(())
    }
}
