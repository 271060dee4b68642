//! One script execution, from evaluation to a final response.
//!
//! # Lifecycle
//!
//! 1. A fresh Boa [`Context`] is built with a [`MicrotaskQueue`], the engine
//!    limits from [`ResourceLimits`], and the host bindings.
//! 2. The source is compiled and evaluated; microtasks are drained.
//! 3. If the completion value is a promise, timers are fired until it
//!    settles, nothing is left that could settle it, or the deadline passes.
//! 4. Remaining timers get the rest of the deadline to run.
//! 5. The final value is appended to whatever the script already wrote.
//!
//! Contexts are never reused. An execution owns its heap, its timers and its
//! response; nothing it does is visible to the next one.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use boa_engine::{
    Context, JsError, JsValue, Script, Source,
    builtins::promise::PromiseState,
    object::{JsObject, builtins::JsPromise},
};
use hput_common::ExecutionError;

use super::bindings::{self, HostState, TimerCallback};
use super::conversions::{describe_error, stringify};
use super::event_loop::{self, Clock, DrainOutcome, EventLoop, SystemClock};
use super::job_executor::MicrotaskQueue;
use super::request::RequestView;
use super::response::ResponseSink;
use crate::resource_limits::ResourceLimits;

/// Where a top-level promise stands.
enum Settlement {
    Pending,
    Fulfilled(JsValue),
    Rejected(JsValue),
}

impl Settlement {
    fn of(promise: &JsPromise) -> Self {
        match promise.state() {
            PromiseState::Pending => Self::Pending,
            PromiseState::Fulfilled(value) => Self::Fulfilled(value),
            PromiseState::Rejected(reason) => Self::Rejected(reason),
        }
    }

    fn is_pending(promise: &JsPromise) -> bool {
        matches!(Self::of(promise), Self::Pending)
    }
}

/// Boa context plus everything the bindings of one execution share.
pub struct ExecutionContext {
    context: Context,
    microtasks: Rc<MicrotaskQueue>,
    timers: Rc<RefCell<EventLoop<TimerCallback>>>,
    response: Rc<RefCell<ResponseSink>>,
    /// The script-visible `response` object.
    response_object: JsObject,
    clock: Arc<dyn Clock>,
    deadline: Instant,
    timeout_ms: u64,
}

impl ExecutionContext {
    /// Builds a context for `request` with all host bindings installed.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Binding`] if the engine or a binding cannot
    /// be set up.
    pub fn new(
        request: &RequestView,
        limits: &ResourceLimits,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ExecutionError> {
        let deadline = clock.now() + limits.execution_timeout;
        let microtasks = Rc::new(MicrotaskQueue::with_deadline(Arc::clone(&clock), deadline));
        let mut context = Context::builder()
            .job_executor(microtasks.clone())
            .build()
            .map_err(|e| ExecutionError::Binding(format!("cannot create context: {e}")))?;
        limits.apply(&mut context);

        let response = Rc::new(RefCell::new(ResponseSink::new()));
        let timers = Rc::new(RefCell::new(EventLoop::new(Arc::clone(&clock))));

        let response_object = bindings::install_bindings(
            &mut context,
            HostState {
                request,
                response: response.clone(),
                timers: timers.clone(),
                clock: Arc::clone(&clock),
                deadline,
            },
        )?;

        Ok(Self {
            context,
            microtasks,
            timers,
            response,
            response_object,
            clock,
            deadline,
            timeout_ms: u64::try_from(limits.execution_timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Runs `source` to completion and returns the response it produced.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::Compile`] if the source does not parse
    /// - [`ExecutionError::Uncaught`] if evaluation throws
    /// - [`ExecutionError::Rejected`] if the returned promise rejects
    /// - [`ExecutionError::Timeout`] if the promise is still pending at the deadline
    /// - [`ExecutionError::Unsettled`] if nothing is left that could settle it
    pub fn run(mut self, source: &str) -> Result<ResponseSink, ExecutionError> {
        let script = Script::parse(Source::from_bytes(source), None, &mut self.context)
            .map_err(|e| ExecutionError::Compile(self.describe(&e)))?;
        let completion = script
            .evaluate(&mut self.context)
            .map_err(|e| ExecutionError::Uncaught(self.describe(&e)))?;
        self.microtasks.drain(&mut self.context);
        self.check_runaway_jobs()?;

        let value = self.settle(completion)?;
        self.drain_timers()?;
        self.write_value(&value)?;

        Ok(std::mem::take(&mut *self.response.borrow_mut()))
    }

    /// Jobs left after a drain mean the drain hit the deadline.
    fn check_runaway_jobs(&self) -> Result<(), ExecutionError> {
        if self.microtasks.has_pending_jobs() {
            return Err(ExecutionError::Timeout(self.timeout_ms));
        }
        Ok(())
    }

    fn describe(&mut self, err: &JsError) -> String {
        describe_error(err, &mut self.context)
    }

    /// Waits for a promise completion value; other values pass through.
    fn settle(&mut self, completion: JsValue) -> Result<JsValue, ExecutionError> {
        let Some(promise) = completion
            .as_object()
            .and_then(|object| JsPromise::from_object(object.clone()).ok())
        else {
            return Ok(completion);
        };

        loop {
            match Settlement::of(&promise) {
                Settlement::Fulfilled(value) => return Ok(value),
                Settlement::Rejected(reason) => {
                    let reason = JsError::from_opaque(reason);
                    return Err(ExecutionError::Rejected(self.describe(&reason)));
                }
                Settlement::Pending => {}
            }

            if self.clock.now() >= self.deadline {
                return Err(ExecutionError::Timeout(self.timeout_ms));
            }
            if self.timers.borrow().is_empty() && !self.microtasks.has_pending_jobs() {
                return Err(ExecutionError::Unsettled(
                    "promise is pending and no timers or jobs remain".to_string(),
                ));
            }

            let outcome = self.pump(|| !Settlement::is_pending(&promise));
            self.check_runaway_jobs()?;
            if outcome == DrainOutcome::Deadline && Settlement::is_pending(&promise) {
                return Err(ExecutionError::Timeout(self.timeout_ms));
            }
        }
    }

    /// Fires due timers, with a microtask checkpoint after each, until `stop`.
    fn pump(&mut self, stop: impl FnMut() -> bool) -> DrainOutcome {
        let context = &mut self.context;
        let microtasks = &self.microtasks;
        self.microtasks.drain(context);
        event_loop::drain(
            &self.timers,
            self.deadline,
            |callback| {
                if let Err(err) = callback.call(context) {
                    tracing::warn!("uncaught error in timer callback: {}", describe_error(&err, context));
                }
                microtasks.drain(context);
            },
            stop,
        )
    }

    /// Lets timers still pending after settlement run until the deadline.
    fn drain_timers(&mut self) -> Result<(), ExecutionError> {
        if self.timers.borrow().is_empty() {
            return Ok(());
        }
        if self.pump(|| false) == DrainOutcome::Deadline {
            tracing::warn!(
                pending = self.timers.borrow().len(),
                "execution deadline reached with timers still pending"
            );
        }
        self.check_runaway_jobs()
    }

    /// Appends the final value to the body: objects as JSON, primitives as
    /// their string form, `undefined`, `null` and symbols as nothing.
    ///
    /// `response` itself is skipped, so scripts ending in a chained
    /// `response.send(...)` do not also write the builder.
    fn write_value(&mut self, value: &JsValue) -> Result<(), ExecutionError> {
        if value.is_null_or_undefined() || value.is_symbol() {
            return Ok(());
        }
        if let Some(object) = value.as_object() {
            if JsObject::equals(&object, &self.response_object) {
                return Ok(());
            }
        }
        let text = if value.is_object() {
            match stringify(value, &mut self.context) {
                Ok(Some(json)) => json,
                Ok(None) => return Ok(()),
                Err(e) => return Err(ExecutionError::Uncaught(self.describe(&e))),
            }
        } else {
            match value.to_string(&mut self.context) {
                Ok(s) => s.to_std_string_escaped(),
                Err(e) => return Err(ExecutionError::Uncaught(self.describe(&e))),
            }
        };
        self.response.borrow_mut().write(text.as_bytes());
        Ok(())
    }
}

impl Drop for ExecutionContext {
    /// Timer callbacks and queued jobs root objects of this context, and the
    /// timer bindings hold the loop from inside the heap. Emptying both on
    /// every exit path lets the whole realm be collected.
    fn drop(&mut self) {
        if let Ok(mut timers) = self.timers.try_borrow_mut() {
            timers.clear_all();
        }
        self.microtasks.clear();
    }
}

/// Runs scripts, each in its own [`ExecutionContext`].
///
/// A `Sandbox` is cheap to clone and `Send + Sync`; the contexts it creates
/// are neither, so [`Sandbox::execute`] must run on a thread that can block
/// (e.g. inside `tokio::task::spawn_blocking`).
///
/// # Example
///
/// ```no_run
/// use hput_server::{RequestView, ResourceLimits, Sandbox};
///
/// let sandbox = Sandbox::new(ResourceLimits::default());
/// let request = RequestView::new("GET", "/greet").with_query("name=Ada");
/// let response = sandbox
///     .execute("'Hello, ' + request.query.name", &request)
///     .unwrap();
/// assert_eq!(response.body(), b"Hello, Ada");
/// ```
#[derive(Clone)]
pub struct Sandbox {
    limits: ResourceLimits,
    clock: Arc<dyn Clock>,
}

impl Sandbox {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for deadlines and timers.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Executes `source` for `request`.
    ///
    /// # Errors
    ///
    /// Returns the [`ExecutionError`] that ended the execution. Anything the
    /// script wrote before failing is discarded.
    pub fn execute(&self, source: &str, request: &RequestView) -> Result<ResponseSink, ExecutionError> {
        let started = Instant::now();
        let result = ExecutionContext::new(request, &self.limits, Arc::clone(&self.clock))
            .and_then(|context| context.run(source));

        match &result {
            Ok(response) => tracing::debug!(
                path = %request.path,
                status = response.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "script executed"
            ),
            Err(e) => tracing::debug!(path = %request.path, error = %e, "script failed"),
        }
        result
    }
}
