//! Host bindings exposed to scripts.
//!
//! This is the single place where native functions are installed into a
//! fresh execution context. Every binding shares per-execution state through
//! `Rc` handles captured in the native closures; nothing here is global.
//!
//! # JavaScript API
//!
//! - `request`: read-only view of the triggering HTTP request
//! - `response`: chainable response builder
//! - `console.log/info/warn/error/debug`
//! - `fetch(url, options)`
//! - `setTimeout/clearTimeout/setInterval/clearInterval`

mod console;
mod fetch;
mod request;
mod response;
mod timers;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use boa_engine::{
    Context, JsNativeError, JsResult, JsString, JsValue,
    native_function::NativeFunction,
    object::{FunctionObjectBuilder, JsObject, builtins::JsPromise},
};
use hput_common::ExecutionError;

use super::event_loop::{Clock, EventLoop};
use super::request::RequestView;
use super::response::ResponseSink;

pub use fetch::MAX_FETCH_BODY;
pub(crate) use timers::TimerCallback;

/// Per-execution state the bindings close over.
pub(crate) struct HostState<'a> {
    pub request: &'a RequestView,
    pub response: Rc<RefCell<ResponseSink>>,
    pub timers: Rc<RefCell<EventLoop<TimerCallback>>>,
    pub clock: Arc<dyn Clock>,
    pub deadline: Instant,
}

/// Installs every host binding into `ctx` and returns the `response` object.
///
/// # Errors
///
/// Returns [`ExecutionError::Binding`] naming the binding that failed.
pub(crate) fn install_bindings(ctx: &mut Context, state: HostState<'_>) -> Result<JsObject, ExecutionError> {
    let binding_error = |name: &str| {
        let name = name.to_string();
        move |e: boa_engine::JsError| ExecutionError::Binding(format!("{name}: {e}"))
    };

    request::install(ctx, state.request).map_err(binding_error("request"))?;
    let response = response::install(ctx, state.response).map_err(binding_error("response"))?;
    console::install(ctx).map_err(binding_error("console"))?;
    fetch::install(ctx, state.clock, state.deadline).map_err(binding_error("fetch"))?;
    timers::install(ctx, state.timers).map_err(binding_error("timers"))?;
    Ok(response)
}

/// Adds a non-enumerable method to `target`.
pub(crate) fn define_method(
    target: &JsObject,
    name: &str,
    length: usize,
    function: NativeFunction,
    ctx: &mut Context,
) -> JsResult<()> {
    let name = JsString::from(name);
    let function = FunctionObjectBuilder::new(ctx.realm(), function)
        .name(name.clone())
        .length(length)
        .build();
    target.set(name, function, false, ctx)?;
    Ok(())
}

/// Required argument converted with `ToString`.
pub(crate) fn string_arg(args: &[JsValue], index: usize, what: &str, ctx: &mut Context) -> JsResult<String> {
    let value = args
        .get(index)
        .filter(|v| !v.is_undefined())
        .ok_or_else(|| JsNativeError::typ().with_message(format!("{what} is required")))?;
    Ok(value.to_string(ctx)?.to_std_string_escaped())
}

/// Optional argument converted with `ToString`; `undefined` and `null` are absent.
pub(crate) fn optional_string_arg(args: &[JsValue], index: usize, ctx: &mut Context) -> JsResult<Option<String>> {
    match args.get(index) {
        Some(value) if !value.is_null_or_undefined() => {
            Ok(Some(value.to_string(ctx)?.to_std_string_escaped()))
        }
        _ => Ok(None),
    }
}

pub(crate) fn type_error(message: impl Into<String>) -> boa_engine::JsError {
    JsNativeError::typ().with_message(message.into()).into()
}

/// A promise already resolved with `Ok` or rejected with `Err`.
pub(crate) fn settled_promise(outcome: JsResult<JsValue>, ctx: &mut Context) -> JsResult<JsValue> {
    let (promise, resolvers) = JsPromise::new_pending(ctx);
    match outcome {
        Ok(value) => {
            resolvers.resolve.call(&JsValue::undefined(), &[value], ctx)?;
        }
        Err(err) => {
            let reason = err.to_opaque(ctx);
            resolvers.reject.call(&JsValue::undefined(), &[reason], ctx)?;
        }
    }
    Ok(promise.into())
}
