//! `setTimeout`, `setInterval` and their `clear*` counterparts.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use boa_engine::{Context, JsResult, JsString, JsValue, native_function::NativeFunction, object::JsObject};
use boa_gc::{Finalize, Trace};

use crate::runtime::event_loop::{EventLoop, TimerId};

/// Interval used when `setInterval` gets no usable delay.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);

/// Longest delay honoured; larger values are clamped.
const MAX_DELAY_MS: f64 = u32::MAX as f64;

/// A scheduled script callback and the extra arguments to call it with.
#[derive(Clone)]
pub(crate) struct TimerCallback {
    pub function: JsObject,
    pub args: Vec<JsValue>,
}

impl TimerCallback {
    pub fn call(&self, ctx: &mut Context) -> JsResult<JsValue> {
        self.function.call(&JsValue::undefined(), &self.args, ctx)
    }
}

// The loop is owned by the execution context, which outlives the context's
// heap, so the callbacks it holds stay reachable without being traced.
#[derive(Trace, Finalize, Clone)]
struct LoopHandle {
    #[unsafe_ignore_trace]
    event_loop: Rc<RefCell<EventLoop<TimerCallback>>>,
}

fn delay_arg(args: &[JsValue], ctx: &mut Context) -> JsResult<Option<Duration>> {
    let Some(value) = args.get(1) else {
        return Ok(None);
    };
    let millis = value.to_number(ctx)?;
    if millis.is_nan() || millis <= 0.0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_secs_f64(millis.min(MAX_DELAY_MS) / 1000.0)))
}

/// Returns the new timer id, or `0` when the first argument is not callable.
fn schedule(args: &[JsValue], handle: &LoopHandle, repeat: bool, ctx: &mut Context) -> JsResult<JsValue> {
    let Some(function) = args.first().and_then(|v| v.as_callable()).map(|f| f.clone()) else {
        return Ok(JsValue::new(0));
    };
    let delay = delay_arg(args, ctx)?;
    let callback = TimerCallback {
        function,
        args: args.get(2..).map(<[JsValue]>::to_vec).unwrap_or_default(),
    };

    let mut event_loop = handle.event_loop.borrow_mut();
    let id = if repeat {
        event_loop.set_interval(callback, delay.unwrap_or(DEFAULT_INTERVAL))
    } else {
        event_loop.set_timeout(callback, delay.unwrap_or(Duration::ZERO))
    };
    Ok(JsValue::new(id))
}

fn clear(args: &[JsValue], handle: &LoopHandle, ctx: &mut Context) -> JsResult<JsValue> {
    if let Some(value) = args.first() {
        let id = value.to_number(ctx)?;
        if id.is_finite() && id >= 1.0 && id <= f64::from(TimerId::MAX) {
            handle.event_loop.borrow_mut().clear(id as TimerId);
        }
    }
    Ok(JsValue::undefined())
}

pub(super) fn install(ctx: &mut Context, event_loop: Rc<RefCell<EventLoop<TimerCallback>>>) -> JsResult<()> {
    let handle = LoopHandle { event_loop };

    let bindings: [(&str, usize, NativeFunction); 4] = [
        (
            "setTimeout",
            2,
            NativeFunction::from_copy_closure_with_captures(
                |_this, args, handle: &LoopHandle, ctx| schedule(args, handle, false, ctx),
                handle.clone(),
            ),
        ),
        (
            "setInterval",
            2,
            NativeFunction::from_copy_closure_with_captures(
                |_this, args, handle: &LoopHandle, ctx| schedule(args, handle, true, ctx),
                handle.clone(),
            ),
        ),
        (
            "clearTimeout",
            1,
            NativeFunction::from_copy_closure_with_captures(
                |_this, args, handle: &LoopHandle, ctx| clear(args, handle, ctx),
                handle.clone(),
            ),
        ),
        (
            "clearInterval",
            1,
            NativeFunction::from_copy_closure_with_captures(
                |_this, args, handle: &LoopHandle, ctx| clear(args, handle, ctx),
                handle,
            ),
        ),
    ];

    for (name, length, function) in bindings {
        ctx.register_global_callable(JsString::from(name), length, function)?;
    }
    Ok(())
}
