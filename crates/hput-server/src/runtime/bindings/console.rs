//! `console`: script output routed to the host's tracing subscriber.

use boa_engine::{
    Context, JsResult, JsValue, js_string, native_function::NativeFunction, object::JsObject,
    property::Attribute,
};

use super::define_method;
use crate::runtime::conversions::display_value;

/// Log target for script output, so it can be filtered apart from the host's.
pub const SCRIPT_TARGET: &str = "hput::script";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

fn join_args(args: &[JsValue], ctx: &mut Context) -> JsResult<String> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(display_value(arg, ctx)?);
    }
    Ok(parts.join(" "))
}

fn emit(level: Level, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let line = join_args(args, ctx)?;
    match level {
        Level::Debug => tracing::debug!(target: SCRIPT_TARGET, "{line}"),
        Level::Info => tracing::info!(target: SCRIPT_TARGET, "{line}"),
        Level::Warn => tracing::warn!(target: SCRIPT_TARGET, "{line}"),
        Level::Error => tracing::error!(target: SCRIPT_TARGET, "{line}"),
    }
    Ok(JsValue::undefined())
}

pub(super) fn install(ctx: &mut Context) -> JsResult<()> {
    let console = JsObject::with_object_proto(ctx.intrinsics());

    define_method(
        &console,
        "log",
        0,
        NativeFunction::from_fn_ptr(|_, args, ctx| emit(Level::Info, args, ctx)),
        ctx,
    )?;
    define_method(
        &console,
        "info",
        0,
        NativeFunction::from_fn_ptr(|_, args, ctx| emit(Level::Info, args, ctx)),
        ctx,
    )?;
    define_method(
        &console,
        "debug",
        0,
        NativeFunction::from_fn_ptr(|_, args, ctx| emit(Level::Debug, args, ctx)),
        ctx,
    )?;
    define_method(
        &console,
        "warn",
        0,
        NativeFunction::from_fn_ptr(|_, args, ctx| emit(Level::Warn, args, ctx)),
        ctx,
    )?;
    define_method(
        &console,
        "error",
        0,
        NativeFunction::from_fn_ptr(|_, args, ctx| emit(Level::Error, args, ctx)),
        ctx,
    )?;

    ctx.register_global_property(js_string!("console"), console, Attribute::all())?;
    Ok(())
}
