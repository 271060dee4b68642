//! `request`: the triggering HTTP request, read-only.

use std::rc::Rc;

use boa_engine::{
    Context, JsResult, JsString, JsValue, js_string, native_function::NativeFunction,
    object::ObjectInitializer, property::Attribute,
};
use boa_gc::{Finalize, Trace};

use super::{define_method, string_arg};
use crate::runtime::conversions::{multi_value_object, string_object, values_to_js};
use crate::runtime::request::RequestView;

/// Grouped headers captured by `request.get` / `request.header`.
#[derive(Trace, Finalize, Clone)]
struct HeaderLookup {
    #[unsafe_ignore_trace]
    headers: Rc<Vec<(String, Vec<String>)>>,
}

/// `request.get(name)`: case-insensitive header lookup. A repeated header
/// yields an array, a missing one `undefined`.
fn get_header(
    _this: &JsValue,
    args: &[JsValue],
    lookup: &HeaderLookup,
    ctx: &mut Context,
) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "header name", ctx)?.to_ascii_lowercase();
    match lookup.headers.iter().find(|(k, _)| *k == name) {
        Some((_, values)) => Ok(values_to_js(values, ctx)),
        None => Ok(JsValue::undefined()),
    }
}

pub(super) fn install(ctx: &mut Context, request: &RequestView) -> JsResult<()> {
    let grouped = request.grouped_headers();
    let headers = multi_value_object(&grouped, ctx)?;
    let query = multi_value_object(&request.grouped_query(), ctx)?;
    let cookies = string_object(&request.cookies(), ctx)?;
    let body = String::from_utf8_lossy(&request.body).into_owned();

    let text = |s: &str| JsValue::new(JsString::from(s));
    let visible = Attribute::ENUMERABLE;
    let object = ObjectInitializer::new(ctx)
        .property(js_string!("method"), text(&request.method), visible)
        .property(js_string!("path"), text(&request.path), visible)
        .property(js_string!("baseUrl"), text(request.base_segment()), visible)
        .property(
            js_string!("protocol"),
            text(&request.protocol.to_ascii_lowercase()),
            visible,
        )
        .property(js_string!("ip"), text(&request.ip()), visible)
        .property(js_string!("hostname"), text(request.hostname()), visible)
        .property(js_string!("body"), text(&body), visible)
        .property(js_string!("headers"), headers, visible)
        .property(js_string!("query"), query, visible)
        .property(js_string!("cookies"), cookies, visible)
        .build();

    let lookup = HeaderLookup {
        headers: Rc::new(grouped),
    };
    for name in ["get", "header"] {
        define_method(
            &object,
            name,
            1,
            NativeFunction::from_copy_closure_with_captures(get_header, lookup.clone()),
            ctx,
        )?;
    }

    ctx.register_global_property(js_string!("request"), object, Attribute::all())?;
    Ok(())
}
