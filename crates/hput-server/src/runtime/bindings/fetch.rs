//! `fetch(url, options)`: outbound HTTP from scripts.
//!
//! The request runs to completion on a shared tokio runtime while the
//! script's thread blocks, so the returned promise is already settled. That
//! keeps the event loop single-threaded at the cost of one blocked thread per
//! in-flight fetch, which the blocking pool absorbs.
//!
//! Failures (bad URL, refused connection, timeout) reject with a `TypeError`
//! whose message starts with `fetch:`. A non-2xx status is not a failure.

use std::rc::Rc;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use boa_engine::{
    Context, JsResult, JsString, JsValue, js_string, native_function::NativeFunction,
    object::ObjectInitializer, property::Attribute, property::PropertyKey,
};
use boa_gc::{Finalize, Trace};

use super::{define_method, settled_promise, string_arg, type_error};
use crate::runtime::conversions::{parse_json, string_object};
use crate::runtime::event_loop::Clock;

/// Bodies longer than this are truncated.
pub const MAX_FETCH_BODY: usize = 10 * 1024 * 1024;

/// Shared runtime that drives outbound requests for every execution.
static FETCH_RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

/// Shared client, so connections are pooled across executions.
static FETCH_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Gets or creates the shared fetch runtime.
///
/// # Errors
///
/// Returns an error if tokio runtime creation fails (e.g., due to system
/// resource limits).
pub fn fetch_runtime() -> std::io::Result<&'static tokio::runtime::Runtime> {
    if let Some(runtime) = FETCH_RUNTIME.get() {
        return Ok(runtime);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("hput-fetch")
        .enable_all()
        .build()?;

    Ok(FETCH_RUNTIME.get_or_init(|| runtime))
}

fn fetch_client() -> Result<&'static reqwest::Client, String> {
    if let Some(client) = FETCH_CLIENT.get() {
        return Ok(client);
    }

    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| format!("fetch: cannot build http client: {e}"))?;

    Ok(FETCH_CLIENT.get_or_init(|| client))
}

#[derive(Debug, Clone, PartialEq)]
struct FetchRequest {
    url: String,
    method: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

#[derive(Debug, Clone)]
struct FetchResponse {
    status: u16,
    status_text: String,
    url: String,
    headers: Vec<(String, String)>,
    body: String,
}

/// Deadline of the execution the binding belongs to.
#[derive(Trace, Finalize, Clone)]
struct FetchBudget {
    #[unsafe_ignore_trace]
    clock: Arc<dyn Clock>,
    #[unsafe_ignore_trace]
    deadline: Instant,
}

impl FetchBudget {
    fn remaining(&self) -> Option<Duration> {
        let remaining = self.deadline.saturating_duration_since(self.clock.now());
        (!remaining.is_zero()).then_some(remaining)
    }
}

/// Response body captured by `text()` / `json()`.
#[derive(Trace, Finalize, Clone)]
struct BodyHandle {
    #[unsafe_ignore_trace]
    text: Rc<str>,
}

/// Reads `url` and `options` into a request. `url` may also be an object
/// with a `url` property.
fn parse_request(args: &[JsValue], ctx: &mut Context) -> JsResult<FetchRequest> {
    let url = match args.first() {
        Some(value) if value.is_object() => {
            let object = value.as_object().map(|o| o.clone()).ok_or_else(|| type_error("fetch: invalid url"))?;
            let url = object.get(js_string!("url"), ctx)?;
            string_arg(&[url], 0, "fetch: url", ctx)?
        }
        _ => string_arg(args, 0, "fetch: url", ctx)?,
    };

    let mut request = FetchRequest {
        url,
        method: "GET".to_string(),
        headers: Vec::new(),
        body: None,
    };

    let Some(options) = args.get(1).filter(|v| !v.is_null_or_undefined()) else {
        return Ok(request);
    };
    let options = options
        .as_object()
        .map(|o| o.clone())
        .ok_or_else(|| type_error("fetch: options must be an object"))?;

    let method = options.get(js_string!("method"), ctx)?;
    if !method.is_null_or_undefined() {
        request.method = method.to_string(ctx)?.to_std_string_escaped().to_ascii_uppercase();
    }

    let headers = options.get(js_string!("headers"), ctx)?;
    if let Some(headers) = headers.as_object().map(|o| o.clone()) {
        for key in headers.own_property_keys(ctx)? {
            let name = match &key {
                PropertyKey::String(s) => s.to_std_string_escaped(),
                PropertyKey::Index(i) => i.get().to_string(),
                PropertyKey::Symbol(_) => continue,
            };
            let value = headers.get(key, ctx)?;
            request
                .headers
                .push((name, value.to_string(ctx)?.to_std_string_escaped()));
        }
    }

    let body = options.get(js_string!("body"), ctx)?;
    if !body.is_null_or_undefined() {
        request.body = Some(body.to_string(ctx)?.to_std_string_escaped());
    }

    Ok(request)
}

async fn send(request: FetchRequest, timeout: Duration) -> Result<FetchResponse, String> {
    let client = fetch_client()?;
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|_| format!("fetch: invalid method '{}'", request.method))?;

    let mut builder = client.request(method, &request.url).timeout(timeout);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let mut response = builder.send().await.map_err(|e| format!("fetch: {e}"))?;

    let status = response.status();
    let url = response.url().to_string();
    let mut headers: Vec<(String, String)> = Vec::new();
    for (name, value) in response.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match headers.iter_mut().find(|(n, _)| n == name.as_str()) {
            Some((_, joined)) => {
                joined.push_str(", ");
                joined.push_str(&value);
            }
            None => headers.push((name.as_str().to_string(), value)),
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| format!("fetch: {e}"))? {
        let room = MAX_FETCH_BODY - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            tracing::warn!(url = %url, "fetch body truncated at {MAX_FETCH_BODY} bytes");
            break;
        }
        body.extend_from_slice(&chunk);
    }

    Ok(FetchResponse {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        url,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn perform(request: FetchRequest, budget: &FetchBudget) -> Result<FetchResponse, String> {
    let timeout = budget
        .remaining()
        .ok_or_else(|| "fetch: execution deadline reached".to_string())?;
    let runtime = fetch_runtime().map_err(|e| format!("fetch: no runtime: {e}"))?;
    tracing::debug!(method = %request.method, url = %request.url, "fetch");
    runtime.block_on(send(request, timeout))
}

fn body_text(_this: &JsValue, _args: &[JsValue], body: &BodyHandle, ctx: &mut Context) -> JsResult<JsValue> {
    settled_promise(Ok(JsValue::new(JsString::from(&*body.text))), ctx)
}

fn body_json(_this: &JsValue, _args: &[JsValue], body: &BodyHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let parsed = parse_json(&body.text, ctx);
    settled_promise(parsed, ctx)
}

fn response_object(response: FetchResponse, ctx: &mut Context) -> JsResult<JsValue> {
    let headers = string_object(&response.headers, ctx)?;
    let ok = (200..300).contains(&response.status);
    let visible = Attribute::ENUMERABLE;
    let object = ObjectInitializer::new(ctx)
        .property(js_string!("ok"), ok, visible)
        .property(js_string!("status"), i32::from(response.status), visible)
        .property(
            js_string!("statusText"),
            JsString::from(response.status_text.as_str()),
            visible,
        )
        .property(js_string!("url"), JsString::from(response.url.as_str()), visible)
        .property(js_string!("headers"), headers, visible)
        .build();

    let body = BodyHandle {
        text: Rc::from(response.body),
    };
    define_method(
        &object,
        "text",
        0,
        NativeFunction::from_copy_closure_with_captures(body_text, body.clone()),
        ctx,
    )?;
    define_method(
        &object,
        "json",
        0,
        NativeFunction::from_copy_closure_with_captures(body_json, body),
        ctx,
    )?;
    Ok(object.into())
}

fn fetch(_this: &JsValue, args: &[JsValue], budget: &FetchBudget, ctx: &mut Context) -> JsResult<JsValue> {
    let outcome = parse_request(args, ctx).and_then(|request| {
        perform(request, budget).map_err(type_error)
    });
    let outcome = match outcome {
        Ok(response) => response_object(response, ctx),
        Err(err) => Err(err),
    };
    settled_promise(outcome, ctx)
}

pub(super) fn install(ctx: &mut Context, clock: Arc<dyn Clock>, deadline: Instant) -> JsResult<()> {
    let budget = FetchBudget { clock, deadline };
    ctx.register_global_callable(
        js_string!("fetch"),
        1,
        NativeFunction::from_copy_closure_with_captures(fetch, budget),
    )?;
    Ok(())
}
