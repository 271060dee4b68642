//! `response`: builds the HTTP response of an execution.
//!
//! Every method returns `response` itself so calls chain:
//! `response.status(201).set('x-id', '7').send('created')`.

use std::cell::RefCell;
use std::rc::Rc;

use boa_engine::{
    Context, JsNativeError, JsResult, JsValue, js_string, native_function::NativeFunction,
    object::JsObject, property::Attribute,
};
use boa_gc::{Finalize, Trace};
use chrono::{DateTime, Utc};

use super::{define_method, optional_string_arg, string_arg, type_error};
use crate::runtime::conversions::{display_value, stringify};
use crate::runtime::response::ResponseSink;

#[derive(Trace, Finalize, Clone)]
struct SinkHandle {
    #[unsafe_ignore_trace]
    sink: Rc<RefCell<ResponseSink>>,
}

type Method = fn(&JsValue, &[JsValue], &SinkHandle, &mut Context) -> JsResult<JsValue>;

pub(super) fn install(ctx: &mut Context, sink: Rc<RefCell<ResponseSink>>) -> JsResult<JsObject> {
    let handle = SinkHandle { sink };
    let object = JsObject::with_object_proto(ctx.intrinsics());

    let methods: [(&str, usize, Method); 9] = [
        ("append", 2, append),
        ("cookie", 3, cookie),
        ("json", 1, json),
        ("location", 1, location),
        ("redirect", 2, redirect),
        ("send", 1, send),
        ("sendStatus", 1, send_status),
        ("set", 2, set),
        ("status", 1, status),
    ];
    for (name, length, method) in methods {
        define_method(
            &object,
            name,
            length,
            NativeFunction::from_copy_closure_with_captures(method, handle.clone()),
            ctx,
        )?;
    }

    ctx.register_global_property(js_string!("response"), object.clone(), Attribute::all())?;
    Ok(object)
}

fn status_arg(args: &[JsValue], index: usize, ctx: &mut Context) -> JsResult<u16> {
    let code = args
        .get(index)
        .filter(|v| !v.is_undefined())
        .ok_or_else(|| type_error("status code is required"))?
        .to_number(ctx)?;
    if !code.is_finite() || code.fract() != 0.0 || !(100.0..=999.0).contains(&code) {
        return Err(JsNativeError::range()
            .with_message(format!("invalid status code {code}"))
            .into());
    }
    Ok(code as u16)
}

fn sink_error(message: String) -> boa_engine::JsError {
    type_error(message)
}

fn append(this: &JsValue, args: &[JsValue], handle: &SinkHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "header name", ctx)?;
    let value = string_arg(args, 1, "header value", ctx)?;
    handle.sink.borrow_mut().append_header(&name, &value).map_err(sink_error)?;
    Ok(this.clone())
}

fn set(this: &JsValue, args: &[JsValue], handle: &SinkHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "header name", ctx)?;
    let value = optional_string_arg(args, 1, ctx)?;
    let mut sink = handle.sink.borrow_mut();
    let result = match value {
        Some(value) if !value.is_empty() => sink.set_header(&name, &value),
        _ => sink.remove_header(&name),
    };
    result.map_err(sink_error)?;
    Ok(this.clone())
}

fn status(this: &JsValue, args: &[JsValue], handle: &SinkHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let code = status_arg(args, 0, ctx)?;
    handle.sink.borrow_mut().set_status(code).map_err(sink_error)?;
    Ok(this.clone())
}

fn send_status(this: &JsValue, args: &[JsValue], handle: &SinkHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let code = status_arg(args, 0, ctx)?;
    let mut sink = handle.sink.borrow_mut();
    sink.set_status(code).map_err(sink_error)?;
    sink.commit();
    Ok(this.clone())
}

fn location(this: &JsValue, args: &[JsValue], handle: &SinkHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let url = string_arg(args, 0, "location", ctx)?;
    handle.sink.borrow_mut().set_header("location", &url).map_err(sink_error)?;
    Ok(this.clone())
}

/// `redirect(url)` or `redirect(status, url)`; the status defaults to 302.
fn redirect(this: &JsValue, args: &[JsValue], handle: &SinkHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let (code, url) = if args.len() >= 2 {
        (status_arg(args, 0, ctx)?, string_arg(args, 1, "redirect url", ctx)?)
    } else {
        (302, string_arg(args, 0, "redirect url", ctx)?)
    };
    let mut sink = handle.sink.borrow_mut();
    sink.set_status(code).map_err(sink_error)?;
    sink.set_header("location", &url).map_err(sink_error)?;
    sink.write(url.as_bytes());
    Ok(this.clone())
}

fn json(this: &JsValue, args: &[JsValue], handle: &SinkHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let value = args.first().cloned().unwrap_or_default();
    write_json(&value, handle, ctx)?;
    Ok(this.clone())
}

fn write_json(value: &JsValue, handle: &SinkHandle, ctx: &mut Context) -> JsResult<()> {
    let body = stringify(value, ctx)?.unwrap_or_default();
    let mut sink = handle.sink.borrow_mut();
    sink.set_header("content-type", "application/json")
        .map_err(sink_error)?;
    sink.write(body.as_bytes());
    Ok(())
}

/// Objects are sent as JSON; `undefined` and `null` commit an empty body.
fn send(this: &JsValue, args: &[JsValue], handle: &SinkHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let value = args.first().cloned().unwrap_or_default();
    if value.is_object() && !value.is_callable() {
        write_json(&value, handle, ctx)?;
        return Ok(this.clone());
    }
    let body = if value.is_null_or_undefined() {
        String::new()
    } else {
        display_value(&value, ctx)?
    };
    handle.sink.borrow_mut().write(body.as_bytes());
    Ok(this.clone())
}

/// Attributes accepted by `response.cookie(name, value, options)`.
#[derive(Debug, Default, PartialEq)]
struct CookieOptions {
    domain: Option<String>,
    path: Option<String>,
    /// Seconds
    max_age: Option<i64>,
    expires: Option<DateTime<Utc>>,
    http_only: bool,
    secure: bool,
}

impl CookieOptions {
    fn from_js(value: Option<&JsValue>, ctx: &mut Context) -> JsResult<Self> {
        let Some(value) = value.filter(|v| !v.is_null_or_undefined()) else {
            return Ok(Self::default());
        };
        let options = value
            .as_object()
            .map(|o| o.clone())
            .ok_or_else(|| type_error("cookie options must be an object"))?;

        let mut parsed = Self::default();
        let domain = options.get(js_string!("domain"), ctx)?;
        if !domain.is_null_or_undefined() {
            parsed.domain = Some(domain.to_string(ctx)?.to_std_string_escaped());
        }
        let path = options.get(js_string!("path"), ctx)?;
        if !path.is_null_or_undefined() {
            parsed.path = Some(path.to_string(ctx)?.to_std_string_escaped());
        }
        let max_age = options.get(js_string!("maxAge"), ctx)?;
        if !max_age.is_null_or_undefined() {
            let seconds = max_age.to_number(ctx)?;
            if !seconds.is_finite() {
                return Err(type_error("cookie maxAge must be a finite number"));
            }
            parsed.max_age = Some(seconds.trunc() as i64);
        }
        let expires = options.get(js_string!("expires"), ctx)?;
        if !expires.is_null_or_undefined() {
            parsed.expires = Some(date_to_utc(&expires, ctx)?);
        }
        parsed.http_only = options.get(js_string!("httpOnly"), ctx)?.to_boolean();
        parsed.secure = options.get(js_string!("secure"), ctx)?.to_boolean();
        Ok(parsed)
    }
}

fn date_to_utc(value: &JsValue, ctx: &mut Context) -> JsResult<DateTime<Utc>> {
    let not_a_date = || type_error("cookie expires must be a Date");
    let date = value.as_object().map(|o| o.clone()).ok_or_else(not_a_date)?;
    let get_time = date.get(js_string!("getTime"), ctx)?;
    let get_time = get_time
        .as_callable()
        .map(|f| f.clone())
        .ok_or_else(not_a_date)?;
    let millis = get_time.call(value, &[], ctx)?.to_number(ctx)?;
    if !millis.is_finite() {
        return Err(type_error("cookie expires is an invalid Date"));
    }
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
        .ok_or_else(|| type_error("cookie expires is out of range"))
}

fn valid_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b))
}

/// `Set-Cookie` value in the attribute order browsers and Go's net/http agree on.
fn format_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut cookie = format!("{name}={value}");
    if let Some(path) = &options.path {
        cookie.push_str(&format!("; Path={path}"));
    }
    if let Some(domain) = &options.domain {
        cookie.push_str(&format!("; Domain={}", domain.trim_start_matches('.')));
    }
    if let Some(expires) = &options.expires {
        cookie.push_str(&format!(
            "; Expires={}",
            expires.format("%a, %d %b %Y %H:%M:%S GMT")
        ));
    }
    match options.max_age {
        Some(seconds) if seconds > 0 => cookie.push_str(&format!("; Max-Age={seconds}")),
        Some(seconds) if seconds < 0 => cookie.push_str("; Max-Age=0"),
        _ => {}
    }
    if options.http_only {
        cookie.push_str("; HttpOnly");
    }
    if options.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn cookie(this: &JsValue, args: &[JsValue], handle: &SinkHandle, ctx: &mut Context) -> JsResult<JsValue> {
    let name = string_arg(args, 0, "cookie name", ctx)?;
    if !valid_cookie_name(&name) {
        return Err(type_error(format!("invalid cookie name '{name}'")));
    }
    let value = optional_string_arg(args, 1, ctx)?.unwrap_or_default();
    if value.bytes().any(|b| b == b';' || b.is_ascii_control()) {
        return Err(type_error(format!("invalid value for cookie '{name}'")));
    }
    let options = CookieOptions::from_js(args.get(2), ctx)?;
    handle
        .sink
        .borrow_mut()
        .append_header("set-cookie", &format_cookie(&name, &value, &options))
        .map_err(sink_error)?;
    Ok(this.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;
    use hyper::StatusCode;

    fn setup() -> (Context, Rc<RefCell<ResponseSink>>) {
        let mut ctx = Context::default();
        let sink = Rc::new(RefCell::new(ResponseSink::new()));
        install(&mut ctx, sink.clone()).unwrap();
        (ctx, sink)
    }

    fn run(ctx: &mut Context, src: &str) {
        ctx.eval(Source::from_bytes(src)).unwrap();
    }

    fn header(sink: &Rc<RefCell<ResponseSink>>, name: &str) -> Vec<String> {
        sink.borrow()
            .headers()
            .get_all(name)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    // ========================================================================
    // Status and body
    // ========================================================================

    #[test]
    fn test_methods_chain() {
        let (mut ctx, sink) = setup();
        run(&mut ctx, "response.status(201).set('x-id', '7').send('created')");

        let sink = sink.borrow();
        assert_eq!(sink.status(), StatusCode::CREATED);
        assert_eq!(sink.headers()["x-id"], "7");
        assert_eq!(sink.body(), b"created");
    }

    #[test]
    fn test_invalid_status_throws() {
        let (mut ctx, _sink) = setup();
        assert!(ctx.eval(Source::from_bytes("response.status(42)")).is_err());
        assert!(ctx.eval(Source::from_bytes("response.status()")).is_err());
        assert!(ctx.eval(Source::from_bytes("response.status(200.5)")).is_err());
    }

    #[test]
    fn test_send_object_writes_json() {
        let (mut ctx, sink) = setup();
        run(&mut ctx, "response.send({ ok: true })");

        assert_eq!(sink.borrow().body(), br#"{"ok":true}"#);
        assert_eq!(header(&sink, "content-type"), vec!["application/json"]);
    }

    #[test]
    fn test_json_writes_body() {
        let (mut ctx, sink) = setup();
        run(&mut ctx, "response.json([1, 'two'])");
        assert_eq!(sink.borrow().body(), br#"[1,"two"]"#);
    }

    #[test]
    fn test_send_status_commits() {
        let (mut ctx, sink) = setup();
        run(&mut ctx, "response.sendStatus(404); response.status(200).set('x-late', '1')");

        let sink = sink.borrow();
        assert_eq!(sink.status(), StatusCode::NOT_FOUND);
        assert!(sink.is_committed());
        assert!(sink.headers().get("x-late").is_none());
    }

    #[test]
    fn test_multiple_sends_append() {
        let (mut ctx, sink) = setup();
        run(&mut ctx, "response.send('a'); response.send(1); response.send(undefined)");
        assert_eq!(sink.borrow().body(), b"a1");
    }

    // ========================================================================
    // Headers
    // ========================================================================

    #[test]
    fn test_append_and_set_with_empty_value_removes() {
        let (mut ctx, sink) = setup();
        run(
            &mut ctx,
            "response.append('x-tag', 'a').append('x-tag', 'b').set('x-gone', 'v').set('x-gone', '')",
        );
        assert_eq!(header(&sink, "x-tag"), vec!["a", "b"]);
        assert!(header(&sink, "x-gone").is_empty());

        run(&mut ctx, "response.set('x-tag')");
        assert!(header(&sink, "x-tag").is_empty());
    }

    #[test]
    fn test_invalid_header_throws() {
        let (mut ctx, _sink) = setup();
        assert!(ctx.eval(Source::from_bytes("response.set('bad name', 'v')")).is_err());
    }

    #[test]
    fn test_redirect_defaults_to_302() {
        let (mut ctx, sink) = setup();
        run(&mut ctx, "response.redirect('/elsewhere')");

        assert_eq!(sink.borrow().status(), StatusCode::FOUND);
        assert_eq!(header(&sink, "location"), vec!["/elsewhere"]);
        assert_eq!(sink.borrow().body(), b"/elsewhere");
    }

    #[test]
    fn test_redirect_with_status() {
        let (mut ctx, sink) = setup();
        run(&mut ctx, "response.redirect(301, '/moved')");
        assert_eq!(sink.borrow().status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(header(&sink, "location"), vec!["/moved"]);
    }

    #[test]
    fn test_location_sets_header_only() {
        let (mut ctx, sink) = setup();
        run(&mut ctx, "response.location('/there')");
        assert_eq!(header(&sink, "location"), vec!["/there"]);
        assert!(!sink.borrow().is_committed());
    }

    // ========================================================================
    // Cookies
    // ========================================================================

    #[test]
    fn test_cookie_with_all_options() {
        let (mut ctx, sink) = setup();
        run(
            &mut ctx,
            "response.cookie('cookie', 'cookieValue', { domain: 'domain', path: '/pth', \
             maxAge: 1, expires: new Date(0), httpOnly: true, secure: true })",
        );
        assert_eq!(
            header(&sink, "set-cookie"),
            vec![
                "cookie=cookieValue; Path=/pth; Domain=domain; \
                 Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=1; HttpOnly; Secure"
            ]
        );
    }

    #[test]
    fn test_cookie_without_options() {
        let (mut ctx, sink) = setup();
        run(&mut ctx, "response.cookie('a', '1').cookie('b', '2')");
        assert_eq!(header(&sink, "set-cookie"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_cookie_rejects_bad_input() {
        let (mut ctx, _sink) = setup();
        assert!(ctx.eval(Source::from_bytes("response.cookie('a', '1', 'nope')")).is_err());
        assert!(ctx.eval(Source::from_bytes("response.cookie('a', '1', { expires: 5 })")).is_err());
        assert!(ctx.eval(Source::from_bytes("response.cookie('a b', '1')")).is_err());
        assert!(ctx.eval(Source::from_bytes("response.cookie('a', 'x;y')")).is_err());
    }

    #[test]
    fn test_negative_max_age_expires_now() {
        let options = CookieOptions {
            max_age: Some(-5),
            ..CookieOptions::default()
        };
        assert_eq!(format_cookie("a", "b", &options), "a=b; Max-Age=0");
    }
}
