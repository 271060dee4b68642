//! Conversions between host data and JavaScript values.
//!
//! # Type Mapping
//!
//! | Host value | JavaScript value |
//! |------------|------------------|
//! | `serde_json::Value` | the equivalent primitive, Array or Object |
//! | one header / query value | String |
//! | repeated header / query values | Array of String |
//!
//! Going the other way, values are serialised with the context's own
//! `JSON.stringify` so `toJSON` methods and `Date`s behave the way scripts
//! expect.

use boa_engine::{
    Context, JsError, JsNativeError, JsResult, JsString, js_string,
    object::{JsObject, builtins::JsArray},
    value::JsValue,
};
use serde_json::Value as JsonValue;

/// Convert serde_json::Value to Boa JsValue.
///
/// # Errors
///
/// Returns a `TypeError` if a number is out of range or a property cannot be
/// created.
pub fn json_to_js_value(json: JsonValue, ctx: &mut Context) -> JsResult<JsValue> {
    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(JsValue::new)
            .ok_or_else(|| JsNativeError::typ().with_message("Number out of range").into()),
        JsonValue::String(s) => Ok(JsValue::new(JsString::from(s.as_str()))),
        JsonValue::Array(arr) => {
            let js_array = JsArray::new(ctx);
            for value in arr {
                let js_value = json_to_js_value(value, ctx)?;
                js_array.push(js_value, ctx)?;
            }
            Ok(js_array.into())
        }
        JsonValue::Object(obj) => {
            let js_obj = JsObject::with_object_proto(ctx.intrinsics());
            for (key, value) in obj {
                let js_value = json_to_js_value(value, ctx)?;
                js_obj.create_data_property_or_throw(JsString::from(key.as_str()), js_value, ctx)?;
            }
            Ok(js_obj.into())
        }
    }
}

/// Calls `JSON.<method>` on the context's global `JSON` object.
fn call_json(method: JsString, arg: JsValue, ctx: &mut Context) -> JsResult<JsValue> {
    let json = ctx.global_object().get(js_string!("JSON"), ctx)?;
    let function = json
        .as_object()
        .map(|o| o.clone())
        .ok_or_else(|| JsNativeError::typ().with_message("JSON is not an object"))?
        .get(method, ctx)?;
    let function = function
        .as_callable()
        .map(|f| f.clone())
        .ok_or_else(|| JsNativeError::typ().with_message("JSON method is not callable"))?;
    function.call(&json, &[arg], ctx)
}

/// `JSON.stringify(value)`, or `None` when it yields `undefined`.
pub fn stringify(value: &JsValue, ctx: &mut Context) -> JsResult<Option<String>> {
    let out = call_json(js_string!("stringify"), value.clone(), ctx)?;
    if out.is_undefined() {
        return Ok(None);
    }
    Ok(Some(out.to_string(ctx)?.to_std_string_escaped()))
}

/// `JSON.parse(text)`.
pub fn parse_json(text: &str, ctx: &mut Context) -> JsResult<JsValue> {
    call_json(js_string!("parse"), JsValue::new(JsString::from(text)), ctx)
}

/// Human-readable rendering used by `console` and `send`: strings verbatim,
/// objects as JSON, everything else through `ToString`.
pub fn display_value(value: &JsValue, ctx: &mut Context) -> JsResult<String> {
    if value.is_object() && !value.is_callable() {
        if let Ok(Some(json)) = stringify(value, ctx) {
            return Ok(json);
        }
    }
    if value.is_symbol() {
        return Ok(value.display().to_string());
    }
    Ok(value.to_string(ctx)?.to_std_string_escaped())
}

/// Message for a thrown value: `Kind: message` for errors, the value otherwise.
pub fn describe_error(err: &JsError, ctx: &mut Context) -> String {
    match err.try_native(ctx) {
        Ok(native) => without_position(&native.to_string()).to_string(),
        Err(_) => err.to_string(),
    }
}

/// Drops the ` (<function> at <file>:<line>:<column>)` suffix the engine
/// appends to native errors that carry a source position.
fn without_position(text: &str) -> &str {
    let Some((head, tail)) = text.rsplit_once(" (") else {
        return text;
    };
    let Some(location) = tail.strip_suffix(')') else {
        return text;
    };
    let is_position = location.rsplit_once(" at ").is_some_and(|(_, at)| {
        let mut parts = at.rsplit(':');
        let column = parts.next().unwrap_or_default();
        let line = parts.next().unwrap_or_default();
        [column, line]
            .iter()
            .all(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    });
    if is_position { head } else { text }
}

/// One value as a string, several as an array of strings.
pub fn values_to_js(values: &[String], ctx: &mut Context) -> JsValue {
    match values {
        [single] => JsValue::new(JsString::from(single.as_str())),
        _ => JsArray::from_iter(
            values
                .iter()
                .map(|v| JsValue::new(JsString::from(v.as_str()))),
            ctx,
        )
        .into(),
    }
}

/// Plain object whose properties follow the one-value / many-values rule.
pub fn multi_value_object(
    entries: &[(String, Vec<String>)],
    ctx: &mut Context,
) -> JsResult<JsObject> {
    let object = JsObject::with_object_proto(ctx.intrinsics());
    for (key, values) in entries {
        let value = values_to_js(values, ctx);
        object.create_data_property_or_throw(JsString::from(key.as_str()), value, ctx)?;
    }
    Ok(object)
}

/// Plain object with string properties.
pub fn string_object(entries: &[(String, String)], ctx: &mut Context) -> JsResult<JsObject> {
    let object = JsObject::with_object_proto(ctx.intrinsics());
    for (key, value) in entries {
        object.create_data_property_or_throw(
            JsString::from(key.as_str()),
            JsString::from(value.as_str()),
            ctx,
        )?;
    }
    Ok(object)
}
