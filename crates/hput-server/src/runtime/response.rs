//! Host-side accumulator for the response a script builds.

use hyper::StatusCode;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};

/// Status, headers and body written by a script.
///
/// The sink is *committed* by the first body write or by `sendStatus`. After
/// that the status line and headers are frozen: later changes are logged and
/// ignored, matching what a streaming HTTP response could still honour.
#[derive(Debug, Clone, Default)]
pub struct ResponseSink {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    committed: bool,
}

impl ResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status to send, `200 OK` unless the script chose one.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Vec<u8>) {
        (self.status(), self.headers, self.body)
    }

    pub fn set_status(&mut self, code: u16) -> Result<(), String> {
        let status = StatusCode::from_u16(code).map_err(|_| format!("invalid status code {code}"))?;
        if self.frozen("status") {
            return Ok(());
        }
        self.status = Some(status);
        Ok(())
    }

    /// Adds a header value, keeping any existing values.
    pub fn append_header(&mut self, name: &str, value: &str) -> Result<(), String> {
        let (name, value) = header_pair(name, value)?;
        if !self.frozen(name.as_str()) {
            self.headers.append(name, value);
        }
        Ok(())
    }

    /// Replaces every value of a header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), String> {
        let (name, value) = header_pair(name, value)?;
        if !self.frozen(name.as_str()) {
            self.headers.insert(name, value);
        }
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) -> Result<(), String> {
        let name = header_name(name)?;
        if !self.frozen(name.as_str()) {
            self.headers.remove(name);
        }
        Ok(())
    }

    /// Appends to the body and commits the status line and headers.
    pub fn write(&mut self, bytes: &[u8]) {
        self.committed = true;
        self.body.extend_from_slice(bytes);
    }

    /// Commits without writing anything.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    fn frozen(&self, what: &str) -> bool {
        if self.committed {
            tracing::warn!("response already committed, ignoring change to {what}");
        }
        self.committed
    }
}

fn header_name(name: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| format!("invalid header name '{name}'"))
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), String> {
    let value =
        HeaderValue::from_str(value).map_err(|_| format!("invalid value for header '{name}'"))?;
    Ok((header_name(name)?, value))
}
