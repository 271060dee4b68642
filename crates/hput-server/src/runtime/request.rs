//! Host-side view of the HTTP request that triggered an execution.

/// Read-only snapshot of an incoming request, handed to the sandbox.
///
/// Header names are stored lowercased in arrival order; repeated headers keep
/// one entry per occurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestView {
    pub method: String,
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: String,
    /// Lowercased protocol, e.g. `http/1.1`
    pub protocol: String,
    /// Peer address as `ip:port`
    pub remote_addr: String,
    /// Value of the `Host` header, port included
    pub host: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RequestView {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            protocol: "http/1.1".to_string(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = remote_addr.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// IP part of [`RequestView::remote_addr`].
    pub fn ip(&self) -> String {
        self.remote_addr
            .parse::<std::net::SocketAddr>()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| self.remote_addr.clone())
    }

    /// First non-empty path segment, `""` for `/`.
    pub fn base_segment(&self) -> &str {
        self.path.split('/').find(|s| !s.is_empty()).unwrap_or("")
    }

    /// Host without its port.
    pub fn hostname(&self) -> &str {
        if self.host.starts_with('[') {
            return match self.host.find(']') {
                Some(end) => &self.host[1..end],
                None => &self.host,
            };
        }
        match self.host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => &self.host,
        }
    }

    /// Headers grouped by name, in order of first appearance.
    pub fn grouped_headers(&self) -> Vec<(String, Vec<String>)> {
        group(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Decoded query parameters grouped by name, in order of first appearance.
    pub fn grouped_query(&self) -> Vec<(String, Vec<String>)> {
        group(
            url::form_urlencoded::parse(self.query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    /// Cookies from every `Cookie` header; the first occurrence of a name wins.
    pub fn cookies(&self) -> Vec<(String, String)> {
        let mut cookies: Vec<(String, String)> = Vec::new();
        for (_, header) in self.headers.iter().filter(|(k, _)| k == "cookie") {
            for pair in header.split(';') {
                let Some((name, value)) = pair.split_once('=') else {
                    continue;
                };
                let name = name.trim();
                if name.is_empty() || cookies.iter().any(|(n, _)| n == name) {
                    continue;
                }
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                cookies.push((name.to_string(), value.to_string()));
            }
        }
        cookies
    }
}

fn group(pairs: impl Iterator<Item = (String, String)>) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in pairs {
        match grouped.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => grouped.push((key, vec![value])),
        }
    }
    grouped
}
