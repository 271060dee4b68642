//! HTTP Server for hput
//!
//! This module provides the HTTP/1.1 front end using hyper. Each connection
//! gets its own tokio task; each request is translated into a [`Service`]
//! call and the outcome back into a response.
//!
//! # Routing
//!
//! - `OPTIONS <path>`: CORS preflight allowing cross-origin `PUT`
//! - `PUT <path>`: store the body (or execute, when locked)
//! - any other verb: serve, execute or export what is stored at the path
//!
//! Callers that are not on the loopback interface get `403` unless the
//! server allows non-local traffic.
//!
//! # Example
//!
//! ```no_run
//! use hput_server::{HttpServer, ServerConfig, Service, Sandbox};
//! use hput_store::MemorySaver;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let service = Service::new(
//!         Arc::new(MemorySaver::new()),
//!         Sandbox::new(config.limits.clone()),
//!         config.base_url.clone(),
//!     );
//!     let server = HttpServer::new(service, config);
//!     server.run("127.0.0.1:8080".parse().unwrap()).await.unwrap();
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream;
use http_body_util::{BodyExt, Full, StreamBody, combinators::UnsyncBoxBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use hput_common::{HputError, Result};

use crate::config::ServerConfig;
use crate::export::ExportStream;
use crate::runtime::RequestView;
use crate::service::{RunOutcome, Service};

/// Response body: either a buffered payload or a streamed export.
pub type HttpBody = UnsyncBoxBody<Bytes, HputError>;

pub const FORBIDDEN_MESSAGE: &str = "This can only be called from local";
pub const UNEXPECTED_ERROR_MESSAGE: &str = "Error Unexpected error";

struct ServerState {
    service: Service,
    config: ServerConfig,
}

/// HTTP server for hput.
pub struct HttpServer {
    state: Arc<ServerState>,
}

impl HttpServer {
    pub fn new(service: Service, config: ServerConfig) -> Self {
        Self {
            state: Arc::new(ServerState { service, config }),
        }
    }

    /// Binds `addr` and serves until the listener fails.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HputError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serves connections accepted from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        tracing::info!(
            "HTTP server listening on {}",
            listener
                .local_addr()
                .map_err(|e| HputError::Transport(format!("Failed to get local address: {}", e)))?
        );

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| HputError::Transport(format!("Failed to accept connection: {}", e)))?;

            let io = TokioIo::new(stream);
            let state = self.state.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let state = state.clone();
                    async move { Self::handle_request(state, peer, req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::error!("Error serving connection: {}", err);
                }
            });
        }
    }

    async fn handle_request(
        state: Arc<ServerState>,
        peer: SocketAddr,
        req: Request<Incoming>,
    ) -> std::result::Result<Response<HttpBody>, Infallible> {
        tracing::debug!(method = %req.method(), uri = %req.uri(), %peer, "request");

        if !state.config.allow_nonlocal && !peer.ip().to_canonical().is_loopback() {
            tracing::warn!(
                %peer,
                "rejected caller because only local traffic is allowed"
            );
            return Ok(text_response(StatusCode::FORBIDDEN, FORBIDDEN_MESSAGE));
        }

        let method = req.method().clone();
        let response = match method {
            Method::OPTIONS => preflight(&req),
            Method::PUT if !state.config.locked => put(&state.service, req).await,
            _ => run(&state.service, peer, req).await,
        };
        Ok(response)
    }
}

fn full(body: impl Into<Bytes>) -> HttpBody {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<HttpBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
}

/// Echoes a single `Origin` header back as the allowed origin.
fn allow_origin(req: &Request<Incoming>, response: &mut Response<HttpBody>) {
    let mut origins = req.headers().get_all(header::ORIGIN).iter();
    if let (Some(origin), None) = (origins.next(), origins.next()) {
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    }
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
}

fn preflight(req: &Request<Incoming>) -> Response<HttpBody> {
    let mut response = text_response(StatusCode::OK, Bytes::new());
    allow_origin(req, &mut response);
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("PUT"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("accept, content-type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("1728000"),
    );
    response
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes> {
    req.into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| HputError::CannotReadPayload(e.to_string()))
}

async fn put(service: &Service, req: Request<Incoming>) -> Response<HttpBody> {
    let path = req.uri().path().to_string();
    let mut cors = text_response(StatusCode::ACCEPTED, Bytes::new());
    allow_origin(&req, &mut cors);

    let outcome = match read_body(req).await {
        Ok(body) => service.put(&path, body.to_vec()).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(outcome) => {
            let mut body = outcome.replay.unwrap_or_default();
            body.push_str(&format!("Saved input of type: {}", outcome.result.kind));
            if !outcome.result.message.is_empty() {
                body.push('\n');
                body.push_str(&outcome.result.message);
            }
            let (parts, _) = cors.into_parts();
            Response::from_parts(parts, full(body))
        }
        Err(e) if e.is_client_error() => {
            tracing::warn!(path = %path, error = %e, "error PUT request");
            text_response(StatusCode::BAD_REQUEST, format!("Unexpected input: {e}"))
        }
        Err(e) => {
            tracing::error!(path = %path, error = %e, "could not store input");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, UNEXPECTED_ERROR_MESSAGE)
        }
    }
}

fn request_view(req: &Request<Incoming>, peer: SocketAddr) -> RequestView {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default();

    let mut view = RequestView::new(req.method().as_str(), req.uri().path())
        .with_query(req.uri().query().unwrap_or_default())
        .with_remote_addr(peer.to_string())
        .with_host(host);
    view.protocol = format!("{:?}", req.version()).to_ascii_lowercase();
    for (name, value) in req.headers() {
        view = view.with_header(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    view
}

fn export_response(export: ExportStream) -> Response<HttpBody> {
    let chunks = stream::unfold(export, |mut export| async move {
        let chunk = export.next_chunk().await?;
        Some((chunk.map(|text| Frame::data(Bytes::from(text))), export))
    });
    let mut response = Response::new(StreamBody::new(chunks).boxed_unsync());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/javascript; charset=utf-8"),
    );
    response
}

async fn run(service: &Service, peer: SocketAddr, req: Request<Incoming>) -> Response<HttpBody> {
    let mut view = request_view(&req, peer);
    let outcome = match read_body(req).await {
        Ok(body) => {
            view.body = body.to_vec();
            service.run(view).await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(RunOutcome::Missing(message)) => text_response(StatusCode::BAD_REQUEST, message),
        Ok(RunOutcome::Content(bytes)) => text_response(StatusCode::OK, bytes),
        Ok(RunOutcome::Export(export)) => export_response(export),
        Ok(RunOutcome::Executed(sink)) => {
            let (status, headers, body) = sink.into_parts();
            let mut response = text_response(status, body);
            *response.headers_mut() = headers;
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "processing RUN error");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, UNEXPECTED_ERROR_MESSAGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_response() {
        let response = text_response(StatusCode::FORBIDDEN, FORBIDDEN_MESSAGE);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_full_body_collects() {
        let body = full("hello").collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_export_response_streams_all_chunks() {
        let (tx, rx) = hput_store::stream_channel();
        tx.send(hput_store::StreamEvent::Runnable(hput_common::Runnable::new(
            "/a",
            hput_common::Payload::Text("x".into()),
        )))
        .await
        .unwrap();
        tx.send(hput_store::StreamEvent::Done).await.unwrap();

        let response = export_response(ExportStream::from_events(rx, "http://localhost"));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.starts_with("//Dumping creation instructions v0.2\n"));
        assert!(body.contains("xhr.send(`x`);"));
    }
}
