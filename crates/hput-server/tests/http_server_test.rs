//! HTTP Server Integration Tests
//!
//! Each test starts an in-process server on an ephemeral loopback port backed
//! by an in-memory store. Tests cover:
//! - Storing and running scripts, text and binaries
//! - Overwrite notices and prefix exports
//! - Asynchronous scripts (timers, fetch)
//! - CORS preflight, reserved paths and locked mode

use std::sync::Arc;
use std::time::Duration;

use hput_server::{HttpServer, ResourceLimits, Sandbox, ServerConfig, Service};
use hput_store::MemorySaver;
use reqwest::{Client, Method, StatusCode};
use tokio::net::TcpListener;

struct TestServer {
    url: String,
    client: Client,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = config.with_base_url(format!("http://{addr}"));

        let service = Service::new(
            Arc::new(MemorySaver::new()),
            Sandbox::new(config.limits.clone()),
            config.base_url.clone(),
        );
        tokio::spawn(HttpServer::new(service, config).serve(listener));

        Self {
            url: format!("http://{addr}"),
            client: Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap(),
        }
    }

    async fn default() -> Self {
        Self::start(
            ServerConfig::default()
                .with_limits(ResourceLimits::default().with_execution_timeout(Duration::from_secs(5))),
        )
        .await
    }

    async fn put(&self, path: &str, body: impl Into<reqwest::Body>) -> (StatusCode, String) {
        let res = self
            .client
            .put(format!("{}{}", self.url, path))
            .body(body)
            .send()
            .await
            .unwrap();
        (res.status(), res.text().await.unwrap())
    }

    async fn call(&self, method: Method, path: &str) -> reqwest::Response {
        self.client
            .request(method, format!("{}{}", self.url, path))
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> (StatusCode, String) {
        let res = self.call(Method::GET, path).await;
        (res.status(), res.text().await.unwrap())
    }
}

// ============================================================================
// Store and Run
// ============================================================================

#[tokio::test]
async fn test_put_then_run_script() {
    let server = TestServer::default().await;

    let (status, body) = server.put("/greet", "'hi ' + 1").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, "Saved input of type: Javascript");

    let (status, body) = server.get("/greet").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hi 1");

    // Any non-PUT verb runs the script.
    let res = server.call(Method::POST, "/greet").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "hi 1");
}

#[tokio::test]
async fn test_script_reads_request() {
    let server = TestServer::default().await;
    server
        .put("/hello", "'hello ' + request.query.name + ' via ' + request.method")
        .await;

    let (status, body) = server.get("/hello?name=ann").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello ann via GET");
}

#[tokio::test]
async fn test_script_sets_status_and_headers() {
    let server = TestServer::default().await;
    server
        .put("/teapot", "response.status(418).set('X-Kind', 'tea').send('short and stout')")
        .await;

    let res = server.call(Method::GET, "/teapot").await;
    assert_eq!(res.status().as_u16(), 418);
    assert_eq!(res.headers()["x-kind"], "tea");
    assert_eq!(res.text().await.unwrap(), "short and stout");
}

#[tokio::test]
async fn test_text_is_served_verbatim() {
    let server = TestServer::default().await;

    let (status, body) = server.put("/notes", "this is { not javascript").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.starts_with("Saved input of type: Text\n"));
    assert!(body.contains("I think this is not javascript"));

    let (status, body) = server.get("/notes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "this is { not javascript");
}

#[tokio::test]
async fn test_binary_is_served_verbatim() {
    let server = TestServer::default().await;
    let bytes = vec![0xff, 0xfe, 0x00, 0x01, 0x80];

    let (status, body) = server.put("/blob", bytes.clone()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.starts_with("Saved input of type: Binary"));

    let res = server.call(Method::GET, "/blob").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.bytes().await.unwrap().to_vec(), bytes);
}

#[tokio::test]
async fn test_missing_path_is_bad_request() {
    let server = TestServer::default().await;

    let (status, body) = server.get("/nowhere").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        "There is nothing at path: '/nowhere', you can use a PUT verb to add something\n"
    );
}

#[tokio::test]
async fn test_failing_script_is_server_error() {
    let server = TestServer::default().await;
    server.put("/boom", "throw new Error('boom')").await;

    let (status, body) = server.get("/boom").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Error Unexpected error");
}

// ============================================================================
// Overwrite and Export
// ============================================================================

#[tokio::test]
async fn test_overwrite_returns_replay() {
    let server = TestServer::default().await;
    server.put("/greet", "'hi ' + 1").await;

    let (status, body) = server.put("/greet", "bye").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.starts_with("overwriting something, use this Javascript to add it back.\n\n"));
    assert!(body.contains(&format!("xhr.open(\"PUT\", \"{}/greet\");", server.url)));
    assert!(body.contains("xhr.send(`'hi ' + 1`);"));
    assert!(body.ends_with("Saved input of type: Javascript"));
}

#[tokio::test]
async fn test_dump_exports_prefix() {
    let server = TestServer::default().await;
    server.put("/greet", "'hi ' + 1").await;
    server.put("/greet", "bye").await;
    server.put("/other", "'elsewhere'").await;

    let res = server.call(Method::GET, "/greet/dump").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.text().await.unwrap();
    assert!(body.starts_with("//Dumping creation instructions v0.2\n"));
    assert!(body.contains(&format!("xhr.open(\"PUT\", \"{}/greet\");", server.url)));
    assert!(body.contains("xhr.send(`bye`);"));
    assert!(!body.contains("elsewhere"));
}

#[tokio::test]
async fn test_put_to_dump_is_rejected() {
    let server = TestServer::default().await;

    let (status, body) = server.put("/greet/dump", "'nope'").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("Unexpected input: "));
}

// ============================================================================
// Asynchronous Scripts
// ============================================================================

#[tokio::test]
async fn test_timer_writes_response() {
    let server = TestServer::default().await;
    server
        .put("/later", "setTimeout(() => response.send('later'), 10); undefined")
        .await;

    let (status, body) = server.get("/later").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "later");
}

#[tokio::test]
async fn test_resolved_promise_is_written() {
    let server = TestServer::default().await;
    server
        .put("/promise", "new Promise(resolve => setTimeout(() => resolve('done'), 5))")
        .await;

    let (status, body) = server.get("/promise").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "done");
}

#[tokio::test]
async fn test_fetch_to_closed_port_rejects() {
    let server = TestServer::default().await;
    server
        .put(
            "/fetch",
            "fetch('http://127.0.0.1:1/').then(() => 'reached', e => 'failed: ' + e.message)",
        )
        .await;

    let (status, body) = server.get("/fetch").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.starts_with("failed: fetch:"), "unexpected body: {body}");
}

// ============================================================================
// CORS and Access Modes
// ============================================================================

#[tokio::test]
async fn test_preflight_allows_put() {
    let server = TestServer::default().await;

    let res = server
        .client
        .request(Method::OPTIONS, format!("{}/anything", server.url))
        .header("Origin", "http://example.test")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let headers = res.headers();
    assert_eq!(headers["access-control-allow-origin"], "http://example.test");
    assert_eq!(headers["access-control-allow-methods"], "PUT");
    assert_eq!(headers["access-control-allow-headers"], "accept, content-type");
    assert_eq!(headers["access-control-max-age"], "1728000");
    assert_eq!(headers["access-control-allow-credentials"], "true");
}

#[tokio::test]
async fn test_put_echoes_origin() {
    let server = TestServer::default().await;

    let res = server
        .client
        .put(format!("{}/cors", server.url))
        .header("Origin", "http://example.test")
        .body("'x'")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert_eq!(res.headers()["access-control-allow-origin"], "http://example.test");
}

#[tokio::test]
async fn test_locked_server_runs_instead_of_storing() {
    let server = TestServer::start(ServerConfig::default().with_locked(true)).await;

    let (status, body) = server.put("/greet", "'hi ' + 1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("There is nothing at path: '/greet'"));
}
