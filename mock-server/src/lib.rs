//! A recording HTTP server for end-to-end tests.
//!
//! Every request, whatever its method or path, is captured as a
//! `RecordedRequest` and answered with the next queued `MockResponse`
//! (an empty `200 OK` when the queue is empty).

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// Canned response served for one request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: String::new(),
        }
    }
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::default()
            .header("Content-Type", "text/plain")
            .body(body)
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self::default()
            .header("Content-Type", "application/json")
            .body(value.to_string())
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

impl IntoResponse for MockResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Body::from(self.body)).into_response();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().append(name, value);
            }
        }
        response
    }
}

/// A request as the server received it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordedRequest {
    pub method: String,
    /// Path plus query string, e.g. `/test?id=1`.
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, q)| q)
    }

    /// First header named `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Default)]
struct Journal {
    queue: VecDeque<MockResponse>,
    requests: VecDeque<RecordedRequest>,
}

/// Shared state: queued responses and recorded requests.
#[derive(Clone, Default)]
pub struct Recorder {
    journal: Arc<Mutex<Journal>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, response: MockResponse) {
        self.lock().queue.push_back(response);
    }

    /// Oldest recorded request not yet taken.
    pub fn take_request(&self) -> Option<RecordedRequest> {
        self.lock().requests.pop_front()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn record(&self, request: RecordedRequest) -> MockResponse {
        let mut journal = self.lock();
        journal.requests.push_back(request);
        journal.queue.pop_front().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Journal> {
        // A panicking test thread must not hide the journal from the others.
        self.journal.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn app(recorder: Recorder) -> Router {
    Router::new().fallback(record).with_state(recorder)
}

pub async fn run(listener: TcpListener, recorder: Recorder) -> Result<(), std::io::Error> {
    axum::serve(listener, app(recorder)).await
}

async fn record(
    State(recorder): State<Recorder>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> MockResponse {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    tracing::debug!(%method, %target, "recorded request");
    recorder.record(RecordedRequest {
        method: method.to_string(),
        target,
        headers,
        body: body.to_vec(),
    })
}

/// A server on a random local port, running on a background thread.
pub struct MockServer {
    addr: SocketAddr,
    recorder: Recorder,
}

impl MockServer {
    pub fn start() -> Result<Self, std::io::Error> {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = std_listener.local_addr()?;
        std_listener.set_nonblocking(true)?;

        let recorder = Recorder::new();
        let served = recorder.clone();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!(error = %e, "failed to start mock server runtime");
                    return;
                }
            };
            let result = rt.block_on(async move {
                let listener = TcpListener::from_std(std_listener)?;
                run(listener, served).await
            });
            if let Err(e) = result {
                tracing::error!(error = %e, "mock server stopped");
            }
        });

        Ok(Self { addr, recorder })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }

    pub fn enqueue(&self, response: MockResponse) {
        self.recorder.enqueue(response);
    }

    pub fn take_request(&self) -> Option<RecordedRequest> {
        self.recorder.take_request()
    }

    pub fn request_count(&self) -> usize {
        self.recorder.request_count()
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }
}
