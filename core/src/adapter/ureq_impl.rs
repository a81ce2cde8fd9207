use std::io::ErrorKind;
use std::time::Duration;

use ureq::http::Response;
use ureq::typestate::{WithBody, WithoutBody};
use ureq::{Agent, RequestBuilder};

use super::HttpExchangeAdapter;
use crate::error::{TransportError, TransportErrorKind};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Blocking adapter backed by a `ureq::Agent`.
///
/// The agent is configured so 4xx/5xx responses come back as data and the
/// proxy decides what a status means.
///
/// # Example
///
/// ```ignore
/// let factory = HttpServiceProxyFactory::builder()
///     .exchange_adapter(UreqAdapter::new())
///     .base_url("http://localhost:8080")
///     .build()?;
/// ```
#[derive(Clone)]
pub struct UreqAdapter {
    agent: Agent,
}

impl UreqAdapter {
    pub fn new() -> Self {
        Self::with_agent(
            Agent::config_builder()
                .http_status_as_error(false)
                .build()
                .new_agent(),
        )
    }

    /// Adapter whose requests fail with a timeout after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_agent(
            Agent::config_builder()
                .http_status_as_error(false)
                .timeout_global(Some(timeout))
                .build()
                .new_agent(),
        )
    }

    /// Use a preconfigured agent. It should have `http_status_as_error`
    /// disabled.
    pub fn with_agent(agent: Agent) -> Self {
        Self { agent }
    }
}

impl Default for UreqAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpExchangeAdapter for UreqAdapter {
    fn exchange(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let HttpRequest {
            method,
            uri,
            headers,
            body,
        } = request;

        let uri = uri.as_str();
        let body = body.as_deref();
        let result = match method {
            HttpMethod::Get => send_without_body(self.agent.get(uri), &headers, body),
            HttpMethod::Head => send_without_body(self.agent.head(uri), &headers, body),
            HttpMethod::Delete => send_without_body(self.agent.delete(uri), &headers, body),
            HttpMethod::Options => send_without_body(self.agent.options(uri), &headers, body),
            HttpMethod::Post => send_with_body(self.agent.post(uri), &headers, body),
            HttpMethod::Put => send_with_body(self.agent.put(uri), &headers, body),
            HttpMethod::Patch => send_with_body(self.agent.patch(uri), &headers, body),
        };

        let mut response = result.map_err(transport_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(transport_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Verbs that carry no body by default still send one when the request has it.
fn send_without_body(
    builder: RequestBuilder<WithoutBody>,
    headers: &[(String, String)],
    body: Option<&[u8]>,
) -> Result<Response<ureq::Body>, ureq::Error> {
    let builder = with_headers(builder, headers);
    match body {
        Some(bytes) => builder.force_send_body().send(bytes),
        None => builder.call(),
    }
}

fn send_with_body(
    builder: RequestBuilder<WithBody>,
    headers: &[(String, String)],
    body: Option<&[u8]>,
) -> Result<Response<ureq::Body>, ureq::Error> {
    let builder = with_headers(builder, headers);
    match body {
        Some(bytes) => builder.send(bytes),
        None => builder.send_empty(),
    }
}

fn with_headers<B>(
    mut builder: RequestBuilder<B>,
    headers: &[(String, String)],
) -> RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn transport_error(error: ureq::Error) -> TransportError {
    let kind = match &error {
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => TransportErrorKind::Connect,
        ureq::Error::Io(io) if io.kind() == ErrorKind::ConnectionRefused => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(io) if io.kind() == ErrorKind::TimedOut => TransportErrorKind::Timeout,
        ureq::Error::Io(_) => TransportErrorKind::Io,
        _ => TransportErrorKind::Other,
    };
    TransportError::with_source(kind, error)
}
