//! Error types for proxy creation and invocation.
//!
//! # Design
//! Failures are split by when they can happen. `ConfigError` is raised while
//! a service declaration is turned into a proxy; if one fires, no proxy
//! exists. `ProxyError` is raised by an invocation. Binding problems are
//! reported before any network I/O, transport failures are passed through from
//! the adapter untouched, and non-success statuses keep the raw status code
//! and body for debugging.

use thiserror::Error;

use crate::response::ReturnKind;

/// Problems found while validating a service declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("method `{method}` declares no HTTP method and the service has no default")]
    MissingHttpMethod { method: String },

    #[error("method `{method}`: placeholder `{{{placeholder}}}` has no path variable parameter")]
    UnresolvedPlaceholder { method: String, placeholder: String },

    #[error("method `{method}`: path variable `{name}` does not appear in `{template}`")]
    UnknownPathVariable {
        method: String,
        name: String,
        template: String,
    },

    #[error("method `{method}`: malformed URI template `{template}`")]
    MalformedTemplate { method: String, template: String },

    #[error("method `{method}` declares more than one body parameter")]
    MultipleBodies { method: String },

    #[error("method `{method}` declares both a body and multipart parts")]
    BodyWithParts { method: String },

    #[error("method `{method}` declares more than one URI parameter")]
    MultipleUriOverrides { method: String },

    #[error("method `{method}`: invalid content type `{value}`")]
    InvalidContentType { method: String, value: String },

    #[error("method `{method}`: invalid accept type `{value}`")]
    InvalidAcceptType { method: String, value: String },

    #[error("service `{service}` declares method `{method}` twice")]
    DuplicateMethod { service: String, method: String },

    #[error("no exchange adapter configured")]
    MissingExchangeAdapter,

    #[error("invalid base URL `{0}`")]
    InvalidBaseUrl(String),

    #[error("group `{group}` registers service `{service}` twice")]
    DuplicateService { group: String, service: String },

    #[error("registry configuration names unknown service `{0}`")]
    UnknownService(String),

    #[error("registry configuration: {0}")]
    Registry(String),
}

/// A registry lookup that matched no client, or more than one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no client registered for service `{0}`")]
    NoClient(String),

    #[error("service `{service}` is registered in groups {groups:?}; look it up by base URL")]
    AmbiguousClient { service: String, groups: Vec<String> },

    #[error("no group with base URL `{0}`")]
    UnknownBaseUrl(String),
}

/// The adapter could not complete the exchange.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Io,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportErrorKind::Connect => write!(f, "connection failed"),
            TransportErrorKind::Timeout => write!(f, "timed out"),
            TransportErrorKind::Io => write!(f, "i/o error"),
            TransportErrorKind::Other => write!(f, "transport error"),
        }
    }
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: TransportErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }
}

/// Errors returned by `HttpServiceProxy::invoke`.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("service has no method `{0}`")]
    UnknownMethod(String),

    /// The Rust return type requested at the call site does not match the
    /// kind the method was declared with.
    #[error("method `{method}` was declared returning {declared:?}, invoked as {requested:?}")]
    ReturnTypeMismatch {
        method: String,
        declared: ReturnKind,
        requested: ReturnKind,
    },

    /// An argument could not be bound to the request.
    #[error("method `{method}`, parameter `{parameter}`: {reason}")]
    Binding {
        method: String,
        parameter: String,
        reason: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server returned 404.
    #[error("resource not found")]
    NotFound,

    /// The server returned a non-2xx status other than 404.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// A body was required but the response had none.
    #[error("HTTP {status} response has no body")]
    MissingBody { status: u16 },

    #[error("no converter registered for content type `{0}`")]
    UnsupportedMediaType(String),

    /// The response body could not be decoded into the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be encoded.
    #[error("serialization failed: {0}")]
    SerializationError(String),
}

impl ProxyError {
    pub(crate) fn binding(method: &str, parameter: &str, reason: impl Into<String>) -> Self {
        ProxyError::Binding {
            method: method.to_string(),
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error was produced by the server's status code.
    pub fn is_status(&self) -> bool {
        matches!(self, ProxyError::NotFound | ProxyError::HttpError { .. })
    }
}
