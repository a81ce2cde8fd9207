//! The transport boundary.
//!
//! The proxy core hands a fully built `HttpRequest` to an
//! `HttpExchangeAdapter` and gets an `HttpResponse` back. Adapters report
//! non-success statuses as data; only failures to complete the exchange
//! (connection refused, timeout, broken stream) are errors. The core never
//! retries.

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};

#[cfg(feature = "ureq")]
mod ureq_impl;

#[cfg(feature = "ureq")]
pub use ureq_impl::UreqAdapter;

/// Performs one HTTP exchange.
pub trait HttpExchangeAdapter: Send + Sync {
    fn exchange(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<F> HttpExchangeAdapter for F
where
    F: Fn(HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync,
{
    fn exchange(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self(request)
    }
}
