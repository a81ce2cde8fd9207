//! Adapting raw responses into declared return shapes.
//!
//! # Design
//! The return shape of a method is one of four kinds, fixed when the method
//! is declared from its Rust return type (`ReturnValue::KIND`):
//!
//! - `Void` (`()`): the body is discarded.
//! - `Body` (`String`, `Vec<u8>`, `serde_json::Value`, `Body<T>`): the body is
//!   required and decoded.
//! - `Entity` (`ResponseEntity<T>`): status and headers are data, never an
//!   error; the body is decoded when one is expected.
//! - `Optional` (`Option<T>`): like `Body`, but an empty body is `None`.
//!
//! Status handling depends only on the kind (see `check_status`); decoding
//! depends only on the target type (`FromBody`).

use std::ops::Deref;

use serde::de::DeserializeOwned;

use crate::codec::Converters;
use crate::error::ProxyError;
use crate::http::{find_header, HttpResponse, CONTENT_TYPE};

/// Return shape of a proxy method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    Void,
    Body,
    Entity,
    Optional,
}

/// A type that can be decoded from a response body.
pub trait FromBody: Sized {
    fn from_body(response: &HttpResponse, converters: &Converters) -> Result<Self, ProxyError>;
}

/// A type a proxy method can return.
pub trait ReturnValue: Sized {
    const KIND: ReturnKind;

    /// Build the value from a response whose status already passed
    /// `check_status` for `Self::KIND`.
    fn from_response(response: HttpResponse, converters: &Converters) -> Result<Self, ProxyError>;
}

/// Wrapper selecting converter-based decoding for any deserializable type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body<T>(pub T);

impl<T> Body<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Body<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Status, headers and optional body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEntity<T> {
    status: u16,
    headers: Vec<(String, String)>,
    body: Option<T>,
}

impl<T> ResponseEntity<T> {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn body(&self) -> Option<&T> {
        self.body.as_ref()
    }

    pub fn into_body(self) -> Option<T> {
        self.body
    }
}

/// Surface non-success statuses as errors, except for `Entity`.
pub fn check_status(kind: ReturnKind, response: &HttpResponse) -> Result<(), ProxyError> {
    if kind == ReturnKind::Entity || response.is_success() {
        return Ok(());
    }
    if response.status == 404 {
        return Err(ProxyError::NotFound);
    }
    Err(ProxyError::HttpError {
        status: response.status,
        body: response.body_text(),
    })
}

/// Apply the status policy of `kind`, then build `R`.
pub fn adapt<R: ReturnValue>(
    kind: ReturnKind,
    response: HttpResponse,
    converters: &Converters,
) -> Result<R, ProxyError> {
    check_status(kind, &response)?;
    R::from_response(response, converters)
}

fn body_expected(status: u16) -> bool {
    !(100..200).contains(&status) && status != 204 && status != 304
}

impl FromBody for String {
    fn from_body(response: &HttpResponse, _converters: &Converters) -> Result<Self, ProxyError> {
        String::from_utf8(response.body.clone())
            .map_err(|e| ProxyError::DeserializationError(e.to_string()))
    }
}

impl FromBody for Vec<u8> {
    fn from_body(response: &HttpResponse, _converters: &Converters) -> Result<Self, ProxyError> {
        Ok(response.body.clone())
    }
}

impl FromBody for serde_json::Value {
    fn from_body(response: &HttpResponse, converters: &Converters) -> Result<Self, ProxyError> {
        converters.read(response.header(CONTENT_TYPE), &response.body)
    }
}

impl<T: DeserializeOwned> FromBody for Body<T> {
    fn from_body(response: &HttpResponse, converters: &Converters) -> Result<Self, ProxyError> {
        converters
            .read(response.header(CONTENT_TYPE), &response.body)
            .map(Body)
    }
}

/// Lets `ResponseEntity<()>` stand for a bodiless entity.
impl FromBody for () {
    fn from_body(_response: &HttpResponse, _converters: &Converters) -> Result<Self, ProxyError> {
        Ok(())
    }
}

impl ReturnValue for () {
    const KIND: ReturnKind = ReturnKind::Void;

    fn from_response(
        _response: HttpResponse,
        _converters: &Converters,
    ) -> Result<Self, ProxyError> {
        Ok(())
    }
}

macro_rules! body_return {
    ($($ty:ty),*) => {
        $(impl ReturnValue for $ty {
            const KIND: ReturnKind = ReturnKind::Body;

            fn from_response(
                response: HttpResponse,
                converters: &Converters,
            ) -> Result<Self, ProxyError> {
                required_body(response, converters)
            }
        })*
    };
}

body_return!(String, Vec<u8>, serde_json::Value);

impl<T: DeserializeOwned> ReturnValue for Body<T> {
    const KIND: ReturnKind = ReturnKind::Body;

    fn from_response(response: HttpResponse, converters: &Converters) -> Result<Self, ProxyError> {
        required_body(response, converters)
    }
}

fn required_body<T: FromBody>(
    response: HttpResponse,
    converters: &Converters,
) -> Result<T, ProxyError> {
    if response.body.is_empty() {
        return Err(ProxyError::MissingBody {
            status: response.status,
        });
    }
    T::from_body(&response, converters)
}

impl<T: FromBody> ReturnValue for Option<T> {
    const KIND: ReturnKind = ReturnKind::Optional;

    fn from_response(response: HttpResponse, converters: &Converters) -> Result<Self, ProxyError> {
        if response.body.is_empty() {
            return Ok(None);
        }
        T::from_body(&response, converters).map(Some)
    }
}

impl<T: FromBody> ReturnValue for ResponseEntity<T> {
    const KIND: ReturnKind = ReturnKind::Entity;

    fn from_response(response: HttpResponse, converters: &Converters) -> Result<Self, ProxyError> {
        let body = if response.body.is_empty() || !body_expected(response.status) {
            None
        } else {
            match T::from_body(&response, converters) {
                Ok(body) => Some(body),
                Err(e) if response.is_success() => return Err(e),
                // Error payloads rarely match the success type.
                Err(_) => None,
            }
        };
        Ok(ResponseEntity {
            status: response.status,
            headers: response.headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        title: String,
    }

    fn response(status: u16, content_type: &str, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    fn converters() -> Converters {
        Converters::default()
    }

    #[test]
    fn body_string_reads_raw_text() {
        let text: String = adapt(
            ReturnKind::Body,
            response(200, "text/plain", "Hello Spring!"),
            &converters(),
        )
        .unwrap();
        assert_eq!(text, "Hello Spring!");
    }

    #[test]
    fn body_string_reads_json_verbatim() {
        let text: String = adapt(
            ReturnKind::Body,
            response(200, "application/json", r#"{"title":"x"}"#),
            &converters(),
        )
        .unwrap();
        assert_eq!(text, r#"{"title":"x"}"#);
    }

    #[test]
    fn body_wrapper_uses_converters() {
        let item: Body<Item> = adapt(
            ReturnKind::Body,
            response(200, "application/json", r#"{"title":"milk"}"#),
            &converters(),
        )
        .unwrap();
        assert_eq!(item.title, "milk");
    }

    #[test]
    fn body_on_empty_response_fails() {
        let err = adapt::<String>(ReturnKind::Body, response(200, "text/plain", ""), &converters())
            .unwrap_err();
        assert!(matches!(err, ProxyError::MissingBody { status: 200 }));
    }

    #[test]
    fn optional_on_empty_response_is_none() {
        let value: Option<String> =
            adapt(ReturnKind::Optional, response(200, "text/plain", ""), &converters()).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn optional_with_body_is_some() {
        let value: Option<Body<Item>> = adapt(
            ReturnKind::Optional,
            response(200, "application/json", r#"{"title":"t"}"#),
            &converters(),
        )
        .unwrap();
        assert_eq!(value.unwrap().into_inner().title, "t");
    }

    #[test]
    fn not_found_is_an_error_for_body() {
        let reply = response(404, "text/plain", "nope");
        let err = adapt::<String>(ReturnKind::Body, reply, &converters()).unwrap_err();
        assert!(matches!(err, ProxyError::NotFound));
    }

    #[test]
    fn server_error_is_an_error_for_void() {
        let err = adapt::<()>(ReturnKind::Void, response(500, "text/plain", "boom"), &converters())
            .unwrap_err();
        match err {
            ProxyError::HttpError { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn entity_captures_error_status() {
        let entity: ResponseEntity<String> = adapt(
            ReturnKind::Entity,
            response(503, "text/plain", "busy"),
            &converters(),
        )
        .unwrap();
        assert_eq!(entity.status(), 503);
        assert_eq!(entity.body().map(String::as_str), Some("busy"));
        assert_eq!(entity.header("content-type"), Some("text/plain"));
    }

    #[test]
    fn entity_skips_body_on_no_content() {
        let entity: ResponseEntity<String> =
            adapt(ReturnKind::Entity, response(204, "text/plain", "x"), &converters()).unwrap();
        assert!(entity.into_body().is_none());
    }

    #[test]
    fn entity_drops_undecodable_error_payload() {
        let entity: ResponseEntity<Body<Item>> = adapt(
            ReturnKind::Entity,
            response(404, "text/html", "<h1>not found</h1>"),
            &converters(),
        )
        .unwrap();
        assert_eq!(entity.status(), 404);
        assert!(entity.body().is_none());
    }

    #[test]
    fn entity_fails_on_undecodable_success_payload() {
        let err = adapt::<ResponseEntity<Body<Item>>>(
            ReturnKind::Entity,
            response(200, "application/json", "not json"),
            &converters(),
        )
        .unwrap_err();
        assert!(matches!(err, ProxyError::DeserializationError(_)));
    }

    #[test]
    fn kinds_follow_return_types() {
        assert_eq!(<() as ReturnValue>::KIND, ReturnKind::Void);
        assert_eq!(<String as ReturnValue>::KIND, ReturnKind::Body);
        assert_eq!(<Option<String> as ReturnValue>::KIND, ReturnKind::Optional);
        assert_eq!(<ResponseEntity<()> as ReturnValue>::KIND, ReturnKind::Entity);
    }
}
