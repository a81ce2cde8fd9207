//! Body converters keyed by media type.
//!
//! # Design
//! Converters translate between wire bytes and `serde_json::Value`; the final
//! step into or out of a concrete Rust type is plain serde. That keeps the
//! converter trait object-safe while still letting callers decode into any
//! `DeserializeOwned` type. `Converters` tries its converters in order and
//! uses the first one that accepts the media type.

use std::sync::Arc;

use mime::Mime;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ProxyError;

/// Reads and writes bodies of the media types it supports.
pub trait MessageConverter: Send + Sync {
    fn can_read(&self, media: &Mime) -> bool;
    fn can_write(&self, media: &Mime) -> bool;
    fn read(&self, media: &Mime, bytes: &[u8]) -> Result<Value, String>;
    fn write(&self, media: &Mime, value: &Value) -> Result<Vec<u8>, String>;
}

/// `application/json` and `*/*+json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl JsonConverter {
    fn supports(media: &Mime) -> bool {
        media.subtype() == mime::JSON || media.suffix() == Some(mime::JSON)
    }
}

impl MessageConverter for JsonConverter {
    fn can_read(&self, media: &Mime) -> bool {
        Self::supports(media)
    }

    fn can_write(&self, media: &Mime) -> bool {
        Self::supports(media)
    }

    fn read(&self, _media: &Mime, bytes: &[u8]) -> Result<Value, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }

    fn write(&self, _media: &Mime, value: &Value) -> Result<Vec<u8>, String> {
        serde_json::to_vec(value).map_err(|e| e.to_string())
    }
}

/// `text/*` as UTF-8. Non-string values are written in their JSON form.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextConverter;

impl MessageConverter for TextConverter {
    fn can_read(&self, media: &Mime) -> bool {
        media.type_() == mime::TEXT
    }

    fn can_write(&self, media: &Mime) -> bool {
        media.type_() == mime::TEXT
    }

    fn read(&self, _media: &Mime, bytes: &[u8]) -> Result<Value, String> {
        String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| e.to_string())
    }

    fn write(&self, _media: &Mime, value: &Value) -> Result<Vec<u8>, String> {
        Ok(match value {
            Value::String(s) => s.clone().into_bytes(),
            Value::Null => Vec::new(),
            other => other.to_string().into_bytes(),
        })
    }
}

/// `application/x-www-form-urlencoded` to and from a JSON object. Repeated
/// keys map to arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormConverter;

impl FormConverter {
    fn supports(media: &Mime) -> bool {
        media.type_() == mime::APPLICATION && media.subtype() == mime::WWW_FORM_URLENCODED
    }
}

impl MessageConverter for FormConverter {
    fn can_read(&self, media: &Mime) -> bool {
        Self::supports(media)
    }

    fn can_write(&self, media: &Mime) -> bool {
        Self::supports(media)
    }

    fn read(&self, _media: &Mime, bytes: &[u8]) -> Result<Value, String> {
        let mut object = Map::new();
        for (key, value) in url::form_urlencoded::parse(bytes) {
            let value = Value::String(value.into_owned());
            match object.get_mut(key.as_ref()) {
                Some(Value::Array(values)) => values.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    object.insert(key.into_owned(), value);
                }
            }
        }
        Ok(Value::Object(object))
    }

    fn write(&self, _media: &Mime, value: &Value) -> Result<Vec<u8>, String> {
        let Value::Object(object) = value else {
            return Err("form data must be an object".to_string());
        };
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in object {
            match value {
                Value::Array(values) => {
                    for v in values {
                        serializer.append_pair(key, &scalar_text(v));
                    }
                }
                Value::Null => {}
                other => {
                    serializer.append_pair(key, &scalar_text(other));
                }
            }
        }
        Ok(serializer.finish().into_bytes())
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Ordered set of converters.
#[derive(Clone)]
pub struct Converters {
    converters: Vec<Arc<dyn MessageConverter>>,
}

impl Default for Converters {
    fn default() -> Self {
        Self {
            converters: vec![
                Arc::new(TextConverter),
                Arc::new(JsonConverter),
                Arc::new(FormConverter),
            ],
        }
    }
}

impl std::fmt::Debug for Converters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Converters({})", self.converters.len())
    }
}

impl Converters {
    pub fn empty() -> Self {
        Self {
            converters: Vec::new(),
        }
    }

    /// Register `converter` ahead of the existing ones.
    pub fn with(mut self, converter: Arc<dyn MessageConverter>) -> Self {
        self.converters.insert(0, converter);
        self
    }

    /// Decode `bytes` of the given content type into `T`. A missing content
    /// type is treated as `application/octet-stream`.
    pub fn read<T: DeserializeOwned>(
        &self,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<T, ProxyError> {
        let raw = content_type.unwrap_or("application/octet-stream");
        let media: Mime = raw
            .parse()
            .map_err(|_| ProxyError::UnsupportedMediaType(raw.to_string()))?;
        let converter = self
            .converters
            .iter()
            .find(|c| c.can_read(&media))
            .ok_or_else(|| ProxyError::UnsupportedMediaType(raw.to_string()))?;
        let value = converter
            .read(&media, bytes)
            .map_err(ProxyError::DeserializationError)?;
        serde_json::from_value(value).map_err(|e| ProxyError::DeserializationError(e.to_string()))
    }

    /// Encode `value` as `media`.
    pub fn write(&self, media: &Mime, value: &Value) -> Result<Vec<u8>, ProxyError> {
        let converter = self
            .converters
            .iter()
            .find(|c| c.can_write(media))
            .ok_or_else(|| ProxyError::UnsupportedMediaType(media.to_string()))?;
        converter
            .write(media, value)
            .map_err(ProxyError::SerializationError)
    }
}
