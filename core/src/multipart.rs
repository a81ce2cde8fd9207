//! `multipart/form-data` encoding.
//!
//! Each part is written as a boundary line, `Content-Disposition`,
//! `Content-Type` and `Content-Length` headers, a blank line and the raw
//! bytes. Boundaries come from a `BoundaryGenerator` so tests can pin them.

pub const TEXT_PLAIN_UTF8: &str = "text/plain;charset=UTF-8";
pub const APPLICATION_JSON: &str = "application/json";
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// Source of multipart boundary markers.
pub trait BoundaryGenerator: Send + Sync {
    fn boundary(&self) -> String;
}

/// A fresh random boundary per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBoundary;

impl BoundaryGenerator for RandomBoundary {
    fn boundary(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// The same boundary for every request.
#[derive(Debug, Clone)]
pub struct FixedBoundary(pub String);

impl BoundaryGenerator for FixedBoundary {
    fn boundary(&self) -> String {
        self.0.clone()
    }
}

/// One named part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Part {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: TEXT_PLAIN_UTF8.to_string(),
            bytes: value.into().into_bytes(),
        }
    }
}

/// Encode `parts` into a single body delimited by `boundary`.
pub fn encode(parts: &[Part], boundary: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        let disposition = match &part.filename {
            Some(filename) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                escape_quoted(&part.name),
                escape_quoted(filename)
            ),
            None => format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n",
                escape_quoted(&part.name)
            ),
        };
        out.extend_from_slice(disposition.as_bytes());
        out.extend_from_slice(format!("Content-Type: {}\r\n", part.content_type).as_bytes());
        out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", part.bytes.len()).as_bytes());
        out.extend_from_slice(&part.bytes);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    out
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}
