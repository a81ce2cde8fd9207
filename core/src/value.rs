//! Runtime argument values passed to an invocation.
//!
//! # Design
//! A proxy method receives its arguments as an ordered `Vec<ArgValue>`, one
//! entry per declared parameter. `ArgValue` is the small closed set of shapes
//! an argument can take on the wire: nothing, a scalar, a multi-value map, a
//! file, a URI or a structured (JSON) value. Resolvers check the shape against
//! the parameter's declared `ParamType` before folding it into the request.

use serde::Serialize;

use crate::error::ProxyError;

/// Insertion-ordered map from a key to one or more values.
///
/// Keys keep the order of their first insertion; values under a key keep the
/// order they were added in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiValueMap {
    entries: Vec<(String, Vec<String>)>,
}

impl MultiValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` under `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Builder-style `add`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate `(key, values)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Iterate every `(key, value)` pair, flattening multi-valued keys.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MultiValueMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = MultiValueMap::new();
        for (k, v) in iter {
            map.add(k, v);
        }
        map
    }
}

/// A file-like argument for multipart uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartFile {
    /// Logical name of the file. The part name on the wire comes from the
    /// parameter, not from this field.
    pub name: String,
    pub original_filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl MultipartFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            original_filename: None,
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn original_filename(mut self, filename: impl Into<String>) -> Self {
        self.original_filename = Some(filename.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One argument of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Null,
    Text(String),
    Values(MultiValueMap),
    File(MultipartFile),
    Uri(String),
    Json(serde_json::Value),
}

impl ArgValue {
    /// Serialize any value into a structured argument.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ProxyError> {
        serde_json::to_value(value)
            .map(ArgValue::Json)
            .map_err(|e| ProxyError::SerializationError(e.to_string()))
    }

    pub fn uri(uri: impl Into<String>) -> Self {
        ArgValue::Uri(uri.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null)
    }

    /// Short name of the shape, for binding error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            ArgValue::Null => "null",
            ArgValue::Text(_) => "scalar",
            ArgValue::Values(_) => "multi-value map",
            ArgValue::File(_) => "file",
            ArgValue::Uri(_) => "URI",
            ArgValue::Json(_) => "structured value",
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Text(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Text(value)
    }
}

impl From<&String> for ArgValue {
    fn from(value: &String) -> Self {
        ArgValue::Text(value.clone())
    }
}

macro_rules! scalar_arg {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ArgValue {
            fn from(value: $ty) -> Self {
                ArgValue::Text(value.to_string())
            }
        })*
    };
}

scalar_arg!(bool, char, i32, i64, u16, u32, u64, usize, f64, uuid::Uuid);

impl From<MultiValueMap> for ArgValue {
    fn from(value: MultiValueMap) -> Self {
        ArgValue::Values(value)
    }
}

impl From<MultipartFile> for ArgValue {
    fn from(value: MultipartFile) -> Self {
        ArgValue::File(value)
    }
}

impl From<url::Url> for ArgValue {
    fn from(value: url::Url) -> Self {
        ArgValue::Uri(value.into())
    }
}

impl From<&url::Url> for ArgValue {
    fn from(value: &url::Url) -> Self {
        ArgValue::Uri(value.as_str().to_string())
    }
}

impl From<serde_json::Value> for ArgValue {
    fn from(value: serde_json::Value) -> Self {
        ArgValue::Json(value)
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ArgValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_value_map_keeps_key_and_value_order() {
        let mut map = MultiValueMap::new();
        map.add("b", "1");
        map.add("a", "2");
        map.add("b", "3");

        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(map.get("b").unwrap(), ["1".to_string(), "3".to_string()]);
        let pairs: Vec<(&str, &str)> = map.pairs().collect();
        assert_eq!(pairs, vec![("b", "1"), ("b", "3"), ("a", "2")]);
    }

    #[test]
    fn option_none_becomes_null() {
        let arg: ArgValue = Option::<String>::None.into();
        assert!(arg.is_null());
        let arg: ArgValue = Some("x").into();
        assert_eq!(arg, ArgValue::Text("x".to_string()));
    }

    #[test]
    fn url_becomes_uri_argument() {
        let url = url::Url::parse("http://localhost:8080/greeting/123").unwrap();
        assert_eq!(
            ArgValue::from(&url),
            ArgValue::Uri("http://localhost:8080/greeting/123".to_string())
        );
    }

    #[test]
    fn json_argument_serializes_structs() {
        #[derive(Serialize)]
        struct Greeting {
            text: &'static str,
        }
        let arg = ArgValue::json(&Greeting { text: "hi" }).unwrap();
        assert_eq!(arg, ArgValue::Json(serde_json::json!({"text": "hi"})));
    }
}
