//! Per-invocation request state and its assembly into an `HttpRequest`.
//!
//! # Design
//! `RequestContext` is created fresh for every call and filled by the
//! argument resolvers. `RequestContext::into_request` then resolves the target
//! URI, decides where request params go (query string or form body), encodes
//! the body or multipart parts, and fills in the declared content type and
//! accept headers unless a header argument already set them.

use mime::Mime;
use serde_json::Value;

use crate::codec::Converters;
use crate::error::ProxyError;
use crate::http::{find_header, has_header, HttpRequest, ACCEPT, CONTENT_TYPE};
use crate::multipart::{
    self, BoundaryGenerator, Part, APPLICATION_JSON, MULTIPART_FORM_DATA, TEXT_PLAIN_UTF8,
};
use crate::template::{ParameterBinding, ServiceMethodTemplate, UriTemplate};
use crate::value::MultiValueMap;

const OCTET_STREAM: &str = "application/octet-stream";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// A request body set by a body argument.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyValue {
    Text(String),
    Json(Value),
    Form(MultiValueMap),
    Bytes {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
}

/// Mutable state of one invocation, filled in declaration order.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: String,
    uri: Option<String>,
    uri_variables: Vec<(String, String)>,
    request_params: MultiValueMap,
    headers: Vec<(String, String)>,
    body: Option<BodyValue>,
    parts: Vec<Part>,
}

/// Invocation-independent inputs to request assembly.
pub(crate) struct RequestSettings<'a> {
    pub base_url: Option<&'a str>,
    pub converters: &'a Converters,
    pub boundaries: &'a dyn BoundaryGenerator,
}

impl RequestContext {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: None,
            uri_variables: Vec::new(),
            request_params: MultiValueMap::new(),
            headers: Vec::new(),
            body: None,
            parts: Vec::new(),
        }
    }

    /// Name of the proxy method being invoked.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.uri = Some(uri.into());
    }

    /// Bind a placeholder to an already encoded value.
    pub fn add_uri_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.uri_variables.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.uri_variables.push((name, value)),
        }
    }

    pub fn uri_variable(&self, name: &str) -> Option<&str> {
        self.uri_variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn add_request_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.request_params.add(name, value);
    }

    pub fn request_params(&self) -> &MultiValueMap {
        &self.request_params
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Set the body. Fails if a body or multipart parts are already present.
    pub fn set_body(&mut self, body: BodyValue) -> Result<(), String> {
        if !self.parts.is_empty() {
            return Err("request already has multipart parts".to_string());
        }
        if self.body.is_some() {
            return Err("request body is already set".to_string());
        }
        self.body = Some(body);
        Ok(())
    }

    /// Add a multipart part. Fails if a body is already present.
    pub fn add_part(&mut self, part: Part) -> Result<(), String> {
        if self.body.is_some() {
            return Err("request already has a body".to_string());
        }
        self.parts.push(part);
        Ok(())
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn binding_error(
        &self,
        binding: &ParameterBinding,
        reason: impl Into<String>,
    ) -> ProxyError {
        ProxyError::binding(&self.method, &binding.parameter, reason)
    }

    pub(crate) fn into_request(
        self,
        template: &ServiceMethodTemplate,
        settings: &RequestSettings<'_>,
    ) -> Result<HttpRequest, ProxyError> {
        let mut uri = self.resolve_uri(template, settings.base_url)?;

        let mut headers = template.headers.clone();
        headers.extend(self.headers);
        let declared_type = find_header(&headers, CONTENT_TYPE)
            .map(str::to_string)
            .or_else(|| template.content_type.as_ref().map(Mime::to_string));

        let mut content_type: Option<String> = declared_type.clone();
        let mut query = self.request_params;
        let body = if !self.parts.is_empty() {
            let boundary = settings.boundaries.boundary();
            let essence = declared_type
                .as_deref()
                .and_then(|t| t.parse::<Mime>().ok())
                .filter(|m| m.type_() == mime::MULTIPART)
                .map(|m| m.essence_str().to_string())
                .unwrap_or_else(|| MULTIPART_FORM_DATA.to_string());
            content_type = Some(format!("{essence};boundary={boundary}"));
            Some(multipart::encode(&self.parts, &boundary))
        } else if let Some(body) = self.body {
            let (bytes, media) = encode_body(body, declared_type, settings.converters)?;
            content_type = Some(media);
            Some(bytes)
        } else if template.http_method.has_body()
            && !query.is_empty()
            && declared_type.as_deref().is_some_and(is_form)
        {
            let form = encode_form(&query);
            query = MultiValueMap::new();
            content_type = declared_type.map(|t| with_utf8_charset(&t));
            Some(form.into_bytes())
        } else {
            None
        };

        if !query.is_empty() {
            // The query goes between the path and any fragment.
            let fragment = uri.find('#').map(|at| uri.split_off(at));
            uri.push(if uri.contains('?') { '&' } else { '?' });
            uri.push_str(&encode_form(&query));
            if let Some(fragment) = fragment {
                uri.push_str(&fragment);
            }
        }

        if let Some(content_type) = content_type {
            headers.retain(|(n, _)| !n.eq_ignore_ascii_case(CONTENT_TYPE));
            headers.push((CONTENT_TYPE.to_string(), content_type));
        }
        if !template.accept.is_empty() && !has_header(&headers, ACCEPT) {
            let accept = template
                .accept
                .iter()
                .map(Mime::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            headers.push((ACCEPT.to_string(), accept));
        }

        Ok(HttpRequest {
            method: template.http_method,
            uri,
            headers,
            body,
        })
    }

    fn resolve_uri(
        &self,
        template: &ServiceMethodTemplate,
        base_url: Option<&str>,
    ) -> Result<String, ProxyError> {
        let lookup = |name: &str| self.uri_variable(name);
        let unbound = |name: String| ProxyError::Binding {
            method: self.method.clone(),
            parameter: name.clone(),
            reason: format!("no value for URI placeholder `{{{name}}}`"),
        };

        if let Some(uri) = &self.uri {
            return match UriTemplate::parse(uri) {
                Some(parsed) => parsed.expand(lookup).map_err(unbound),
                None => Ok(uri.clone()),
            };
        }

        let path = template.uri_template.expand(lookup).map_err(unbound)?;
        Ok(match base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                if path.is_empty() {
                    base.to_string()
                } else if path.starts_with('/') || path.starts_with('?') {
                    format!("{base}{path}")
                } else {
                    format!("{base}/{path}")
                }
            }
            None => path,
        })
    }
}

fn is_form(content_type: &str) -> bool {
    content_type
        .parse::<Mime>()
        .is_ok_and(|m| m.essence_str() == FORM_URLENCODED)
}

fn with_utf8_charset(content_type: &str) -> String {
    match content_type.parse::<Mime>() {
        Ok(m) if m.get_param(mime::CHARSET).is_some() => content_type.to_string(),
        _ => format!("{content_type};charset=UTF-8"),
    }
}

fn encode_form(params: &MultiValueMap) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.pairs())
        .finish()
}

/// Encode a body and return it with the content type it was written as.
fn encode_body(
    body: BodyValue,
    declared: Option<String>,
    converters: &Converters,
) -> Result<(Vec<u8>, String), ProxyError> {
    match body {
        BodyValue::Bytes { bytes, content_type } => {
            let media = declared
                .or(content_type)
                .unwrap_or_else(|| OCTET_STREAM.to_string());
            Ok((bytes, media))
        }
        BodyValue::Form(map) => {
            let media = declared.unwrap_or_else(|| FORM_URLENCODED.to_string());
            if is_form(&media) {
                Ok((encode_form(&map).into_bytes(), with_utf8_charset(&media)))
            } else {
                let value = Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.to_string(), Value::from(v.to_vec())))
                        .collect(),
                );
                write_with(converters, &media, &value)
            }
        }
        BodyValue::Text(text) => {
            let media = declared.unwrap_or_else(|| TEXT_PLAIN_UTF8.to_string());
            write_with(converters, &media, &Value::String(text))
        }
        BodyValue::Json(value) => {
            let media = declared.unwrap_or_else(|| APPLICATION_JSON.to_string());
            write_with(converters, &media, &value)
        }
    }
}

fn write_with(
    converters: &Converters,
    media: &str,
    value: &Value,
) -> Result<(Vec<u8>, String), ProxyError> {
    let parsed: Mime = media
        .parse()
        .map_err(|_| ProxyError::UnsupportedMediaType(media.to_string()))?;
    let bytes = converters.write(&parsed, value)?;
    Ok((bytes, media.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::FixedBoundary;
    use crate::response::ReturnKind;
    use crate::template::{Exchange, MethodDeclaration, Param};

    fn template(exchange: Exchange) -> ServiceMethodTemplate {
        let declaration = MethodDeclaration {
            name: "call".to_string(),
            exchange,
            return_kind: ReturnKind::Void,
        };
        ServiceMethodTemplate::build(&Exchange::default(), &declaration).unwrap()
    }

    fn build(
        context: RequestContext,
        template: &ServiceMethodTemplate,
    ) -> Result<HttpRequest, ProxyError> {
        let converters = Converters::default();
        let boundaries = FixedBoundary("b0".to_string());
        let settings = RequestSettings {
            base_url: Some("http://localhost:8080/"),
            converters: &converters,
            boundaries: &boundaries,
        };
        context.into_request(template, &settings)
    }

    #[test]
    fn params_go_to_query_for_get() {
        let t = template(Exchange::get("/search"));
        let mut context = RequestContext::new("call");
        context.add_request_param("q", "a b");
        context.add_request_param("q", "c");
        let request = build(context, &t).unwrap();
        assert_eq!(request.uri, "http://localhost:8080/search?q=a+b&q=c");
        assert!(request.body.is_none());
    }

    #[test]
    fn params_go_to_body_for_form_post() {
        let t = template(Exchange::post("").content_type("application/x-www-form-urlencoded"));
        let mut context = RequestContext::new("call");
        context.add_request_param("param1", "value 1");
        context.add_request_param("param2", "value 2");
        let request = build(context, &t).unwrap();
        assert_eq!(request.uri, "http://localhost:8080");
        assert_eq!(request.body.as_deref(), Some(&b"param1=value+1&param2=value+2"[..]));
        assert_eq!(
            request.header("Content-Type"),
            Some("application/x-www-form-urlencoded;charset=UTF-8")
        );
    }

    #[test]
    fn explicit_content_type_header_wins() {
        let t = template(Exchange::post("/x").content_type("application/json"));
        let mut context = RequestContext::new("call");
        context.add_header("content-type", "text/plain");
        context.set_body(BodyValue::Text("hi".to_string())).unwrap();
        let request = build(context, &t).unwrap();
        let types: Vec<&str> = request
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(types, vec!["text/plain"]);
        assert_eq!(request.body.as_deref(), Some(&b"hi"[..]));
    }

    #[test]
    fn json_body_defaults_to_application_json() {
        let t = template(Exchange::put("/x"));
        let mut context = RequestContext::new("call");
        context
            .set_body(BodyValue::Json(serde_json::json!({"a": 1})))
            .unwrap();
        let request = build(context, &t).unwrap();
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(&br#"{"a":1}"#[..]));
    }

    #[test]
    fn multipart_content_type_carries_boundary() {
        let t = template(Exchange::post("/upload"));
        let mut context = RequestContext::new("call");
        context.add_part(Part::text("a", "1")).unwrap();
        let request = build(context, &t).unwrap();
        assert_eq!(
            request.header("Content-Type"),
            Some("multipart/form-data;boundary=b0")
        );
    }

    #[test]
    fn uri_override_replaces_base_and_expands_placeholders() {
        let t = template(Exchange::get("/test/{id}").param(Param::path_variable("id")));
        let mut context = RequestContext::new("call");
        context.add_uri_variable("id", "456");
        context.set_uri("http://other:9090/greeting/{id}");
        context.add_request_param("lang", "en");
        let request = build(context, &t).unwrap();
        assert_eq!(request.uri, "http://other:9090/greeting/456?lang=en");
    }

    #[test]
    fn query_params_go_before_fragment() {
        let t = template(Exchange::get("/x").param(Param::uri("uri")));
        let mut context = RequestContext::new("call");
        context.set_uri("http://h/p#frag");
        context.add_request_param("q", "v");
        let request = build(context, &t).unwrap();
        assert_eq!(request.uri, "http://h/p?q=v#frag");

        let mut context = RequestContext::new("call");
        context.set_uri("http://h/p?a=1#sec?tion");
        context.add_request_param("q", "v");
        let request = build(context, &t).unwrap();
        assert_eq!(request.uri, "http://h/p?a=1&q=v#sec?tion");
    }

    #[test]
    fn accept_header_comes_from_declaration() {
        let t = template(Exchange::get("/x").accept("application/json"));
        let request = build(RequestContext::new("call"), &t).unwrap();
        assert_eq!(request.header("Accept"), Some("application/json"));
    }
}
