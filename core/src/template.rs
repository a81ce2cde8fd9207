//! Service declarations and the immutable per-method templates built from them.
//!
//! # Design
//! A service is declared with plain builder values instead of annotations:
//! a `ServiceDefinition` holds service-level defaults plus one
//! `MethodDeclaration` per method, each made of an `Exchange` (verb, URL,
//! content type, accept types, static headers) and its ordered `Param`s.
//!
//! `ServiceMethodTemplate::build` validates a declaration eagerly and returns
//! a `ConfigError` naming the first problem it finds. A template is never
//! re-derived after that: the proxy keeps it behind an `Arc` and every call
//! reads it.

use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;
use crate::http::HttpMethod;
use crate::resolver::ArgumentResolver;
use crate::response::{ReturnKind, ReturnValue};

/// The value shape a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Scalar,
    MultiValue,
    File,
    Uri,
    Any,
}

/// User-supplied resolver for a `BindingRole::Custom` parameter.
#[derive(Clone)]
pub struct CustomResolver(pub Arc<dyn ArgumentResolver>);

impl fmt::Debug for CustomResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomResolver(..)")
    }
}

impl PartialEq for CustomResolver {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// What request component a parameter is bound to.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingRole {
    PathVariable,
    RequestParam,
    RequestParams,
    Header,
    Headers,
    Body,
    Part,
    UriOverride,
    Ignored,
    Custom(CustomResolver),
}

impl BindingRole {
    fn label(&self) -> &'static str {
        match self {
            BindingRole::PathVariable => "path variable",
            BindingRole::RequestParam | BindingRole::RequestParams => "request param",
            BindingRole::Header | BindingRole::Headers => "header",
            BindingRole::Body => "body",
            BindingRole::Part => "request part",
            BindingRole::UriOverride => "URI",
            BindingRole::Ignored => "ignored",
            BindingRole::Custom(_) => "custom",
        }
    }
}

/// Declaration of one method parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    name: String,
    wire_name: Option<String>,
    role: BindingRole,
    param_type: ParamType,
    nullable: bool,
}

impl Param {
    fn new(name: impl Into<String>, role: BindingRole, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            wire_name: None,
            role,
            param_type,
            nullable: false,
        }
    }

    /// A `{name}` placeholder in the URI template.
    pub fn path_variable(name: impl Into<String>) -> Self {
        Self::new(name, BindingRole::PathVariable, ParamType::Scalar)
    }

    /// One query (or form) parameter.
    pub fn request_param(name: impl Into<String>) -> Self {
        Self::new(name, BindingRole::RequestParam, ParamType::Scalar)
    }

    /// A multi-value map of query (or form) parameters.
    pub fn request_params(name: impl Into<String>) -> Self {
        Self::new(name, BindingRole::RequestParams, ParamType::MultiValue)
    }

    pub fn header(name: impl Into<String>) -> Self {
        Self::new(name, BindingRole::Header, ParamType::Scalar)
    }

    /// A multi-value map of headers.
    pub fn headers(name: impl Into<String>) -> Self {
        Self::new(name, BindingRole::Headers, ParamType::MultiValue)
    }

    pub fn body(name: impl Into<String>) -> Self {
        Self::new(name, BindingRole::Body, ParamType::Any)
    }

    /// A multipart part holding a scalar, structured value or file.
    pub fn part(name: impl Into<String>) -> Self {
        Self::new(name, BindingRole::Part, ParamType::Any)
    }

    /// A multipart part that must be a `MultipartFile`.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, BindingRole::Part, ParamType::File)
    }

    /// A URI replacing the base URL and template for one call. Null keeps the
    /// declared target.
    pub fn uri(name: impl Into<String>) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, BindingRole::UriOverride, ParamType::Uri)
        }
    }

    pub fn ignored(name: impl Into<String>) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, BindingRole::Ignored, ParamType::Any)
        }
    }

    pub fn custom(name: impl Into<String>, resolver: Arc<dyn ArgumentResolver>) -> Self {
        Self {
            nullable: true,
            ..Self::new(
                name,
                BindingRole::Custom(CustomResolver(resolver)),
                ParamType::Any,
            )
        }
    }

    /// Use `name` on the wire instead of the parameter name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.wire_name = Some(name.into());
        self
    }

    /// Accept a null argument.
    pub fn optional(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// How one parameter maps onto the request, fixed at build time.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBinding {
    pub position: usize,
    /// Parameter name, used in error messages.
    pub parameter: String,
    /// Name on the wire: placeholder, query key, header or part name.
    pub name: String,
    pub role: BindingRole,
    pub param_type: ParamType,
    pub nullable: bool,
}

/// Verb, URL and content metadata of an exchange.
///
/// Used both per method and as service-level defaults, where `url` is a
/// prefix joined in front of every method URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exchange {
    method: Option<HttpMethod>,
    url: String,
    content_type: Option<String>,
    accept: Vec<String>,
    headers: Vec<(String, String)>,
    params: Vec<Param>,
}

impl Exchange {
    /// An exchange with no verb; it must come from the service defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_method(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method: Some(method),
            ..Self::new(url)
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::with_method(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::with_method(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::with_method(HttpMethod::Put, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::with_method(HttpMethod::Patch, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::with_method(HttpMethod::Delete, url)
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn accept(mut self, media_type: impl Into<String>) -> Self {
        self.accept.push(media_type.into());
        self
    }

    /// A header sent with every call.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append the next parameter in declaration order.
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }
}

/// A declared method: its name, exchange and return kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDeclaration {
    pub name: String,
    pub exchange: Exchange,
    pub return_kind: ReturnKind,
}

/// Declaration of a whole HTTP service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDefinition {
    name: String,
    defaults: Exchange,
    methods: Vec<MethodDeclaration>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: Exchange::default(),
            methods: Vec::new(),
        }
    }

    /// Service-level defaults inherited by every method. Parameters declared
    /// on the defaults are ignored.
    pub fn defaults(mut self, defaults: Exchange) -> Self {
        self.defaults = defaults;
        self
    }

    /// Declare a method returning `R`.
    pub fn method<R: ReturnValue>(mut self, name: impl Into<String>, exchange: Exchange) -> Self {
        self.methods.push(MethodDeclaration {
            name: name.into(),
            exchange,
            return_kind: R::KIND,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDeclaration] {
        &self.methods
    }

    /// Validate every method, returning the templates in declaration order.
    pub fn templates(&self) -> Result<Vec<ServiceMethodTemplate>, ConfigError> {
        let mut templates: Vec<ServiceMethodTemplate> = Vec::with_capacity(self.methods.len());
        for declaration in &self.methods {
            if templates.iter().any(|t| t.name == declaration.name) {
                return Err(ConfigError::DuplicateMethod {
                    service: self.name.clone(),
                    method: declaration.name.clone(),
                });
            }
            templates.push(ServiceMethodTemplate::build(&self.defaults, declaration)?);
        }
        Ok(templates)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Variable(String),
}

/// A URI template with `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    raw: String,
    parts: Vec<TemplatePart>,
}

impl UriTemplate {
    /// Parse `raw`, returning `None` on unbalanced braces or empty names.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = Vec::new();
        let mut rest = raw;
        while let Some(open) = rest.find(['{', '}']) {
            if rest.as_bytes()[open] == b'}' {
                return None;
            }
            let close = rest[open..].find('}')? + open;
            let name = &rest[open + 1..close];
            if name.is_empty() || name.contains('{') {
                return None;
            }
            if open > 0 {
                parts.push(TemplatePart::Literal(rest[..open].to_string()));
            }
            parts.push(TemplatePart::Variable(name.to_string()));
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_string()));
        }
        Some(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            TemplatePart::Variable(name) => Some(name.as_str()),
            TemplatePart::Literal(_) => None,
        })
    }

    /// Substitute every placeholder. Values are inserted as given; callers
    /// encode them. Fails with the name of the first unbound placeholder.
    pub fn expand<'a, F>(&self, lookup: F) -> Result<String, String>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let mut out = String::with_capacity(self.raw.len());
        for part in &self.parts {
            match part {
                TemplatePart::Literal(s) => out.push_str(s),
                TemplatePart::Variable(name) => {
                    out.push_str(lookup(name).ok_or_else(|| name.clone())?);
                }
            }
        }
        Ok(out)
    }
}

/// Immutable description of one proxy method, built once per declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMethodTemplate {
    pub name: String,
    pub http_method: HttpMethod,
    pub uri_template: UriTemplate,
    pub content_type: Option<mime::Mime>,
    pub accept: Vec<mime::Mime>,
    pub headers: Vec<(String, String)>,
    pub bindings: Vec<ParameterBinding>,
    pub return_kind: ReturnKind,
}

impl ServiceMethodTemplate {
    /// Merge `declaration` over the service `defaults` and validate it.
    pub fn build(
        defaults: &Exchange,
        declaration: &MethodDeclaration,
    ) -> Result<Self, ConfigError> {
        let method = declaration.name.as_str();
        let exchange = &declaration.exchange;

        let http_method = exchange
            .method
            .or(defaults.method)
            .ok_or_else(|| ConfigError::MissingHttpMethod {
                method: method.to_string(),
            })?;

        let url = join_url(&defaults.url, &exchange.url);
        let uri_template =
            UriTemplate::parse(&url).ok_or_else(|| ConfigError::MalformedTemplate {
                method: method.to_string(),
                template: url.clone(),
            })?;

        let content_type = exchange
            .content_type
            .as_ref()
            .or(defaults.content_type.as_ref())
            .map(|value| {
                value
                    .parse::<mime::Mime>()
                    .map_err(|_| ConfigError::InvalidContentType {
                        method: method.to_string(),
                        value: value.clone(),
                    })
            })
            .transpose()?;

        let accept_source = if exchange.accept.is_empty() {
            &defaults.accept
        } else {
            &exchange.accept
        };
        let accept = accept_source
            .iter()
            .map(|value| {
                value
                    .parse::<mime::Mime>()
                    .map_err(|_| ConfigError::InvalidAcceptType {
                        method: method.to_string(),
                        value: value.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let bindings: Vec<ParameterBinding> = exchange
            .params
            .iter()
            .enumerate()
            .map(|(position, param)| ParameterBinding {
                position,
                parameter: param.name.clone(),
                name: param.wire_name.clone().unwrap_or_else(|| param.name.clone()),
                role: param.role.clone(),
                param_type: param.param_type,
                nullable: param.nullable,
            })
            .collect();

        check_exclusive_roles(method, &bindings)?;
        check_path_variables(method, &uri_template, &bindings)?;

        let mut headers = defaults.headers.clone();
        headers.extend(exchange.headers.iter().cloned());

        Ok(Self {
            name: method.to_string(),
            http_method,
            uri_template,
            content_type,
            accept,
            headers,
            bindings,
            return_kind: declaration.return_kind,
        })
    }
}

fn join_url(prefix: &str, url: &str) -> String {
    match (prefix.is_empty(), url.is_empty()) {
        (true, _) => url.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => {
            let prefix = prefix.trim_end_matches('/');
            let url = url.trim_start_matches('/');
            format!("{prefix}/{url}")
        }
    }
}

fn check_exclusive_roles(method: &str, bindings: &[ParameterBinding]) -> Result<(), ConfigError> {
    let count = |role: &BindingRole| bindings.iter().filter(|b| &b.role == role).count();
    let bodies = count(&BindingRole::Body);
    if bodies > 1 {
        return Err(ConfigError::MultipleBodies {
            method: method.to_string(),
        });
    }
    if bodies == 1 && count(&BindingRole::Part) > 0 {
        return Err(ConfigError::BodyWithParts {
            method: method.to_string(),
        });
    }
    if count(&BindingRole::UriOverride) > 1 {
        return Err(ConfigError::MultipleUriOverrides {
            method: method.to_string(),
        });
    }
    Ok(())
}

fn check_path_variables(
    method: &str,
    template: &UriTemplate,
    bindings: &[ParameterBinding],
) -> Result<(), ConfigError> {
    let path_variables: Vec<&str> = bindings
        .iter()
        .filter(|b| b.role == BindingRole::PathVariable)
        .map(|b| b.name.as_str())
        .collect();

    for name in &path_variables {
        if !template.variables().any(|v| v == *name) {
            return Err(ConfigError::UnknownPathVariable {
                method: method.to_string(),
                name: name.to_string(),
                template: template.as_str().to_string(),
            });
        }
    }

    // A custom resolver may supply URI variables of its own.
    if bindings
        .iter()
        .any(|b| matches!(b.role, BindingRole::Custom(_)))
    {
        return Ok(());
    }
    if let Some(placeholder) = template.variables().find(|v| !path_variables.contains(v)) {
        return Err(ConfigError::UnresolvedPlaceholder {
            method: method.to_string(),
            placeholder: placeholder.to_string(),
        });
    }
    Ok(())
}

impl fmt::Display for ParameterBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} `{}`", self.position, self.role.label(), self.name)
    }
}
