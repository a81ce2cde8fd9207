//! Argument resolvers: one strategy per binding role.
//!
//! # Design
//! The proxy picks a resolver for every parameter when it is created and
//! keeps the chain next to the method template. At call time each resolver
//! receives its argument, in declaration order, and folds it into the
//! invocation's `RequestContext`. Null and shape checks common to every role
//! run first in `check_argument`, so resolvers only see values their
//! parameter accepts (or null, when the parameter is nullable).

use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::ProxyError;
use crate::multipart::{Part, APPLICATION_JSON, TEXT_PLAIN_UTF8};
use crate::request::{BodyValue, RequestContext};
use crate::template::{BindingRole, ParamType, ParameterBinding};
use crate::value::ArgValue;

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Folds one argument into the request being built.
pub trait ArgumentResolver: Send + Sync {
    fn resolve(
        &self,
        binding: &ParameterBinding,
        value: ArgValue,
        context: &mut RequestContext,
    ) -> Result<(), ProxyError>;
}

/// Pick the built-in resolver for `binding`, or its custom one.
pub fn resolver_for(binding: &ParameterBinding) -> Arc<dyn ArgumentResolver> {
    match &binding.role {
        BindingRole::PathVariable => Arc::new(PathVariableResolver),
        BindingRole::RequestParam | BindingRole::RequestParams => Arc::new(RequestParamResolver),
        BindingRole::Header | BindingRole::Headers => Arc::new(HeaderResolver),
        BindingRole::Body => Arc::new(BodyResolver),
        BindingRole::Part => Arc::new(RequestPartResolver),
        BindingRole::UriOverride => Arc::new(UriResolver),
        BindingRole::Ignored => Arc::new(IgnoredResolver),
        BindingRole::Custom(custom) => Arc::clone(&custom.0),
    }
}

/// Reject missing required values and values of the wrong shape.
pub(crate) fn check_argument(
    method: &str,
    binding: &ParameterBinding,
    value: &ArgValue,
) -> Result<(), ProxyError> {
    if value.is_null() {
        if binding.nullable {
            return Ok(());
        }
        return Err(ProxyError::binding(
            method,
            &binding.parameter,
            format!("required {binding} is missing"),
        ));
    }
    let accepted = match binding.param_type {
        ParamType::Scalar => matches!(value, ArgValue::Text(_)),
        ParamType::MultiValue => matches!(value, ArgValue::Values(_)),
        ParamType::File => matches!(value, ArgValue::File(_)),
        ParamType::Uri => matches!(value, ArgValue::Uri(_)),
        ParamType::Any => true,
    };
    if accepted {
        Ok(())
    } else {
        Err(ProxyError::binding(
            method,
            &binding.parameter,
            format!("{binding} cannot take a {} value", value.shape()),
        ))
    }
}

/// Substitutes `{name}` placeholders. A nullable variable bound to null
/// expands to the empty string.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathVariableResolver;

impl ArgumentResolver for PathVariableResolver {
    fn resolve(
        &self,
        binding: &ParameterBinding,
        value: ArgValue,
        context: &mut RequestContext,
    ) -> Result<(), ProxyError> {
        let raw = match value {
            ArgValue::Text(text) => text,
            _ => String::new(),
        };
        let encoded = utf8_percent_encode(&raw, PATH_SEGMENT).to_string();
        context.add_uri_variable(&binding.name, encoded);
        Ok(())
    }
}

/// Adds query or form parameters. Null arguments are omitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestParamResolver;

impl ArgumentResolver for RequestParamResolver {
    fn resolve(
        &self,
        binding: &ParameterBinding,
        value: ArgValue,
        context: &mut RequestContext,
    ) -> Result<(), ProxyError> {
        match value {
            ArgValue::Text(text) => context.add_request_param(&binding.name, text),
            ArgValue::Values(map) => {
                for (key, value) in map.pairs() {
                    context.add_request_param(key, value);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Appends header values; repeated names accumulate.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderResolver;

impl ArgumentResolver for HeaderResolver {
    fn resolve(
        &self,
        binding: &ParameterBinding,
        value: ArgValue,
        context: &mut RequestContext,
    ) -> Result<(), ProxyError> {
        match value {
            ArgValue::Text(text) => context.add_header(&binding.name, text),
            ArgValue::Values(map) => {
                for (name, value) in map.pairs() {
                    context.add_header(name, value);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BodyResolver;

impl ArgumentResolver for BodyResolver {
    fn resolve(
        &self,
        binding: &ParameterBinding,
        value: ArgValue,
        context: &mut RequestContext,
    ) -> Result<(), ProxyError> {
        let body = match value {
            ArgValue::Null => return Ok(()),
            ArgValue::Text(text) => BodyValue::Text(text),
            ArgValue::Json(json) => BodyValue::Json(json),
            ArgValue::Values(map) => BodyValue::Form(map),
            ArgValue::File(file) => BodyValue::Bytes {
                bytes: file.bytes,
                content_type: file.content_type,
            },
            ArgValue::Uri(_) => {
                return Err(context.binding_error(binding, "a URI cannot be sent as a body"))
            }
        };
        context
            .set_body(body)
            .map_err(|reason| context.binding_error(binding, reason))
    }
}

/// Adds one multipart part named after the parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestPartResolver;

impl ArgumentResolver for RequestPartResolver {
    fn resolve(
        &self,
        binding: &ParameterBinding,
        value: ArgValue,
        context: &mut RequestContext,
    ) -> Result<(), ProxyError> {
        let part = match value {
            ArgValue::Null => return Ok(()),
            ArgValue::Text(text) => Part::text(&binding.name, text),
            ArgValue::File(file) => Part {
                name: binding.name.clone(),
                filename: file.original_filename,
                content_type: file
                    .content_type
                    .unwrap_or_else(|| TEXT_PLAIN_UTF8.to_string()),
                bytes: file.bytes,
            },
            ArgValue::Json(serde_json::Value::String(text)) => Part::text(&binding.name, text),
            ArgValue::Json(json) => Part {
                name: binding.name.clone(),
                filename: None,
                content_type: APPLICATION_JSON.to_string(),
                bytes: serde_json::to_vec(&json)
                    .map_err(|e| ProxyError::SerializationError(e.to_string()))?,
            },
            ArgValue::Values(map) => {
                for (_, value) in map.pairs() {
                    context
                        .add_part(Part::text(&binding.name, value))
                        .map_err(|reason| context.binding_error(binding, reason))?;
                }
                return Ok(());
            }
            ArgValue::Uri(uri) => Part::text(&binding.name, uri),
        };
        context
            .add_part(part)
            .map_err(|reason| context.binding_error(binding, reason))
    }
}

/// Replaces the base URL and template for one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct UriResolver;

impl ArgumentResolver for UriResolver {
    fn resolve(
        &self,
        _binding: &ParameterBinding,
        value: ArgValue,
        context: &mut RequestContext,
    ) -> Result<(), ProxyError> {
        if let ArgValue::Uri(uri) = value {
            context.set_uri(uri);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoredResolver;

impl ArgumentResolver for IgnoredResolver {
    fn resolve(
        &self,
        _binding: &ParameterBinding,
        _value: ArgValue,
        _context: &mut RequestContext,
    ) -> Result<(), ProxyError> {
        Ok(())
    }
}
