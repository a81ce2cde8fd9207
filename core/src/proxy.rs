//! Proxy factory and the per-service method table.
//!
//! # Design
//! `HttpServiceProxyFactory::create_client` validates a `ServiceDefinition`
//! once, builds the template and resolver chain of every method, and stores
//! them in an immutable table indexed by method name. `HttpServiceProxy` is a
//! cheap handle to that table plus the shared adapter, converters and base
//! URL; it is `Send + Sync` and can be cloned across threads.
//!
//! Each invocation is split in three steps, mirroring a build/exchange/parse
//! cycle: `build_request` binds arguments into an `HttpRequest`, the adapter
//! performs the exchange, and `adapt_response` turns the `HttpResponse` into
//! the declared return shape. `invoke` runs all three. The first and last
//! steps are public so callers can drive their own I/O.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::adapter::HttpExchangeAdapter;
use crate::codec::{Converters, MessageConverter};
use crate::error::{ConfigError, ProxyError};
use crate::http::{HttpRequest, HttpResponse};
use crate::multipart::{BoundaryGenerator, RandomBoundary};
use crate::request::{RequestContext, RequestSettings};
use crate::resolver::{self, ArgumentResolver};
use crate::response::{self, ReturnValue};
use crate::template::{ServiceDefinition, ServiceMethodTemplate};
use crate::value::ArgValue;

/// Creates proxies that share one adapter, base URL and converter set.
#[derive(Clone)]
pub struct HttpServiceProxyFactory {
    adapter: Arc<dyn HttpExchangeAdapter>,
    base_url: Option<String>,
    converters: Converters,
    boundaries: Arc<dyn BoundaryGenerator>,
}

/// Builder for `HttpServiceProxyFactory`.
pub struct HttpServiceProxyFactoryBuilder {
    adapter: Option<Arc<dyn HttpExchangeAdapter>>,
    base_url: Option<String>,
    converters: Converters,
    boundaries: Arc<dyn BoundaryGenerator>,
}

impl Default for HttpServiceProxyFactoryBuilder {
    fn default() -> Self {
        Self {
            adapter: None,
            base_url: None,
            converters: Converters::default(),
            boundaries: Arc::new(RandomBoundary),
        }
    }
}

impl HttpServiceProxyFactoryBuilder {
    pub fn exchange_adapter(self, adapter: impl HttpExchangeAdapter + 'static) -> Self {
        self.shared_exchange_adapter(Arc::new(adapter))
    }

    pub fn shared_exchange_adapter(mut self, adapter: Arc<dyn HttpExchangeAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Absolute URL every method template is resolved against.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Register a converter ahead of the defaults.
    pub fn converter(mut self, converter: Arc<dyn MessageConverter>) -> Self {
        self.converters = self.converters.with(converter);
        self
    }

    /// Replace the whole converter set.
    pub fn converters(mut self, converters: Converters) -> Self {
        self.converters = converters;
        self
    }

    pub fn boundary_generator(mut self, boundaries: impl BoundaryGenerator + 'static) -> Self {
        self.boundaries = Arc::new(boundaries);
        self
    }

    pub fn build(self) -> Result<HttpServiceProxyFactory, ConfigError> {
        let adapter = self.adapter.ok_or(ConfigError::MissingExchangeAdapter)?;
        let base_url = match self.base_url {
            Some(base) if base.is_empty() => None,
            Some(base) => {
                url::Url::parse(&base).map_err(|_| ConfigError::InvalidBaseUrl(base.clone()))?;
                Some(base.trim_end_matches('/').to_string())
            }
            None => None,
        };
        Ok(HttpServiceProxyFactory {
            adapter,
            base_url,
            converters: self.converters,
            boundaries: self.boundaries,
        })
    }
}

impl HttpServiceProxyFactory {
    pub fn builder() -> HttpServiceProxyFactoryBuilder {
        HttpServiceProxyFactoryBuilder::default()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Validate `definition` and build its proxy.
    pub fn create_client(
        &self,
        definition: &ServiceDefinition,
    ) -> Result<HttpServiceProxy, ConfigError> {
        let templates = definition.templates()?;
        let mut index = HashMap::with_capacity(templates.len());
        let mut methods = Vec::with_capacity(templates.len());
        for (position, template) in templates.into_iter().enumerate() {
            let resolvers = template.bindings.iter().map(resolver::resolver_for).collect();
            index.insert(template.name.clone(), position);
            methods.push(ServiceMethod {
                template,
                resolvers,
            });
        }
        debug!(
            service = definition.name(),
            methods = methods.len(),
            base_url = self.base_url.as_deref().unwrap_or(""),
            "created http service proxy"
        );
        Ok(HttpServiceProxy {
            inner: Arc::new(ProxyInner {
                service: definition.name().to_string(),
                index,
                methods,
                factory: self.clone(),
            }),
        })
    }
}

struct ServiceMethod {
    template: ServiceMethodTemplate,
    resolvers: Vec<Arc<dyn ArgumentResolver>>,
}

struct ProxyInner {
    service: String,
    index: HashMap<String, usize>,
    methods: Vec<ServiceMethod>,
    factory: HttpServiceProxyFactory,
}

/// Runtime implementation of one declared service.
#[derive(Clone)]
pub struct HttpServiceProxy {
    inner: Arc<ProxyInner>,
}

impl std::fmt::Debug for HttpServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServiceProxy")
            .field("service", &self.inner.service)
            .field("methods", &self.inner.methods.len())
            .finish()
    }
}

impl HttpServiceProxy {
    pub fn service(&self) -> &str {
        &self.inner.service
    }

    /// Declared method names in declaration order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.inner.methods.iter().map(|m| m.template.name.as_str())
    }

    pub fn template(&self, method: &str) -> Option<&ServiceMethodTemplate> {
        self.method(method).ok().map(|m| &m.template)
    }

    fn method(&self, name: &str) -> Result<&ServiceMethod, ProxyError> {
        self.inner
            .index
            .get(name)
            .map(|&i| &self.inner.methods[i])
            .ok_or_else(|| ProxyError::UnknownMethod(name.to_string()))
    }

    /// Call `method` with `args` and adapt the response into `R`.
    pub fn invoke<R: ReturnValue>(
        &self,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<R, ProxyError> {
        let service_method = self.method(method)?;
        check_return_kind::<R>(&service_method.template)?;
        let request = self.bind(service_method, args)?;

        debug!(
            service = %self.inner.service,
            method,
            http_method = %request.method,
            uri = %request.uri,
            "sending request"
        );
        let response = self.inner.factory.adapter.exchange(request)?;
        debug!(
            service = %self.inner.service,
            method,
            status = response.status,
            "received response"
        );

        self.adapt(service_method, response)
    }

    /// Bind `args` into the request `method` would send, without sending it.
    pub fn build_request(
        &self,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<HttpRequest, ProxyError> {
        self.bind(self.method(method)?, args)
    }

    /// Adapt a response obtained for `method` into `R`.
    pub fn adapt_response<R: ReturnValue>(
        &self,
        method: &str,
        response: HttpResponse,
    ) -> Result<R, ProxyError> {
        let service_method = self.method(method)?;
        check_return_kind::<R>(&service_method.template)?;
        self.adapt(service_method, response)
    }

    fn bind(
        &self,
        service_method: &ServiceMethod,
        args: Vec<ArgValue>,
    ) -> Result<HttpRequest, ProxyError> {
        let template = &service_method.template;
        if args.len() != template.bindings.len() {
            return Err(ProxyError::binding(
                &template.name,
                "*",
                format!(
                    "expected {} arguments, got {}",
                    template.bindings.len(),
                    args.len()
                ),
            ));
        }

        let mut context = RequestContext::new(&template.name);
        for ((binding, resolver), value) in template
            .bindings
            .iter()
            .zip(&service_method.resolvers)
            .zip(args)
        {
            resolver::check_argument(&template.name, binding, &value)?;
            resolver.resolve(binding, value, &mut context)?;
        }

        let factory = &self.inner.factory;
        let settings = RequestSettings {
            base_url: factory.base_url.as_deref(),
            converters: &factory.converters,
            boundaries: factory.boundaries.as_ref(),
        };
        context.into_request(template, &settings)
    }

    fn adapt<R: ReturnValue>(
        &self,
        service_method: &ServiceMethod,
        response: HttpResponse,
    ) -> Result<R, ProxyError> {
        let template = &service_method.template;
        let converters = &self.inner.factory.converters;
        let result = response::adapt::<R>(template.return_kind, response, converters);
        if let Err(e) = &result {
            if e.is_status() {
                warn!(
                    service = %self.inner.service,
                    method = %template.name,
                    error = %e,
                    "request failed"
                );
            }
        }
        result
    }
}

fn check_return_kind<R: ReturnValue>(template: &ServiceMethodTemplate) -> Result<(), ProxyError> {
    if R::KIND == template.return_kind {
        Ok(())
    } else {
        Err(ProxyError::ReturnTypeMismatch {
            method: template.name.clone(),
            declared: template.return_kind,
            requested: R::KIND,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::{TransportError, TransportErrorKind};
    use crate::multipart::FixedBoundary;
    use crate::response::ResponseEntity;
    use crate::template::{Exchange, Param};
    use crate::value::{MultiValueMap, MultipartFile};

    /// Records every request and answers with a canned response.
    struct Recorder {
        requests: Mutex<Vec<HttpRequest>>,
        response: HttpResponse,
    }

    impl Recorder {
        fn new(response: HttpResponse) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                response,
            })
        }

        fn last(&self) -> HttpRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }

        fn count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl HttpExchangeAdapter for Recorder {
        fn exchange(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    fn hello() -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: b"Hello Spring!".to_vec(),
        }
    }

    fn test_service() -> ServiceDefinition {
        ServiceDefinition::new("TestService")
            .method::<String>("get_request", Exchange::get("/test"))
            .method::<ResponseEntity<String>>(
                "get_request_with_path_variable",
                Exchange::get("/test/{id}").param(Param::path_variable("id")),
            )
            .method::<Option<String>>(
                "get_request_with_dynamic_uri",
                Exchange::get("/test/{id}")
                    .param(Param::uri("uri"))
                    .param(Param::path_variable("id")),
            )
            .method::<()>(
                "post_request_with_header",
                Exchange::post("/test")
                    .param(Param::header("testHeader").named("testHeaderName"))
                    .param(Param::body("requestBody")),
            )
            .method::<()>(
                "post_form",
                Exchange::post("")
                    .content_type("application/x-www-form-urlencoded")
                    .param(Param::request_params("params")),
            )
            .method::<()>(
                "post_multipart",
                Exchange::post("")
                    .param(Param::file("file"))
                    .param(Param::part("anotherPart")),
            )
    }

    fn proxy(recorder: &Arc<Recorder>) -> HttpServiceProxy {
        HttpServiceProxyFactory::builder()
            .shared_exchange_adapter(recorder.clone())
            .base_url("http://localhost:8080/")
            .boundary_generator(FixedBoundary("boundary0".to_string()))
            .build()
            .unwrap()
            .create_client(&test_service())
            .unwrap()
    }

    #[test]
    fn get_request_returns_body() {
        let recorder = Recorder::new(hello());
        let body: String = proxy(&recorder).invoke("get_request", vec![]).unwrap();
        assert_eq!(body, "Hello Spring!");
        let request = recorder.last();
        assert_eq!(request.method, crate::http::HttpMethod::Get);
        assert_eq!(request.uri, "http://localhost:8080/test");
    }

    #[test]
    fn path_variable_is_substituted() {
        let recorder = Recorder::new(hello());
        let entity: ResponseEntity<String> = proxy(&recorder)
            .invoke("get_request_with_path_variable", vec!["456".into()])
            .unwrap();
        assert_eq!(entity.status(), 200);
        assert_eq!(entity.body().map(String::as_str), Some("Hello Spring!"));
        assert_eq!(recorder.last().uri, "http://localhost:8080/test/456");
    }

    #[test]
    fn dynamic_uri_replaces_target() {
        let recorder = Recorder::new(hello());
        let body: Option<String> = proxy(&recorder)
            .invoke(
                "get_request_with_dynamic_uri",
                vec![ArgValue::uri("http://localhost:9090/greeting/123"), "456".into()],
            )
            .unwrap();
        assert_eq!(body.as_deref(), Some("Hello Spring!"));
        assert_eq!(recorder.last().uri, "http://localhost:9090/greeting/123");
    }

    #[test]
    fn null_dynamic_uri_keeps_template() {
        let recorder = Recorder::new(hello());
        let _: Option<String> = proxy(&recorder)
            .invoke("get_request_with_dynamic_uri", vec![ArgValue::Null, "456".into()])
            .unwrap();
        assert_eq!(recorder.last().uri, "http://localhost:8080/test/456");
    }

    #[test]
    fn header_and_text_body_are_sent() {
        let recorder = Recorder::new(hello());
        proxy(&recorder)
            .invoke::<()>(
                "post_request_with_header",
                vec!["testHeader".into(), "testBody".into()],
            )
            .unwrap();
        let request = recorder.last();
        assert_eq!(request.header("testHeaderName"), Some("testHeader"));
        assert_eq!(request.header("Content-Type"), Some("text/plain;charset=UTF-8"));
        assert_eq!(request.body.as_deref(), Some(&b"testBody"[..]));
    }

    #[test]
    fn form_params_are_encoded_into_body() {
        let recorder = Recorder::new(hello());
        let params = MultiValueMap::new()
            .with("param1", "value 1")
            .with("param2", "value 2");
        proxy(&recorder)
            .invoke::<()>("post_form", vec![params.into()])
            .unwrap();
        let request = recorder.last();
        assert_eq!(
            request.header("Content-Type"),
            Some("application/x-www-form-urlencoded;charset=UTF-8")
        );
        assert_eq!(
            request.body.as_deref(),
            Some(&b"param1=value+1&param2=value+2"[..])
        );
    }

    #[test]
    fn multipart_parts_are_encoded_in_order() {
        let recorder = Recorder::new(hello());
        let file = MultipartFile::new("testFileName", b"test".to_vec())
            .original_filename("originalTestFileName")
            .content_type("application/json");
        proxy(&recorder)
            .invoke::<()>("post_multipart", vec![file.into(), "test2".into()])
            .unwrap();
        let request = recorder.last();
        assert_eq!(
            request.header("Content-Type"),
            Some("multipart/form-data;boundary=boundary0")
        );
        let body = String::from_utf8(request.body.unwrap()).unwrap();
        let expected = [
            "Content-Disposition: form-data; name=\"file\"; filename=\"originalTestFileName\"",
            "Content-Type: application/json",
            "Content-Length: 4",
            "test",
            "Content-Disposition: form-data; name=\"anotherPart\"",
            "Content-Type: text/plain;charset=UTF-8",
            "Content-Length: 5",
            "test2",
        ];
        let mut rest = body.as_str();
        for needle in expected {
            let at = rest.find(needle).unwrap_or_else(|| panic!("missing `{needle}` in {body}"));
            rest = &rest[at + needle.len()..];
        }
    }

    #[test]
    fn missing_path_variable_fails_before_io() {
        let recorder = Recorder::new(hello());
        let err = proxy(&recorder)
            .invoke::<ResponseEntity<String>>(
                "get_request_with_path_variable",
                vec![ArgValue::Null],
            )
            .unwrap_err();
        assert!(matches!(err, ProxyError::Binding { .. }));
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn wrong_arity_fails_before_io() {
        let recorder = Recorder::new(hello());
        let err = proxy(&recorder)
            .invoke::<String>("get_request", vec!["extra".into()])
            .unwrap_err();
        assert!(matches!(err, ProxyError::Binding { .. }));
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn wrong_return_type_fails_before_io() {
        let recorder = Recorder::new(hello());
        let err = proxy(&recorder)
            .invoke::<Option<String>>("get_request", vec![])
            .unwrap_err();
        assert!(matches!(err, ProxyError::ReturnTypeMismatch { .. }));
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn unknown_method_is_reported() {
        let recorder = Recorder::new(hello());
        let err = proxy(&recorder).invoke::<()>("nope", vec![]).unwrap_err();
        assert!(matches!(err, ProxyError::UnknownMethod(ref m) if m == "nope"));
    }

    #[test]
    fn body_with_parts_never_creates_a_proxy() {
        let definition = ServiceDefinition::new("Broken").method::<()>(
            "upload",
            Exchange::post("/upload")
                .param(Param::body("payload"))
                .param(Param::file("file")),
        );
        let factory = HttpServiceProxyFactory::builder()
            .shared_exchange_adapter(Recorder::new(hello()))
            .build()
            .unwrap();
        let err = factory.create_client(&definition).unwrap_err();
        assert!(matches!(err, ConfigError::BodyWithParts { .. }));
    }

    #[test]
    fn factory_requires_an_adapter() {
        let err = HttpServiceProxyFactory::builder().build().err().unwrap();
        assert_eq!(err, ConfigError::MissingExchangeAdapter);
    }

    #[test]
    fn factory_rejects_relative_base_url() {
        let err = HttpServiceProxyFactory::builder()
            .shared_exchange_adapter(Recorder::new(hello()))
            .base_url("/relative")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidBaseUrl(_)));
    }

    #[test]
    fn transport_errors_pass_through() {
        let factory = HttpServiceProxyFactory::builder()
            .exchange_adapter(
                |_request: HttpRequest| -> Result<HttpResponse, TransportError> {
                    Err(TransportError::new(TransportErrorKind::Timeout, "read timed out"))
                },
            )
            .build()
            .unwrap();
        let proxy = factory.create_client(&test_service()).unwrap();
        let err = proxy.invoke::<String>("get_request", vec![]).unwrap_err();
        match err {
            ProxyError::Transport(e) => assert_eq!(e.kind, TransportErrorKind::Timeout),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn two_proxies_build_identical_requests() {
        let recorder = Recorder::new(hello());
        let first = proxy(&recorder);
        let second = proxy(&recorder);
        let file = || {
            MultipartFile::new("f", b"data".to_vec())
                .original_filename("f.bin")
                .content_type("application/octet-stream")
        };
        for (method, args) in [
            ("get_request_with_path_variable", vec![ArgValue::from("a b")]),
            (
                "post_form",
                vec![MultiValueMap::new().with("k", "v 1").with("k", "v 2").into()],
            ),
            ("post_multipart", vec![file().into(), "x".into()]),
        ] {
            let a = first.build_request(method, args.clone()).unwrap();
            let b = second.build_request(method, args).unwrap();
            assert_eq!(a, b, "{method}");
        }
    }

    #[test]
    fn concurrent_invocations_are_independent() {
        let recorder = Recorder::new(hello());
        let proxy = proxy(&recorder);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let proxy = proxy.clone();
                std::thread::spawn(move || {
                    proxy
                        .invoke::<ResponseEntity<String>>(
                            "get_request_with_path_variable",
                            vec![i.into()],
                        )
                        .unwrap()
                        .status()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 200);
        }
        let mut uris: Vec<String> = recorder
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.uri.clone())
            .collect();
        uris.sort();
        let mut expected: Vec<String> = (0..8)
            .map(|i| format!("http://localhost:8080/test/{i}"))
            .collect();
        expected.sort();
        assert_eq!(uris, expected);
    }

    #[test]
    fn every_placeholder_is_substituted() {
        let definition = ServiceDefinition::new("Nested").method::<String>(
            "item",
            Exchange::get("/orgs/{org}/repos/{repo}/items/{item}")
                .param(Param::path_variable("org"))
                .param(Param::path_variable("repo"))
                .param(Param::path_variable("item")),
        );
        let recorder = Recorder::new(hello());
        let proxy = HttpServiceProxyFactory::builder()
            .shared_exchange_adapter(recorder.clone())
            .base_url("http://localhost:8080")
            .build()
            .unwrap()
            .create_client(&definition)
            .unwrap();
        let request = proxy
            .build_request("item", vec!["acme".into(), "web app".into(), 7.into()])
            .unwrap();
        assert_eq!(request.uri, "http://localhost:8080/orgs/acme/repos/web%20app/items/7");
        assert!(!request.uri.contains('{'));
    }

    #[test]
    fn custom_resolver_contributes_headers() {
        struct TraceResolver;
        impl ArgumentResolver for TraceResolver {
            fn resolve(
                &self,
                _binding: &crate::template::ParameterBinding,
                value: ArgValue,
                context: &mut RequestContext,
            ) -> Result<(), ProxyError> {
                if let ArgValue::Text(id) = value {
                    context.add_header("X-Trace-Id", format!("trace-{id}"));
                }
                Ok(())
            }
        }

        let definition = ServiceDefinition::new("Traced").method::<String>(
            "ping",
            Exchange::get("/ping").param(Param::custom("trace", Arc::new(TraceResolver))),
        );
        let recorder = Recorder::new(hello());
        let proxy = HttpServiceProxyFactory::builder()
            .shared_exchange_adapter(recorder.clone())
            .base_url("http://localhost:8080")
            .build()
            .unwrap()
            .create_client(&definition)
            .unwrap();
        let _: String = proxy.invoke("ping", vec!["42".into()]).unwrap();
        assert_eq!(recorder.last().header("X-Trace-Id"), Some("trace-42"));
    }

    #[test]
    fn split_build_and_adapt_match_invoke() {
        let recorder = Recorder::new(hello());
        let proxy = proxy(&recorder);
        let request = proxy.build_request("get_request", vec![]).unwrap();
        assert_eq!(request.uri, "http://localhost:8080/test");
        let body: String = proxy.adapt_response("get_request", hello()).unwrap();
        assert_eq!(body, "Hello Spring!");
        assert_eq!(recorder.count(), 0);
    }
}
