//! Declarative HTTP service clients.
//!
//! # Overview
//! A service is declared once as a `ServiceDefinition`: a list of named
//! methods, each with an `Exchange` (verb, URL template, content type, accept
//! types, static headers) and the role of each of its parameters. The
//! `HttpServiceProxyFactory` validates the declaration and produces an
//! `HttpServiceProxy` whose `invoke` binds arguments into an `HttpRequest`,
//! sends it through an `HttpExchangeAdapter`, and adapts the `HttpResponse`
//! into the declared return type.
//!
//! ```ignore
//! let greetings = ServiceDefinition::new("GreetingService")
//!     .method::<String>("greet", Exchange::get("/greeting/{name}")
//!         .param(Param::path_variable("name")));
//!
//! let proxy = HttpServiceProxyFactory::builder()
//!     .exchange_adapter(UreqAdapter::new())
//!     .base_url("http://localhost:8080")
//!     .build()?
//!     .create_client(&greetings)?;
//!
//! let text: String = proxy.invoke("greet", vec!["Spring".into()])?;
//! ```
//!
//! # Design
//! - Declarations are checked when the proxy is created, so a bad template
//!   or conflicting parameter roles never reach the network.
//! - The proxy owns no I/O. `build_request` and `adapt_response` expose the
//!   two pure halves of an invocation; the adapter does the round-trip.
//! - Proxies are immutable after creation and can be shared across threads.

pub mod adapter;
pub mod codec;
pub mod error;
pub mod http;
pub mod multipart;
pub mod proxy;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod response;
pub mod template;
pub mod value;

pub use adapter::HttpExchangeAdapter;
#[cfg(feature = "ureq")]
pub use adapter::UreqAdapter;
pub use codec::{Converters, MessageConverter};
pub use error::{ConfigError, LookupError, ProxyError, TransportError, TransportErrorKind};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use multipart::{BoundaryGenerator, FixedBoundary, RandomBoundary};
pub use proxy::{HttpServiceProxy, HttpServiceProxyFactory};
pub use registry::{HttpServiceGroup, HttpServiceProxyRegistry, RegistryConfig};
pub use request::RequestContext;
pub use resolver::ArgumentResolver;
pub use response::{Body, ResponseEntity, ReturnKind, ReturnValue};
pub use template::{Exchange, Param, ServiceDefinition};
pub use value::{ArgValue, MultiValueMap, MultipartFile};
