//! Proxies grouped by base URL.
//!
//! A registry holds one proxy per service per group. Every group has its own
//! factory, so services in the same group share an adapter and base URL.
//! Groups can be declared in code or loaded from TOML:
//!
//! ```toml
//! [[groups]]
//! name = "greetings"
//! base_url = "http://localhost:8080"
//! services = ["GreetingService"]
//! timeout_ms = 2000
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::adapter::HttpExchangeAdapter;
use crate::error::{ConfigError, LookupError};
use crate::proxy::{HttpServiceProxy, HttpServiceProxyFactory, HttpServiceProxyFactoryBuilder};
use crate::template::ServiceDefinition;

/// Builds the adapter a group's proxies exchange through.
pub type AdapterFactory =
    Arc<dyn Fn(&HttpServiceGroup) -> Arc<dyn HttpExchangeAdapter> + Send + Sync>;

type FactoryConfigurer = Box<
    dyn Fn(&HttpServiceGroup, HttpServiceProxyFactoryBuilder) -> HttpServiceProxyFactoryBuilder,
>;

/// A named base URL shared by a set of services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpServiceGroup {
    name: String,
    base_url: String,
    timeout: Option<Duration>,
}

impl HttpServiceGroup {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: normalize(&base_url.into()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

fn normalize(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

struct GroupEntry {
    group: HttpServiceGroup,
    clients: Vec<HttpServiceProxy>,
}

/// Proxies for every configured group.
pub struct HttpServiceProxyRegistry {
    groups: Vec<GroupEntry>,
}

impl std::fmt::Debug for HttpServiceProxyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.groups.iter().map(|g| &g.group))
            .finish()
    }
}

struct PendingGroup {
    group: HttpServiceGroup,
    services: Vec<ServiceDefinition>,
}

#[derive(Default)]
pub struct HttpServiceProxyRegistryBuilder {
    groups: Vec<PendingGroup>,
    orphans: Vec<String>,
    adapter_factory: Option<AdapterFactory>,
    configurer: Option<FactoryConfigurer>,
}

impl HttpServiceProxyRegistryBuilder {
    /// Start a group. Services added after this call belong to it.
    pub fn group(self, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.add_group(HttpServiceGroup::new(name, base_url))
    }

    pub fn add_group(mut self, group: HttpServiceGroup) -> Self {
        self.groups.push(PendingGroup {
            group,
            services: Vec::new(),
        });
        self
    }

    /// Register `definition` in the most recently started group.
    pub fn service(mut self, definition: ServiceDefinition) -> Self {
        match self.groups.last_mut() {
            Some(pending) => pending.services.push(definition),
            None => self.orphans.push(definition.name().to_string()),
        }
        self
    }

    pub fn adapter_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&HttpServiceGroup) -> Arc<dyn HttpExchangeAdapter> + Send + Sync + 'static,
    {
        self.adapter_factory = Some(Arc::new(factory));
        self
    }

    /// Adjust every group's factory before it is built, e.g. to add
    /// converters.
    pub fn configure_factory<F>(mut self, configurer: F) -> Self
    where
        F: Fn(&HttpServiceGroup, HttpServiceProxyFactoryBuilder) -> HttpServiceProxyFactoryBuilder
            + 'static,
    {
        self.configurer = Some(Box::new(configurer));
        self
    }

    pub fn build(self) -> Result<HttpServiceProxyRegistry, ConfigError> {
        if let Some(service) = self.orphans.first() {
            return Err(ConfigError::Registry(format!(
                "service `{service}` was added before any group"
            )));
        }
        let adapter_factory = match self.adapter_factory {
            Some(factory) => factory,
            None => default_adapter_factory()?,
        };

        let mut names = HashSet::new();
        let mut groups = Vec::with_capacity(self.groups.len());
        for pending in self.groups {
            let group = pending.group;
            if !names.insert(group.name.clone()) {
                return Err(ConfigError::Registry(format!(
                    "group `{}` is declared twice",
                    group.name
                )));
            }

            let mut builder = HttpServiceProxyFactory::builder()
                .shared_exchange_adapter(adapter_factory(&group))
                .base_url(group.base_url.clone());
            if let Some(configurer) = &self.configurer {
                builder = configurer(&group, builder);
            }
            let factory = builder.build()?;

            let mut services = HashSet::new();
            let mut clients = Vec::with_capacity(pending.services.len());
            for definition in &pending.services {
                if !services.insert(definition.name()) {
                    return Err(ConfigError::DuplicateService {
                        group: group.name.clone(),
                        service: definition.name().to_string(),
                    });
                }
                clients.push(factory.create_client(definition)?);
            }
            debug!(
                group = %group.name,
                base_url = %group.base_url,
                services = clients.len(),
                "registered service group"
            );
            groups.push(GroupEntry { group, clients });
        }
        Ok(HttpServiceProxyRegistry { groups })
    }
}

#[cfg(feature = "ureq")]
fn default_adapter_factory() -> Result<AdapterFactory, ConfigError> {
    use crate::adapter::UreqAdapter;

    Ok(Arc::new(|group: &HttpServiceGroup| -> Arc<dyn HttpExchangeAdapter> {
        match group.timeout() {
            Some(timeout) => Arc::new(UreqAdapter::with_timeout(timeout)),
            None => Arc::new(UreqAdapter::new()),
        }
    }))
}

#[cfg(not(feature = "ureq"))]
fn default_adapter_factory() -> Result<AdapterFactory, ConfigError> {
    Err(ConfigError::MissingExchangeAdapter)
}

impl HttpServiceProxyRegistry {
    pub fn builder() -> HttpServiceProxyRegistryBuilder {
        HttpServiceProxyRegistryBuilder::default()
    }

    /// Build a registry from `config`, taking service definitions by name
    /// from `catalog`. Without an adapter factory the `ureq` adapter is used.
    pub fn from_config(
        config: &RegistryConfig,
        catalog: &[ServiceDefinition],
        adapter_factory: Option<AdapterFactory>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        if let Some(factory) = adapter_factory {
            builder.adapter_factory = Some(factory);
        }
        for group_config in &config.groups {
            let mut group = HttpServiceGroup::new(&group_config.name, &group_config.base_url);
            if let Some(ms) = group_config.timeout_ms {
                group = group.with_timeout(Duration::from_millis(ms));
            }
            builder = builder.add_group(group);
            for service in &group_config.services {
                let definition = catalog
                    .iter()
                    .find(|d| d.name() == service)
                    .ok_or_else(|| ConfigError::UnknownService(service.clone()))?;
                builder = builder.service(definition.clone());
            }
        }
        let registry = builder.build()?;
        info!(groups = registry.groups.len(), "loaded service registry");
        Ok(registry)
    }

    /// The only client for `service` across all groups.
    pub fn client(&self, service: &str) -> Result<&HttpServiceProxy, LookupError> {
        let mut found = self.groups.iter().filter_map(|entry| {
            entry
                .clients
                .iter()
                .find(|c| c.service() == service)
                .map(|c| (entry, c))
        });
        let Some((_, client)) = found.next() else {
            return Err(LookupError::NoClient(service.to_string()));
        };
        let rest: Vec<_> = found.collect();
        if rest.is_empty() {
            return Ok(client);
        }
        Err(LookupError::AmbiguousClient {
            service: service.to_string(),
            groups: self
                .groups
                .iter()
                .filter(|e| e.clients.iter().any(|c| c.service() == service))
                .map(|e| e.group.name.clone())
                .collect(),
        })
    }

    /// The client for `service` in the group(s) at `base_url`.
    pub fn client_for_base_url(
        &self,
        base_url: &str,
        service: &str,
    ) -> Result<&HttpServiceProxy, LookupError> {
        self.clients_for_base_url(base_url)?
            .into_iter()
            .find(|c| c.service() == service)
            .ok_or_else(|| LookupError::NoClient(service.to_string()))
    }

    /// Distinct base URLs in declaration order.
    pub fn base_urls(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.groups
            .iter()
            .map(|e| e.group.base_url.as_str())
            .filter(|url| seen.insert(*url))
            .collect()
    }

    /// Every client of every group at `base_url`.
    pub fn clients_for_base_url(
        &self,
        base_url: &str,
    ) -> Result<Vec<&HttpServiceProxy>, LookupError> {
        let base_url = normalize(base_url);
        let clients: Vec<_> = self
            .groups
            .iter()
            .filter(|e| e.group.base_url == base_url)
            .flat_map(|e| e.clients.iter())
            .collect();
        if clients.is_empty() && !self.groups.iter().any(|e| e.group.base_url == base_url) {
            return Err(LookupError::UnknownBaseUrl(base_url));
        }
        Ok(clients)
    }

    pub fn group(&self, name: &str) -> Option<&HttpServiceGroup> {
        self.groups
            .iter()
            .map(|e| &e.group)
            .find(|g| g.name == name)
    }

    pub fn groups(&self) -> impl Iterator<Item = &HttpServiceGroup> {
        self.groups.iter().map(|e| &e.group)
    }
}

/// Registry groups as read from TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RegistryConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Registry(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Registry(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }
}
