use crate::application::health::HealthTracker;
use crate::application::invoker::ResilientClient;
use crate::config::GatewayConfig;
use crate::domain::ports::ClientConstructor;
use crate::domain::provider::ProviderId;
use crate::error::{PaymentError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub configured: bool,
    pub registered: bool,
    pub available: bool,
    pub cached: bool,
}

/// Maps provider identities to lazily constructed, cached clients.
///
/// Clients live until [`ProviderRegistry::close_all`]. Construction happens
/// under the cache lock, so each provider is built at most once.
pub struct ProviderRegistry {
    config: Arc<GatewayConfig>,
    constructors: Vec<(ProviderId, ClientConstructor)>,
    clients: Mutex<HashMap<ProviderId, Arc<ResilientClient>>>,
    health: Arc<HealthTracker>,
}

impl ProviderRegistry {
    pub fn new(config: Arc<GatewayConfig>, health: Arc<HealthTracker>) -> Self {
        Self {
            config,
            constructors: Vec::new(),
            clients: Mutex::new(HashMap::new()),
            health,
        }
    }

    /// Registers the constructor of a provider, replacing any earlier one
    /// while keeping its position in registry order.
    pub fn register(&mut self, provider: ProviderId, constructor: ClientConstructor) {
        match self.constructors.iter_mut().find(|(id, _)| *id == provider) {
            Some(entry) => entry.1 = constructor,
            None => self.constructors.push((provider, constructor)),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn is_registered(&self, provider: ProviderId) -> bool {
        self.constructors.iter().any(|(id, _)| *id == provider)
    }

    pub fn is_available(&self, provider: ProviderId) -> bool {
        self.config.is_configured(provider) && self.is_registered(provider)
    }

    /// Providers both configured and registered, in registration order.
    pub fn available_providers(&self) -> Vec<ProviderId> {
        self.constructors
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| self.config.is_configured(*id))
            .collect()
    }

    pub fn configured_providers(&self) -> Vec<ProviderId> {
        self.config.configured_providers()
    }

    pub async fn cached(&self, provider: ProviderId) -> Option<Arc<ResilientClient>> {
        self.clients.lock().await.get(&provider).cloned()
    }

    /// Returns the cached client of `provider`, constructing it on first use.
    pub async fn create(&self, provider: ProviderId) -> Result<Arc<ResilientClient>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&provider) {
            return Ok(Arc::clone(client));
        }

        let config = self.config.provider(provider).ok_or_else(|| {
            PaymentError::ConfigurationError(format!("{provider} is not configured"))
        })?;
        config.validate(provider)?;
        let constructor = self
            .constructors
            .iter()
            .find(|(id, _)| *id == provider)
            .map(|(_, constructor)| constructor)
            .ok_or_else(|| {
                PaymentError::ConfigurationError(format!("no client registered for {provider}"))
            })?;

        let inner = constructor(provider, config)?;
        let client = Arc::new(ResilientClient::new(
            provider,
            inner,
            config,
            Arc::clone(&self.health),
        ));
        clients.insert(provider, Arc::clone(&client));
        info!(provider = %provider, endpoint = %config.endpoint_base, "provider client created");
        Ok(client)
    }

    pub async fn status(&self) -> BTreeMap<ProviderId, ProviderStatus> {
        let clients = self.clients.lock().await;
        ProviderId::ALL
            .into_iter()
            .map(|id| {
                let status = ProviderStatus {
                    configured: self.config.is_configured(id),
                    registered: self.is_registered(id),
                    available: self.is_available(id),
                    cached: clients.contains_key(&id),
                };
                (id, status)
            })
            .collect()
    }

    /// Tears down every cached client. All clients are closed even when some
    /// fail; the first failure is returned.
    pub async fn close_all(&self) -> Result<()> {
        let drained: Vec<_> = self.clients.lock().await.drain().collect();
        let mut first_error = None;
        for (provider, client) in drained {
            if let Err(err) = client.close().await {
                warn!(provider = %provider, error = %err, "failed to close provider client");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
