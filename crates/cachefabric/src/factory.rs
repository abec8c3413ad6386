use crate::config::FabricConfig;
use async_trait::async_trait;
use cachefabric_core::FabricError;
use cachefabric_failover::ProviderFactory;
use cachefabric_provider::{
    MemoryProvider, Provider, ProviderId, RemoteKvProvider, RestKvProvider, TcpKvProvider, TlsMode,
};
use std::sync::{Arc, Mutex};

/// Builds providers from the fabric configuration.
///
/// The TCP provider is cached so the whole fabric shares one transport
/// (the heartbeat needs the same instance the controller dispatches to);
/// HTTP providers are stateless and rebuilt on demand.
pub(crate) struct FabricProviderFactory {
    config: FabricConfig,
    tcp: Mutex<Option<Arc<TcpKvProvider>>>,
}

impl FabricProviderFactory {
    pub(crate) fn new(config: FabricConfig) -> Self {
        Self {
            config,
            tcp: Mutex::new(None),
        }
    }

    /// The shared TCP transport, if one has been created.
    pub(crate) fn tcp_instance(&self) -> Option<Arc<TcpKvProvider>> {
        self.tcp.lock().unwrap().clone()
    }

    async fn tcp_provider(&self, id: ProviderId) -> Result<Arc<dyn Provider>, FabricError> {
        if let Some(existing) = self.tcp_instance() {
            existing.initialize().await?;
            return Ok(existing);
        }

        let mut config = self
            .config
            .tcp_kv
            .clone()
            .ok_or_else(|| FabricError::client("tcp kv is not configured"))?;
        if id == ProviderId::TcpKvTls {
            config.tls = TlsMode::Enabled;
        }

        let provider = Arc::new(TcpKvProvider::new(config));
        provider.initialize().await?;

        let mut slot = self.tcp.lock().unwrap();
        match &*slot {
            // Lost a creation race; keep the first transport.
            Some(existing) => Ok(Arc::clone(existing) as Arc<dyn Provider>),
            None => {
                *slot = Some(Arc::clone(&provider));
                Ok(provider)
            }
        }
    }
}

#[async_trait]
impl ProviderFactory for FabricProviderFactory {
    async fn create(&self, id: ProviderId) -> Result<Arc<dyn Provider>, FabricError> {
        match id {
            ProviderId::Memory => Ok(Arc::new(MemoryProvider::with_capacity(
                self.config.l1_capacity,
            ))),
            ProviderId::RemoteHttpKv => {
                let config = self
                    .config
                    .remote_kv
                    .clone()
                    .ok_or_else(|| FabricError::client("remote http kv is not configured"))?;
                let provider = RemoteKvProvider::new(config)?;
                provider.initialize().await?;
                Ok(Arc::new(provider))
            }
            ProviderId::HttpRestKv => {
                let config = self
                    .config
                    .rest_kv
                    .clone()
                    .ok_or_else(|| FabricError::client("http rest kv is not configured"))?;
                let provider = RestKvProvider::new(config)?;
                provider.initialize().await?;
                Ok(Arc::new(provider))
            }
            ProviderId::TcpKv | ProviderId::TcpKvTls | ProviderId::TcpKvAutoDetect => {
                self.tcp_provider(id).await
            }
        }
    }

    fn available(&self) -> Vec<ProviderId> {
        self.config.available()
    }
}
