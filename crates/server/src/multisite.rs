//! Host-aware front door over per-configuration gates.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::Response;
use tokio::sync::RwLock;

use fullpage_core::AppConfig;

use crate::context::RequestContext;
use crate::gate::CacheGate;
use crate::page::PageGenerator;

/// Gate key used when a network-wide configuration covers every host.
const NETWORK_SCOPE: &str = "*";

/// Resolves the configuration for each request host and reuses one gate per scope.
///
/// A scope whose gate could not be built is remembered as `None`, so the
/// failure is logged once and later requests go straight to generation.
pub struct PageCache {
    config: AppConfig,
    gates: RwLock<HashMap<String, Option<Arc<CacheGate>>>>,
}

impl PageCache {
    pub fn new(config: AppConfig) -> Self {
        Self { config, gates: RwLock::new(HashMap::new()) }
    }

    /// Gate for `host`; `None` when no configuration applies or it cannot be built.
    pub async fn gate_for(&self, host: &str) -> Option<Arc<CacheGate>> {
        let scope = if self.config.network.is_some() { NETWORK_SCOPE } else { host };
        if let Some(gate) = self.gates.read().await.get(scope) {
            return gate.clone();
        }

        let Some(config) = self.config.resolve(host) else {
            tracing::debug!(host, "no cache configuration for host, serving uncached");
            return None;
        };

        let mut gates = self.gates.write().await;
        if let Some(gate) = gates.get(scope) {
            return gate.clone();
        }

        let gate = match CacheGate::connect(config.clone()).await {
            Ok(gate) => Some(Arc::new(gate)),
            Err(e) => {
                tracing::warn!(host, scope, error = %e, "cache gate unavailable, serving uncached");
                None
            }
        };
        gates.insert(scope.to_string(), gate.clone());
        gate
    }

    /// Answer `request` through the gate for its host, or generate it uncached.
    pub async fn handle(&self, request: &RequestContext, generator: &dyn PageGenerator) -> Response<Bytes> {
        match self.gate_for(&request.host).await {
            Some(gate) => gate.handle(request, generator).await,
            None => generator.generate(request).await.into_response(),
        }
    }
}
