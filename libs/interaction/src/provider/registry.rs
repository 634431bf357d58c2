//! Provider endpoint registry
//!
//! Providers are bound per (endpoint URI, service). Operation numbers are
//! ignored on lookup so one handler serves every operation of its service.

use crate::details::Address;
use dashmap::DashMap;
use mal_types::ServiceKey;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of bound providers
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    /// (endpoint URI, service) to provider address
    providers: DashMap<(String, ServiceKey), Arc<Address>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `address` for `service`, replacing any existing binding
    pub fn register(&self, service: ServiceKey, address: Arc<Address>) -> Option<Arc<Address>> {
        let key = (address.uri.clone(), service.service_only());
        debug!(uri = %key.0, service = %key.1, "Registered provider");
        self.providers.insert(key, address)
    }

    /// Provider bound to `uri` for the service `service` belongs to
    pub fn lookup(&self, uri: &str, service: &ServiceKey) -> Option<Arc<Address>> {
        self.providers
            .get(&(uri.to_string(), service.service_only()))
            .map(|entry| entry.value().clone())
    }

    pub fn deregister(&self, uri: &str, service: &ServiceKey) -> Option<Arc<Address>> {
        self.providers
            .remove(&(uri.to_string(), service.service_only()))
            .map(|(_, address)| address)
    }

    /// Remove every provider bound to `uri`, returning how many were removed
    pub fn deregister_endpoint(&self, uri: &str) -> usize {
        let before = self.providers.len();
        self.providers.retain(|(bound_uri, _), _| bound_uri != uri);
        let removed = before.saturating_sub(self.providers.len());
        if removed > 0 {
            info!(uri, removed, "Deregistered providers for endpoint");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
