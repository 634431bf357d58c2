//! Provider and broker handler traits
//!
//! Providers receive the initial stage of each pattern wrapped in an
//! interaction context they reply through. Brokers receive the decoded body
//! of each pub-sub initial stage; acknowledgements are synthesized by the
//! dispatcher once the broker returns.

use super::interaction::{
    InvokeInteraction, ProgressInteraction, RequestInteraction, SendInteraction,
    SubmitInteraction,
};
use crate::error::{MalError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use mal_types::{EntityKey, MessageHeader, Subscription, Update};
use std::sync::Arc;
use tracing::debug;

/// Operations a provider implements. Unimplemented operations are rejected
/// with `UNSUPPORTED_OPERATION`.
#[async_trait]
pub trait ProviderHandler: Send + Sync {
    async fn handle_send(&self, interaction: SendInteraction) -> Result<()> {
        Err(unsupported("send", &interaction.message().header))
    }

    async fn handle_submit(&self, interaction: SubmitInteraction) -> Result<()> {
        Err(unsupported("submit", &interaction.message().header))
    }

    async fn handle_request(&self, interaction: RequestInteraction) -> Result<()> {
        Err(unsupported("request", &interaction.message().header))
    }

    async fn handle_invoke(&self, interaction: InvokeInteraction) -> Result<()> {
        Err(unsupported("invoke", &interaction.message().header))
    }

    async fn handle_progress(&self, interaction: ProgressInteraction) -> Result<()> {
        Err(unsupported("progress", &interaction.message().header))
    }
}

fn unsupported(pattern: &str, header: &MessageHeader) -> MalError {
    MalError::unsupported(format!("{} operation {}", pattern, header.service))
}

/// Broker side of pub-sub. A returned error is sent back to the originator
/// at the stage's acknowledgement, or at the publish stage for publish.
#[async_trait]
pub trait BrokerHandler: Send + Sync {
    async fn handle_register(&self, header: &MessageHeader, subscription: &Subscription) -> Result<()>;

    async fn handle_publish_register(&self, header: &MessageHeader, keys: &[EntityKey]) -> Result<()>;

    async fn handle_publish(&self, header: &MessageHeader, updates: &[Update]) -> Result<()>;

    async fn handle_deregister(&self, header: &MessageHeader, subscription_ids: &[String]) -> Result<()>;

    async fn handle_publish_deregister(&self, header: &MessageHeader) -> Result<()>;
}

/// Resolves the broker bound to a URI
pub trait BrokerBindingLookup: Send + Sync {
    fn resolve(&self, uri: &str) -> Option<Arc<dyn BrokerHandler>>;
}

/// In-memory broker bindings
#[derive(Default)]
pub struct BrokerBindingMap {
    bindings: DashMap<String, Arc<dyn BrokerHandler>>,
}

impl std::fmt::Debug for BrokerBindingMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBindingMap")
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

impl BrokerBindingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a broker to `uri`, returning the one it replaces
    pub fn bind(
        &self,
        uri: impl Into<String>,
        broker: Arc<dyn BrokerHandler>,
    ) -> Option<Arc<dyn BrokerHandler>> {
        let uri = uri.into();
        debug!(uri = %uri, "Bound broker");
        self.bindings.insert(uri, broker)
    }

    pub fn unbind(&self, uri: &str) -> Option<Arc<dyn BrokerHandler>> {
        self.bindings.remove(uri).map(|(_, broker)| broker)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl BrokerBindingLookup for BrokerBindingMap {
    fn resolve(&self, uri: &str) -> Option<Arc<dyn BrokerHandler>> {
        self.bindings.get(uri).map(|entry| entry.value().clone())
    }
}
