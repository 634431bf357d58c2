//! MAL instance: owns the tables and the dispatcher for one process-local
//! middleware instance

use crate::consumer::{Consumer, ConsumerInteractionTable};
use crate::details::{Address, MessageDetails};
use crate::dispatcher::MessageDispatcher;
use crate::error::Result;
use crate::provider::{
    BrokerBindingMap, BrokerHandler, EndpointRegistry, ProviderHandler, ProviderInteractionTable,
};
use crate::pubsub::PubSubRoutingTable;
use crate::transaction::{Clock, SystemClock, TransactionIdAllocator};
use crate::transport::{Endpoint, NullSecurityManager, SecurityManager};
use bytes::Bytes;
use mal_config::MalConfig;
use mal_types::ServiceKey;
use std::sync::Arc;
use tracing::{info, warn};

pub struct MalInstance {
    config: MalConfig,
    consumers: Arc<ConsumerInteractionTable>,
    provider_transactions: Arc<ProviderInteractionTable>,
    routing: Arc<PubSubRoutingTable>,
    registry: Arc<EndpointRegistry>,
    brokers: Arc<BrokerBindingMap>,
    dispatcher: Arc<MessageDispatcher>,
}

impl std::fmt::Debug for MalInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MalInstance")
            .field("consumers", &self.consumers)
            .field("providers", &self.registry.len())
            .field("brokers", &self.brokers.len())
            .finish()
    }
}

impl MalInstance {
    pub fn new(config: MalConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Instance whose transaction ids are derived from `clock`
    pub fn with_clock(config: MalConfig, clock: Arc<dyn Clock>) -> Self {
        let epoch = config.transaction.epoch_unix_seconds;
        let consumers = Arc::new(ConsumerInteractionTable::new(
            Arc::new(TransactionIdAllocator::with_clock(epoch, clock.clone())),
            config.consumer.wait_timeout(),
        ));
        let provider_transactions = Arc::new(ProviderInteractionTable::new(
            TransactionIdAllocator::with_clock(epoch, clock),
        ));
        let routing = Arc::new(PubSubRoutingTable::new(
            config.pubsub.provider_key_separator.clone(),
        ));
        let registry = Arc::new(EndpointRegistry::new());
        let brokers = Arc::new(BrokerBindingMap::new());

        let dispatcher = Arc::new(MessageDispatcher::new(
            Arc::new(NullSecurityManager),
            registry.clone(),
            brokers.clone(),
            consumers.clone(),
            routing.clone(),
        ));

        Self {
            config,
            consumers,
            provider_transactions,
            routing,
            registry,
            brokers,
            dispatcher,
        }
    }

    /// Replace the security manager every inbound message is checked with
    pub fn with_security(mut self, security: Arc<dyn SecurityManager>) -> Self {
        self.dispatcher = Arc::new(MessageDispatcher::new(
            security,
            self.registry.clone(),
            self.brokers.clone(),
            self.consumers.clone(),
            self.routing.clone(),
        ));
        self
    }

    pub fn config(&self) -> &MalConfig {
        &self.config
    }

    /// Dispatcher transports deliver inbound messages to
    pub fn dispatcher(&self) -> Arc<MessageDispatcher> {
        self.dispatcher.clone()
    }

    pub fn consumer_table(&self) -> &Arc<ConsumerInteractionTable> {
        &self.consumers
    }

    pub fn provider_transactions(&self) -> &Arc<ProviderInteractionTable> {
        &self.provider_transactions
    }

    pub fn routing(&self) -> &Arc<PubSubRoutingTable> {
        &self.routing
    }

    pub fn create_consumer(&self, details: MessageDetails) -> Consumer {
        Consumer::new(details, self.consumers.clone(), self.routing.clone())
    }

    /// Bind `handler` to serve `service` on `endpoint`
    pub fn register_provider(
        &self,
        endpoint: Arc<dyn Endpoint>,
        service: ServiceKey,
        authentication_id: Bytes,
        handler: Arc<dyn ProviderHandler>,
    ) -> Arc<Address> {
        let address = Arc::new(Address::new(endpoint, authentication_id, handler));
        if self.registry.register(service, address.clone()).is_some() {
            warn!(uri = %address.uri, service = %service, "Replaced existing provider binding");
        }
        address
    }

    pub fn bind_broker(&self, uri: impl Into<String>, broker: Arc<dyn BrokerHandler>) {
        let uri = uri.into();
        if self.brokers.bind(uri.clone(), broker).is_some() {
            warn!(uri = %uri, "Replaced existing broker binding");
        }
    }

    /// Tear down everything bound to `uri`: providers, broker, subscribers
    /// and publishers. Subscribers are dropped without a notify error.
    pub fn close_endpoint(&self, uri: &str) {
        let providers = self.registry.deregister_endpoint(uri);
        let broker = self.brokers.unbind(uri).is_some();
        let subscribers = self.routing.get_notify_listeners_and_remove(uri).len();
        let publishers = self.routing.get_publish_listeners_and_remove(uri).len();
        info!(uri, providers, broker, subscribers, publishers, "Closed endpoint");
    }

    /// Fail every pending consumer interaction with SHUTDOWN
    pub async fn close(&self) -> Result<()> {
        info!(pending = self.consumers.len(), "Closing MAL instance");
        self.consumers.clear().await;
        Ok(())
    }
}
