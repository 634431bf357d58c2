//! Test doubles for endpoints, listeners, brokers and clocks

use crate::consumer::ConsumerInteractionTable;
use crate::dispatcher::MessageDispatcher;
use crate::error::{MalError, Result};
use crate::listener::{InteractionListener, PublishListener};
use crate::provider::{BrokerBindingMap, BrokerHandler, EndpointRegistry, ProviderHandler};
use crate::pubsub::PubSubRoutingTable;
use crate::transaction::{Clock, TransactionIdAllocator};
use crate::transport::{Endpoint, NullSecurityManager};
use async_trait::async_trait;
use mal_types::{EntityKey, MalMessage, MalStandardError, MessageHeader, Subscription, Update};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An endpoint that collects every message sent through it
#[derive(Debug)]
pub struct CollectingEndpoint {
    uri: String,
    messages: Mutex<Vec<MalMessage>>,
    fail_on_send: AtomicBool,
    closed: AtomicBool,
}

impl CollectingEndpoint {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            messages: Mutex::new(Vec::new()),
            fail_on_send: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn sent_messages(&self) -> Vec<MalMessage> {
        self.messages.lock().clone()
    }

    /// Drain the collected messages
    pub fn take_messages(&self) -> Vec<MalMessage> {
        std::mem::take(&mut *self.messages.lock())
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    /// Configure to fail on next send
    pub fn fail_next_send(&self) {
        self.fail_on_send.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Wait until at least `count` messages were sent
    pub async fn wait_for_messages(&self, count: usize) -> Vec<MalMessage> {
        for _ in 0..400 {
            if self.message_count() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.sent_messages()
    }
}

#[async_trait]
impl Endpoint for CollectingEndpoint {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn send(&self, message: MalMessage) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(MalError::transport(format!("{} is closed", self.uri)));
        }
        if self.fail_on_send.swap(false, Ordering::Relaxed) {
            return Err(MalError::transport("simulated send failure"));
        }
        self.messages.lock().push(message);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Records the name of every listener callback invoked, in order
#[derive(Debug, Default)]
pub struct RecordingListener {
    callbacks: Mutex<Vec<&'static str>>,
    messages: Mutex<Vec<MalMessage>>,
    errors: Mutex<Vec<MalStandardError>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callbacks(&self) -> Vec<&'static str> {
        self.callbacks.lock().clone()
    }

    pub fn messages(&self) -> Vec<MalMessage> {
        self.messages.lock().clone()
    }

    pub fn last_error(&self) -> Option<MalStandardError> {
        self.errors.lock().last().cloned()
    }

    fn message(&self, name: &'static str, message: &MalMessage) {
        self.callbacks.lock().push(name);
        self.messages.lock().push(message.clone());
    }

    fn error(&self, name: &'static str, error: &MalStandardError) {
        self.callbacks.lock().push(name);
        self.errors.lock().push(error.clone());
    }
}

#[async_trait]
impl InteractionListener for RecordingListener {
    async fn submit_ack_received(&self, message: &MalMessage) {
        self.message("submit_ack_received", message)
    }
    async fn submit_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("submit_error_received", error)
    }
    async fn request_response_received(&self, message: &MalMessage) {
        self.message("request_response_received", message)
    }
    async fn request_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("request_error_received", error)
    }
    async fn invoke_ack_received(&self, message: &MalMessage) {
        self.message("invoke_ack_received", message)
    }
    async fn invoke_ack_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("invoke_ack_error_received", error)
    }
    async fn invoke_response_received(&self, message: &MalMessage) {
        self.message("invoke_response_received", message)
    }
    async fn invoke_response_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("invoke_response_error_received", error)
    }
    async fn progress_ack_received(&self, message: &MalMessage) {
        self.message("progress_ack_received", message)
    }
    async fn progress_ack_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("progress_ack_error_received", error)
    }
    async fn progress_update_received(&self, message: &MalMessage) {
        self.message("progress_update_received", message)
    }
    async fn progress_update_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("progress_update_error_received", error)
    }
    async fn progress_response_received(&self, message: &MalMessage) {
        self.message("progress_response_received", message)
    }
    async fn progress_response_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("progress_response_error_received", error)
    }
    async fn register_ack_received(&self, message: &MalMessage) {
        self.message("register_ack_received", message)
    }
    async fn register_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("register_error_received", error)
    }
    async fn deregister_ack_received(&self, message: &MalMessage) {
        self.message("deregister_ack_received", message)
    }
    async fn deregister_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("deregister_error_received", error)
    }
    async fn notify_received(&self, message: &MalMessage) {
        self.message("notify_received", message)
    }
    async fn notify_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("notify_error_received", error)
    }
}

#[async_trait]
impl PublishListener for RecordingListener {
    async fn publish_register_ack_received(&self, message: &MalMessage) {
        self.message("publish_register_ack_received", message)
    }
    async fn publish_register_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("publish_register_error_received", error)
    }
    async fn publish_error_received(&self, _: &MessageHeader, error: &MalStandardError) {
        self.error("publish_error_received", error)
    }
    async fn publish_deregister_ack_received(&self, message: &MalMessage) {
        self.message("publish_deregister_ack_received", message)
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    seconds: AtomicU64,
}

impl ManualClock {
    pub fn new(unix_seconds: u64) -> Self {
        Self {
            seconds: AtomicU64::new(unix_seconds),
        }
    }

    pub fn advance(&self, seconds: u64) {
        self.seconds.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn unix_seconds(&self) -> u64 {
        self.seconds.load(Ordering::SeqCst)
    }
}

/// Provider that implements nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProvider;

impl ProviderHandler for NoopProvider {}

/// Broker that records each call and accepts everything unless told otherwise
#[derive(Debug, Default)]
pub struct RecordingBroker {
    calls: Mutex<Vec<&'static str>>,
    subscriptions: Mutex<Vec<Subscription>>,
    publish_failure: Mutex<Option<MalStandardError>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().clone()
    }

    /// Reject every publish with `error`
    pub fn fail_publish(&self, error: MalStandardError) {
        *self.publish_failure.lock() = Some(error);
    }
}

#[async_trait]
impl BrokerHandler for RecordingBroker {
    async fn handle_register(&self, _: &MessageHeader, subscription: &Subscription) -> Result<()> {
        self.calls.lock().push("register");
        self.subscriptions.lock().push(subscription.clone());
        Ok(())
    }

    async fn handle_publish_register(&self, _: &MessageHeader, _: &[EntityKey]) -> Result<()> {
        self.calls.lock().push("publish_register");
        Ok(())
    }

    async fn handle_publish(&self, _: &MessageHeader, _: &[Update]) -> Result<()> {
        self.calls.lock().push("publish");
        match self.publish_failure.lock().clone() {
            Some(error) => Err(MalError::Standard(error)),
            None => Ok(()),
        }
    }

    async fn handle_deregister(&self, _: &MessageHeader, _: &[String]) -> Result<()> {
        self.calls.lock().push("deregister");
        Ok(())
    }

    async fn handle_publish_deregister(&self, _: &MessageHeader) -> Result<()> {
        self.calls.lock().push("publish_deregister");
        Ok(())
    }
}

/// A dispatcher with empty tables, plus handles on those tables
pub struct DispatcherFixture {
    pub dispatcher: MessageDispatcher,
    pub registry: Arc<EndpointRegistry>,
    pub brokers: Arc<BrokerBindingMap>,
    pub consumers: Arc<ConsumerInteractionTable>,
    pub routing: Arc<PubSubRoutingTable>,
}

pub fn dispatcher_fixture() -> DispatcherFixture {
    let registry = Arc::new(EndpointRegistry::new());
    let brokers = Arc::new(BrokerBindingMap::new());
    let consumers = Arc::new(ConsumerInteractionTable::new(
        Arc::new(TransactionIdAllocator::new(mal_config::DEFAULT_TRANSACTION_EPOCH)),
        Duration::from_secs(1),
    ));
    let routing = Arc::new(PubSubRoutingTable::new("::"));
    let dispatcher = MessageDispatcher::new(
        Arc::new(NullSecurityManager),
        registry.clone(),
        brokers.clone(),
        consumers.clone(),
        routing.clone(),
    );
    DispatcherFixture {
        dispatcher,
        registry,
        brokers,
        consumers,
        routing,
    }
}
