//! Common Test Utilities for MAL interaction tests
//!
//! An in-memory network of loopback endpoints: sending on one endpoint
//! dispatches the message, on a spawned task, to the instance bound to the
//! destination URI.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use mal_interaction::{
    BrokerHandler, Endpoint, InvokeInteraction, MalError, MalInstance, MessageDispatcher,
    ProgressInteraction, ProviderHandler, RequestInteraction, Result, SubmitInteraction,
};
use mal_types::{
    stages, standard_errors, EntityKey, InteractionType, MalMessage, MalStandardError,
    MessageBody, MessageHeader, NotifyBody, Subscription, Update,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub const SERVICE_AREA: u16 = 4;
pub const SERVICE: u16 = 2;

/// Application error raised by [`TestProvider`] on request
pub const REJECTED: u32 = 70_100;

#[derive(Clone)]
struct Node {
    dispatcher: Arc<MessageDispatcher>,
    endpoint: Arc<LoopbackEndpoint>,
}

/// Routes messages between loopback endpoints by URI
#[derive(Clone, Default)]
pub struct Network {
    nodes: Arc<Mutex<HashMap<String, Node>>>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("nodes", &self.nodes.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint at `uri` whose inbound messages go to `mal`
    pub fn endpoint(&self, uri: &str, mal: &MalInstance) -> Arc<LoopbackEndpoint> {
        let endpoint = Arc::new(LoopbackEndpoint {
            uri: uri.to_string(),
            network: self.clone(),
            sent: Mutex::new(Vec::new()),
        });
        self.nodes.lock().insert(
            uri.to_string(),
            Node {
                dispatcher: mal.dispatcher(),
                endpoint: endpoint.clone(),
            },
        );
        endpoint
    }

    pub fn has_route(&self, uri: &str) -> bool {
        self.nodes.lock().contains_key(uri)
    }

    pub fn disconnect(&self, uri: &str) {
        self.nodes.lock().remove(uri);
    }
}

#[derive(Debug)]
pub struct LoopbackEndpoint {
    uri: String,
    network: Network,
    sent: Mutex<Vec<MalMessage>>,
}

impl LoopbackEndpoint {
    pub fn sent_messages(&self) -> Vec<MalMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Endpoint for LoopbackEndpoint {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn send(&self, message: MalMessage) -> Result<()> {
        let node = self
            .network
            .nodes
            .lock()
            .get(&message.header.uri_to)
            .cloned()
            .ok_or_else(|| MalError::transport(format!("no route to {}", message.header.uri_to)))?;

        self.sent.lock().push(message.clone());
        let Node { dispatcher, endpoint } = node;
        tokio::spawn(async move {
            dispatcher.on_message(endpoint, message).await;
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.network.disconnect(&self.uri);
        Ok(())
    }
}

/// Provider used across the dispatch tests.
///
/// Submit with an empty body is rejected with [`REJECTED`]. Request echoes
/// the body. Invoke acknowledges then responds. Progress sends as many
/// updates as the body has elements.
#[derive(Debug, Default)]
pub struct TestProvider {
    pub received: Mutex<Vec<InteractionType>>,
}

#[async_trait]
impl ProviderHandler for TestProvider {
    async fn handle_submit(&self, interaction: SubmitInteraction) -> Result<()> {
        self.received.lock().push(InteractionType::Submit);
        if matches!(interaction.body(), MessageBody::Empty) {
            return Err(MalStandardError::with_info(REJECTED, "empty submit").into());
        }
        interaction.send_acknowledgement().await
    }

    async fn handle_request(&self, interaction: RequestInteraction) -> Result<()> {
        self.received.lock().push(InteractionType::Request);
        interaction.send_response(interaction.body().clone()).await
    }

    async fn handle_invoke(&self, interaction: InvokeInteraction) -> Result<()> {
        self.received.lock().push(InteractionType::Invoke);
        interaction.send_acknowledgement(MessageBody::Empty).await?;
        interaction.send_response(interaction.body().clone()).await
    }

    async fn handle_progress(&self, interaction: ProgressInteraction) -> Result<()> {
        self.received.lock().push(InteractionType::Progress);
        interaction.send_acknowledgement(MessageBody::Empty).await?;
        if let MessageBody::Elements(elements) = interaction.body() {
            for element in elements {
                interaction
                    .send_update(MessageBody::elements([element.clone()]))
                    .await?;
            }
        }
        interaction.send_response(MessageBody::Empty).await
    }
}

struct BrokerSubscription {
    subscriber_uri: String,
    subscription: Subscription,
    register_header: MessageHeader,
}

/// Minimal broker: exact matching on the first sub-key, `*` matches everything
pub struct TestBroker {
    endpoint: Arc<dyn Endpoint>,
    subscriptions: Mutex<Vec<BrokerSubscription>>,
    publishers: Mutex<HashSet<String>>,
}

impl TestBroker {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            endpoint,
            subscriptions: Mutex::new(Vec::new()),
            publishers: Mutex::new(HashSet::new()),
        }
    }

    /// Forget a publisher so its next publish is rejected
    pub fn revoke_publisher(&self, uri: &str) {
        self.publishers.lock().remove(uri);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    fn matches(subscription: &Subscription, key: &EntityKey) -> bool {
        subscription.entities.iter().any(|entity| {
            entity.first_sub_key.as_deref() == Some("*") || entity.first_sub_key == key.first_sub_key
        })
    }
}

#[async_trait]
impl BrokerHandler for TestBroker {
    async fn handle_register(&self, header: &MessageHeader, subscription: &Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|s| {
            !(s.subscriber_uri == header.uri_from
                && s.subscription.subscription_id == subscription.subscription_id)
        });
        subscriptions.push(BrokerSubscription {
            subscriber_uri: header.uri_from.clone(),
            subscription: subscription.clone(),
            register_header: header.clone(),
        });
        Ok(())
    }

    async fn handle_publish_register(&self, header: &MessageHeader, _: &[EntityKey]) -> Result<()> {
        self.publishers.lock().insert(header.uri_from.clone());
        Ok(())
    }

    async fn handle_publish(&self, header: &MessageHeader, updates: &[Update]) -> Result<()> {
        if !self.publishers.lock().contains(&header.uri_from) {
            return Err(MalStandardError::with_info(
                standard_errors::UNKNOWN,
                format!("{} is not a registered publisher", header.uri_from),
            )
            .into());
        }

        let notifies: Vec<MalMessage> = self
            .subscriptions
            .lock()
            .iter()
            .filter_map(|s| {
                let matched: Vec<Update> = updates
                    .iter()
                    .filter(|u| Self::matches(&s.subscription, &u.header.key))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    return None;
                }
                let notify_header = s.register_header.reply(stages::PUBSUB_NOTIFY_STAGE, false);
                Some(MalMessage::new(
                    notify_header,
                    MessageBody::Notify(NotifyBody {
                        subscription_id: s.subscription.subscription_id.clone(),
                        updates: matched,
                    }),
                ))
            })
            .collect();

        for notify in notifies {
            self.endpoint.send(notify).await?;
        }
        Ok(())
    }

    async fn handle_deregister(&self, header: &MessageHeader, subscription_ids: &[String]) -> Result<()> {
        self.subscriptions.lock().retain(|s| {
            !(s.subscriber_uri == header.uri_from
                && subscription_ids.contains(&s.subscription.subscription_id))
        });
        Ok(())
    }

    async fn handle_publish_deregister(&self, header: &MessageHeader) -> Result<()> {
        self.publishers.lock().remove(&header.uri_from);
        Ok(())
    }
}

pub fn element(text: &'static str) -> Bytes {
    Bytes::from_static(text.as_bytes())
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
