//! Message Dispatcher
//!
//! Single entry point for every inbound message. Initial stages go to the
//! bound provider or broker, reply stages to the consumer table, notifies
//! to subscriber listeners. Nothing escapes [`MessageDispatcher::on_message`]:
//! a failure is returned to the sender as an error reply at the stage it is
//! waiting for, or logged when the message has no reply stage.

use crate::consumer::ConsumerInteractionTable;
use crate::details::Address;
use crate::error::{MalError, Result};
use crate::provider::{
    BrokerBindingLookup, EndpointRegistry, InvokeInteraction, ProgressInteraction,
    RequestInteraction, SendInteraction, SubmitInteraction,
};
use crate::pubsub::PubSubRoutingTable;
use crate::sender::MessageSender;
use crate::transport::{Endpoint, SecurityManager};
use mal_types::{stages, InteractionType, MalMessage, MalStandardError, MessageBody, MessageHeader};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Stage an error about `header` has to be returned at, `None` if the
/// message is itself a reply or an error and nothing can be returned
pub fn expected_reply_stage(header: &MessageHeader) -> Option<u8> {
    if header.is_error_message {
        return None;
    }
    match (header.interaction_type, header.interaction_stage?) {
        (InteractionType::Send, _) => None,
        (InteractionType::Submit, stages::SUBMIT_STAGE) => Some(stages::SUBMIT_ACK_STAGE),
        (InteractionType::Request, stages::REQUEST_STAGE) => Some(stages::REQUEST_RESPONSE_STAGE),
        (InteractionType::Invoke, stages::INVOKE_STAGE) => Some(stages::INVOKE_ACK_STAGE),
        (InteractionType::Progress, stages::PROGRESS_STAGE) => Some(stages::PROGRESS_ACK_STAGE),
        (InteractionType::PubSub, stages::PUBSUB_REGISTER_STAGE) => Some(stages::PUBSUB_REGISTER_ACK_STAGE),
        (InteractionType::PubSub, stages::PUBSUB_PUBLISH_REGISTER_STAGE) => {
            Some(stages::PUBSUB_PUBLISH_REGISTER_ACK_STAGE)
        }
        (InteractionType::PubSub, stages::PUBSUB_PUBLISH_STAGE) => Some(stages::PUBSUB_PUBLISH_STAGE),
        (InteractionType::PubSub, stages::PUBSUB_DEREGISTER_STAGE) => {
            Some(stages::PUBSUB_DEREGISTER_ACK_STAGE)
        }
        (InteractionType::PubSub, stages::PUBSUB_PUBLISH_DEREGISTER_STAGE) => {
            Some(stages::PUBSUB_PUBLISH_DEREGISTER_ACK_STAGE)
        }
        _ => None,
    }
}

pub struct MessageDispatcher {
    security: Arc<dyn SecurityManager>,
    registry: Arc<EndpointRegistry>,
    brokers: Arc<dyn BrokerBindingLookup>,
    consumers: Arc<ConsumerInteractionTable>,
    routing: Arc<PubSubRoutingTable>,
    sender: MessageSender,
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("providers", &self.registry.len())
            .field("consumers", &self.consumers)
            .field("routing", &self.routing)
            .finish()
    }
}

impl MessageDispatcher {
    pub fn new(
        security: Arc<dyn SecurityManager>,
        registry: Arc<EndpointRegistry>,
        brokers: Arc<dyn BrokerBindingLookup>,
        consumers: Arc<ConsumerInteractionTable>,
        routing: Arc<PubSubRoutingTable>,
    ) -> Self {
        Self {
            security,
            registry,
            brokers,
            consumers,
            routing,
            sender: MessageSender::new(),
        }
    }

    /// Handle one message received on `endpoint`
    pub async fn on_message(&self, endpoint: Arc<dyn Endpoint>, message: MalMessage) {
        let header = message.header.clone();
        debug!(
            transaction_id = ?header.transaction_id,
            interaction_type = ?header.interaction_type,
            stage = ?header.interaction_stage,
            uri = %header.uri_from,
            "Dispatching message"
        );

        if let Err(err) = self.dispatch(endpoint.as_ref(), message).await {
            self.return_error(endpoint.as_ref(), &header, err).await;
        }
    }

    /// Report a failed outbound message or a failed connection.
    ///
    /// With a header, the consumer interaction that message belongs to is
    /// terminated with `error`. A failed publish goes to the publisher's
    /// listener instead. Without one the whole connection is gone and
    /// every subscriber on `endpoint_uri` receives a notify error.
    pub async fn on_transmit_error(
        &self,
        endpoint_uri: &str,
        header: Option<&MessageHeader>,
        error: MalError,
    ) {
        match header {
            Some(header)
                if header.interaction_type == InteractionType::PubSub
                    && header.interaction_stage == Some(stages::PUBSUB_PUBLISH_STAGE) =>
            {
                let key = self.routing.publisher_key_at(endpoint_uri, header);
                match self.routing.get_publish_listener(&key) {
                    Some(listener) => {
                        let reply = header.reply(stages::PUBSUB_PUBLISH_STAGE, true);
                        listener
                            .publish_error_received(&reply, &error.to_standard_error())
                            .await;
                    }
                    None => warn!(uri = endpoint_uri, %error, "Publish not sent and no publisher registered"),
                }
            }
            Some(header) if header.is_initial_stage() && header.interaction_type.expects_reply() => {
                if let Err(err) = self.consumers.handle_error(header, error).await {
                    warn!(uri = endpoint_uri, %err, "Transmit error not delivered");
                }
            }
            Some(header) if header.is_initial_stage() => {
                warn!(uri = endpoint_uri, transaction_id = ?header.transaction_id, %error, "Send not delivered, dropped");
            }
            Some(header) => {
                warn!(
                    uri = endpoint_uri,
                    transaction_id = ?header.transaction_id,
                    stage = ?header.interaction_stage,
                    %error,
                    "Transmit error on a reply, dropped"
                );
            }
            None => {
                let listeners = self.routing.get_notify_listeners_and_remove(endpoint_uri);
                warn!(uri = endpoint_uri, subscribers = listeners.len(), %error, "Connection failed");
                let standard = error.to_standard_error();
                for (subscription_id, listener) in listeners {
                    let header = MessageHeader::new(
                        "",
                        endpoint_uri,
                        InteractionType::PubSub,
                        Some(stages::PUBSUB_NOTIFY_STAGE),
                    )
                    .with_error_flag(true);
                    debug!(subscription_id = %subscription_id, "Notifying subscriber of connection failure");
                    listener.notify_error_received(&header, &standard).await;
                }
            }
        }
    }

    async fn dispatch(&self, endpoint: &dyn Endpoint, message: MalMessage) -> Result<()> {
        let message = self.security.check(message)?;
        let interaction_type = message.header.interaction_type;
        let stage = message.header.interaction_stage;

        match (interaction_type, stage) {
            (InteractionType::Send, _) => self.dispatch_send(message).await,
            (InteractionType::Submit, Some(stages::SUBMIT_STAGE))
            | (InteractionType::Request, Some(stages::REQUEST_STAGE))
            | (InteractionType::Invoke, Some(stages::INVOKE_STAGE))
            | (InteractionType::Progress, Some(stages::PROGRESS_STAGE)) => {
                self.dispatch_to_provider(message).await
            }
            (InteractionType::Submit, Some(stages::SUBMIT_ACK_STAGE))
            | (InteractionType::Request, Some(stages::REQUEST_RESPONSE_STAGE))
            | (
                InteractionType::Invoke,
                Some(stages::INVOKE_ACK_STAGE | stages::INVOKE_RESPONSE_STAGE),
            )
            | (
                InteractionType::Progress,
                Some(
                    stages::PROGRESS_ACK_STAGE
                    | stages::PROGRESS_UPDATE_STAGE
                    | stages::PROGRESS_RESPONSE_STAGE,
                ),
            )
            | (
                InteractionType::PubSub,
                Some(
                    stages::PUBSUB_REGISTER_ACK_STAGE
                    | stages::PUBSUB_PUBLISH_REGISTER_ACK_STAGE
                    | stages::PUBSUB_DEREGISTER_ACK_STAGE
                    | stages::PUBSUB_PUBLISH_DEREGISTER_ACK_STAGE,
                ),
            ) => self.consumers.handle_stage(message).await,
            (InteractionType::PubSub, Some(stages::PUBSUB_PUBLISH_STAGE))
                if message.header.is_error_message =>
            {
                self.dispatch_publish_error(message).await
            }
            (InteractionType::PubSub, Some(stages::PUBSUB_NOTIFY_STAGE)) => {
                self.dispatch_notify(message).await
            }
            (
                InteractionType::PubSub,
                Some(
                    stages::PUBSUB_REGISTER_STAGE
                    | stages::PUBSUB_PUBLISH_REGISTER_STAGE
                    | stages::PUBSUB_PUBLISH_STAGE
                    | stages::PUBSUB_DEREGISTER_STAGE
                    | stages::PUBSUB_PUBLISH_DEREGISTER_STAGE,
                ),
            ) => self.dispatch_to_broker(endpoint, message).await,
            (interaction_type, stage) => Err(MalError::incorrect_state(
                format!("unexpected stage for {:?}", interaction_type),
                message.header.transaction_id,
                stage,
            )),
        }
    }

    fn resolve_provider(&self, header: &MessageHeader) -> Result<Arc<Address>> {
        self.registry
            .lookup(&header.uri_to, &header.service)
            .ok_or_else(|| MalError::destination_unknown(format!("{} ({})", header.uri_to, header.service)))
    }

    async fn dispatch_send(&self, message: MalMessage) -> Result<()> {
        let address = self.resolve_provider(&message.header)?;
        let handler = address.handler.clone();
        let interaction = SendInteraction::new(message, address, self.sender);
        let transaction_id = interaction.header().transaction_id;

        if let Err(err) = handler.handle_send(interaction).await {
            warn!(?transaction_id, %err, "Send handler failed, message dropped");
        }
        Ok(())
    }

    async fn dispatch_to_provider(&self, message: MalMessage) -> Result<()> {
        let address = self.resolve_provider(&message.header)?;
        let handler = address.handler.clone();
        let header = message.header.clone();

        let (outcome, error_stage) = match header.interaction_type {
            InteractionType::Submit => {
                let interaction = SubmitInteraction::new(message, address.clone(), self.sender);
                let outcome = handler.handle_submit(interaction.clone()).await;
                (outcome, interaction.pending_error_stage())
            }
            InteractionType::Request => {
                let interaction = RequestInteraction::new(message, address.clone(), self.sender);
                let outcome = handler.handle_request(interaction.clone()).await;
                (outcome, interaction.pending_error_stage())
            }
            InteractionType::Invoke => {
                let interaction = InvokeInteraction::new(message, address.clone(), self.sender);
                let outcome = handler.handle_invoke(interaction.clone()).await;
                (outcome, interaction.pending_error_stage())
            }
            InteractionType::Progress => {
                let interaction = ProgressInteraction::new(message, address.clone(), self.sender);
                let outcome = handler.handle_progress(interaction.clone()).await;
                (outcome, interaction.pending_error_stage())
            }
            other => {
                return Err(MalError::internal(format!("{:?} is not a provider pattern", other)))
            }
        };

        let Err(err) = outcome else {
            return Ok(());
        };
        match error_stage {
            Some(stage) => {
                debug!(transaction_id = ?header.transaction_id, stage, %err, "Returning provider error");
                // Send failures are already logged by the sender
                let _ = self
                    .sender
                    .return_error(&address, &header, stage, err.to_standard_error())
                    .await;
            }
            None => {
                warn!(
                    transaction_id = ?header.transaction_id,
                    %err,
                    "Provider failed after completing the interaction, error not returned"
                );
            }
        }
        Ok(())
    }

    async fn dispatch_to_broker(&self, endpoint: &dyn Endpoint, message: MalMessage) -> Result<()> {
        let header = &message.header;
        let broker = self
            .brokers
            .resolve(&header.uri_to)
            .ok_or_else(|| MalError::destination_unknown(header.uri_to.clone()))?;

        let ack_stage = match (header.stage_or_zero(), &message.body) {
            (stages::PUBSUB_REGISTER_STAGE, MessageBody::Subscription(subscription)) => {
                broker.handle_register(header, subscription).await?;
                stages::PUBSUB_REGISTER_ACK_STAGE
            }
            (stages::PUBSUB_PUBLISH_REGISTER_STAGE, MessageBody::EntityKeyList(keys)) => {
                broker.handle_publish_register(header, keys).await?;
                stages::PUBSUB_PUBLISH_REGISTER_ACK_STAGE
            }
            (stages::PUBSUB_PUBLISH_STAGE, MessageBody::UpdateList(updates)) => {
                broker.handle_publish(header, updates).await?;
                return Ok(());
            }
            (stages::PUBSUB_DEREGISTER_STAGE, MessageBody::IdentifierList(ids)) => {
                broker.handle_deregister(header, ids).await?;
                stages::PUBSUB_DEREGISTER_ACK_STAGE
            }
            (stages::PUBSUB_PUBLISH_DEREGISTER_STAGE, _) => {
                broker.handle_publish_deregister(header).await?;
                stages::PUBSUB_PUBLISH_DEREGISTER_ACK_STAGE
            }
            (stage, body) => {
                return Err(MalError::bad_encoding(expected_body(stage), body.shape_name()))
            }
        };

        self.sender
            .return_ack_via(endpoint, header, &message.qos_properties, ack_stage, MessageBody::Empty)
            .await
    }

    async fn dispatch_notify(&self, message: MalMessage) -> Result<()> {
        let uri = message.header.uri_to.clone();

        if let Some(error) = message.error_body() {
            let listeners = self.routing.get_notify_listeners_and_remove(&uri);
            warn!(uri = %uri, subscribers = listeners.len(), %error, "Notify error, removing subscribers");
            for (_, listener) in listeners {
                listener.notify_error_received(&message.header, &error).await;
            }
            return Ok(());
        }

        let MessageBody::Notify(notify) = &message.body else {
            return Err(MalError::bad_encoding("notify", message.body.shape_name()));
        };
        match self.routing.get_notify_listener(&uri, &notify.subscription_id) {
            Some(listener) => listener.notify_received(&message).await,
            None => debug!(
                uri = %uri,
                subscription_id = %notify.subscription_id,
                "No subscriber for notify, dropped"
            ),
        }
        Ok(())
    }

    async fn dispatch_publish_error(&self, message: MalMessage) -> Result<()> {
        let key = self.routing.publisher_key_for_header(&message.header);
        let error = message.error_body().unwrap_or_else(|| {
            MalStandardError::new(mal_types::standard_errors::UNKNOWN, None)
        });

        match self.routing.get_publish_listener_and_remove(&key) {
            Some(listener) => listener.publish_error_received(&message.header, &error).await,
            None => warn!(uri = %key.0, provider_key = %key.1, %error, "No publisher for publish error, dropped"),
        }
        Ok(())
    }

    async fn return_error(&self, endpoint: &dyn Endpoint, header: &MessageHeader, err: MalError) {
        let Some(stage) = expected_reply_stage(header) else {
            warn!(
                transaction_id = ?header.transaction_id,
                interaction_type = ?header.interaction_type,
                stage = ?header.interaction_stage,
                %err,
                "Error could not be returned to sender"
            );
            return;
        };

        debug!(transaction_id = ?header.transaction_id, stage, %err, "Returning error");
        if let Err(send_err) = self
            .sender
            .return_error_via(endpoint, header, stage, err.to_standard_error())
            .await
        {
            error!(transaction_id = ?header.transaction_id, %send_err, "Error reply could not be sent");
        }
    }
}

fn expected_body(stage: u8) -> &'static str {
    match stage {
        stages::PUBSUB_REGISTER_STAGE => "subscription",
        stages::PUBSUB_PUBLISH_REGISTER_STAGE => "entity-key-list",
        stages::PUBSUB_PUBLISH_STAGE => "update-list",
        stages::PUBSUB_DEREGISTER_STAGE => "identifier-list",
        _ => "empty",
    }
}
