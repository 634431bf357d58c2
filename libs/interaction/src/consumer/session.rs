//! Consumer-side entry point for initiating interactions
//!
//! Synchronous operations send the initial stage and wait for the first
//! reply. Multi-stage patterns also return a [`PendingInteraction`] to wait
//! for the rest. The `async_*` forms return the transaction id immediately
//! and report every stage through a listener.

use super::table::ConsumerInteractionTable;
use crate::details::MessageDetails;
use crate::error::Result;
use crate::listener::{ConsumerListener, InteractionListener, PublishListener};
use crate::pubsub::PubSubRoutingTable;
use async_trait::async_trait;
use mal_types::{
    stages, EntityKey, InteractionType, MalMessage, MalStandardError, MessageBody, MessageHeader,
    Subscription, Update,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Consumer bound to one set of message details
#[derive(Clone, Debug)]
pub struct Consumer {
    details: Arc<MessageDetails>,
    table: Arc<ConsumerInteractionTable>,
    routing: Arc<PubSubRoutingTable>,
    wait_timeout: Option<Duration>,
}

/// Remaining stages of a synchronous Invoke or Progress
#[derive(Debug)]
pub struct PendingInteraction {
    table: Arc<ConsumerInteractionTable>,
    transaction_id: u64,
    wait_timeout: Option<Duration>,
}

impl PendingInteraction {
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }

    /// True until the last stage has been returned
    pub fn is_pending(&self) -> bool {
        self.table.contains(self.transaction_id)
    }

    /// Wait for the next stage: updates then the response for Progress,
    /// the response for Invoke
    pub async fn next_stage(&self) -> Result<MalMessage> {
        self.table
            .wait_for_response(self.transaction_id, self.wait_timeout)
            .await
    }
}

impl Drop for PendingInteraction {
    fn drop(&mut self) {
        if self.table.abandon(self.transaction_id) {
            debug!(transaction_id = self.transaction_id, "Pending interaction abandoned");
        }
    }
}

impl Consumer {
    pub fn new(
        details: MessageDetails,
        table: Arc<ConsumerInteractionTable>,
        routing: Arc<PubSubRoutingTable>,
    ) -> Self {
        Self {
            details: Arc::new(details),
            table,
            routing,
            wait_timeout: None,
        }
    }

    /// Override the configured wait timeout for synchronous operations
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    pub fn details(&self) -> &MessageDetails {
        &self.details
    }

    pub async fn send(&self, operation: u16, body: MessageBody) -> Result<()> {
        self.initiate(InteractionType::Send, None, operation, body, None)
            .await
            .map(|_| ())
    }

    pub async fn submit(&self, operation: u16, body: MessageBody) -> Result<MalMessage> {
        self.call(InteractionType::Submit, stages::SUBMIT_STAGE, operation, body)
            .await
    }

    pub async fn request(&self, operation: u16, body: MessageBody) -> Result<MalMessage> {
        self.call(InteractionType::Request, stages::REQUEST_STAGE, operation, body)
            .await
    }

    /// Returns the acknowledgement and the pending response
    pub async fn invoke(
        &self,
        operation: u16,
        body: MessageBody,
    ) -> Result<(MalMessage, PendingInteraction)> {
        self.call_multi(InteractionType::Invoke, stages::INVOKE_STAGE, operation, body)
            .await
    }

    /// Returns the acknowledgement and the pending updates and response
    pub async fn progress(
        &self,
        operation: u16,
        body: MessageBody,
    ) -> Result<(MalMessage, PendingInteraction)> {
        self.call_multi(InteractionType::Progress, stages::PROGRESS_STAGE, operation, body)
            .await
    }

    /// Subscribe through the broker; notifies are delivered to `listener`
    pub async fn register(
        &self,
        subscription: Subscription,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<MalMessage> {
        // Listener goes in first so a notify racing the ack is not lost
        self.routing
            .register_notify_listener(&self.details, &subscription, listener);
        let id = subscription.subscription_id.clone();

        let result = self
            .call(
                InteractionType::PubSub,
                stages::PUBSUB_REGISTER_STAGE,
                self.details.service.operation,
                MessageBody::Subscription(subscription),
            )
            .await;
        if result.is_err() {
            self.routing.deregister_notify_listener(&self.details, &[id]);
        }
        result
    }

    pub async fn deregister(&self, subscription_ids: Vec<String>) -> Result<MalMessage> {
        self.routing
            .deregister_notify_listener(&self.details, &subscription_ids);
        self.call(
            InteractionType::PubSub,
            stages::PUBSUB_DEREGISTER_STAGE,
            self.details.service.operation,
            MessageBody::IdentifierList(subscription_ids),
        )
        .await
    }

    /// Register as a publisher of `keys`; publish errors go to `listener`
    pub async fn publish_register(
        &self,
        keys: Vec<EntityKey>,
        listener: Arc<dyn PublishListener>,
    ) -> Result<MalMessage> {
        self.routing.register_publish_listener(&self.details, listener);
        let result = self
            .call(
                InteractionType::PubSub,
                stages::PUBSUB_PUBLISH_REGISTER_STAGE,
                self.details.service.operation,
                MessageBody::EntityKeyList(keys),
            )
            .await;
        if result.is_err() {
            self.routing
                .get_publish_listener_and_remove(&self.routing.publisher_key(&self.details));
        }
        result
    }

    /// Publish updates; there is no acknowledgement
    pub async fn publish(&self, updates: Vec<Update>) -> Result<()> {
        self.initiate(
            InteractionType::PubSub,
            Some(stages::PUBSUB_PUBLISH_STAGE),
            self.details.service.operation,
            MessageBody::UpdateList(updates),
            None,
        )
        .await
        .map(|_| ())
    }

    pub async fn publish_deregister(&self) -> Result<MalMessage> {
        self.routing
            .get_publish_listener_and_remove(&self.routing.publisher_key(&self.details));
        self.call(
            InteractionType::PubSub,
            stages::PUBSUB_PUBLISH_DEREGISTER_STAGE,
            self.details.service.operation,
            MessageBody::Empty,
        )
        .await
    }

    pub async fn async_submit(
        &self,
        operation: u16,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<u64> {
        self.initiate(
            InteractionType::Submit,
            Some(stages::SUBMIT_STAGE),
            operation,
            body,
            Some(ConsumerListener::Interaction(listener)),
        )
        .await
    }

    pub async fn async_request(
        &self,
        operation: u16,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<u64> {
        self.initiate(
            InteractionType::Request,
            Some(stages::REQUEST_STAGE),
            operation,
            body,
            Some(ConsumerListener::Interaction(listener)),
        )
        .await
    }

    pub async fn async_invoke(
        &self,
        operation: u16,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<u64> {
        self.initiate(
            InteractionType::Invoke,
            Some(stages::INVOKE_STAGE),
            operation,
            body,
            Some(ConsumerListener::Interaction(listener)),
        )
        .await
    }

    pub async fn async_progress(
        &self,
        operation: u16,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<u64> {
        self.initiate(
            InteractionType::Progress,
            Some(stages::PROGRESS_STAGE),
            operation,
            body,
            Some(ConsumerListener::Interaction(listener)),
        )
        .await
    }

    /// Subscribe asynchronously; the ack and every notify go to `listener`
    pub async fn async_register(
        &self,
        subscription: Subscription,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<u64> {
        self.routing
            .register_notify_listener(&self.details, &subscription, listener.clone());
        let id = subscription.subscription_id.clone();

        let registration = Arc::new(RegistrationListener {
            inner: listener,
            routing: self.routing.clone(),
            details: self.details.clone(),
            subscription_id: id.clone(),
        });

        let result = self
            .initiate(
                InteractionType::PubSub,
                Some(stages::PUBSUB_REGISTER_STAGE),
                self.details.service.operation,
                MessageBody::Subscription(subscription),
                Some(ConsumerListener::Interaction(registration)),
            )
            .await;
        if result.is_err() {
            self.routing.deregister_notify_listener(&self.details, &[id]);
        }
        result
    }

    pub async fn async_deregister(
        &self,
        subscription_ids: Vec<String>,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<u64> {
        self.routing
            .deregister_notify_listener(&self.details, &subscription_ids);
        self.initiate(
            InteractionType::PubSub,
            Some(stages::PUBSUB_DEREGISTER_STAGE),
            self.details.service.operation,
            MessageBody::IdentifierList(subscription_ids),
            Some(ConsumerListener::Interaction(listener)),
        )
        .await
    }

    pub async fn async_publish_register(
        &self,
        keys: Vec<EntityKey>,
        listener: Arc<dyn PublishListener>,
    ) -> Result<u64> {
        self.routing
            .register_publish_listener(&self.details, listener.clone());
        let result = self
            .initiate(
                InteractionType::PubSub,
                Some(stages::PUBSUB_PUBLISH_REGISTER_STAGE),
                self.details.service.operation,
                MessageBody::EntityKeyList(keys),
                Some(ConsumerListener::Publish(listener)),
            )
            .await;
        if result.is_err() {
            self.routing
                .get_publish_listener_and_remove(&self.routing.publisher_key(&self.details));
        }
        result
    }

    pub async fn async_publish_deregister(&self, listener: Arc<dyn PublishListener>) -> Result<u64> {
        self.routing
            .get_publish_listener_and_remove(&self.routing.publisher_key(&self.details));
        self.initiate(
            InteractionType::PubSub,
            Some(stages::PUBSUB_PUBLISH_DEREGISTER_STAGE),
            self.details.service.operation,
            MessageBody::Empty,
            Some(ConsumerListener::Publish(listener)),
        )
        .await
    }

    /// Resume receiving the stages of an interaction after `last_stage`
    pub fn continue_interaction(
        &self,
        interaction_type: InteractionType,
        last_stage: u8,
        transaction_id: u64,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<()> {
        self.table.continue_transaction(
            interaction_type,
            last_stage,
            transaction_id,
            ConsumerListener::Interaction(listener),
        )
    }

    async fn call(
        &self,
        interaction_type: InteractionType,
        stage: u8,
        operation: u16,
        body: MessageBody,
    ) -> Result<MalMessage> {
        let pending = self
            .pending(interaction_type, Some(stage), operation, body)
            .await?;
        pending.next_stage().await
    }

    async fn call_multi(
        &self,
        interaction_type: InteractionType,
        stage: u8,
        operation: u16,
        body: MessageBody,
    ) -> Result<(MalMessage, PendingInteraction)> {
        let pending = self
            .pending(interaction_type, Some(stage), operation, body)
            .await?;
        let ack = pending.next_stage().await?;
        Ok((ack, pending))
    }

    /// Start a synchronous interaction. The entry is abandoned as soon as
    /// the returned handle is dropped, including when the caller stops
    /// polling mid-wait.
    async fn pending(
        &self,
        interaction_type: InteractionType,
        stage: Option<u8>,
        operation: u16,
        body: MessageBody,
    ) -> Result<PendingInteraction> {
        let transaction_id = self
            .initiate(interaction_type, stage, operation, body, None)
            .await?;
        Ok(PendingInteraction {
            table: self.table.clone(),
            transaction_id,
            wait_timeout: self.wait_timeout,
        })
    }

    /// Record the interaction and send its initial stage
    async fn initiate(
        &self,
        interaction_type: InteractionType,
        stage: Option<u8>,
        operation: u16,
        body: MessageBody,
        listener: Option<ConsumerListener>,
    ) -> Result<u64> {
        let transaction_id = self
            .table
            .create_transaction(interaction_type, stage, listener)?;
        let guard = AbandonOnDrop {
            table: &self.table,
            transaction_id,
        };

        let header = self
            .details
            .header(interaction_type, stage, operation)
            .with_transaction_id(transaction_id);
        let message = MalMessage::new(header, body)
            .with_qos_properties(self.details.qos_properties.clone());

        debug!(
            transaction_id,
            ?interaction_type,
            ?stage,
            uri = %message.header.uri_to,
            "Sending initial stage"
        );
        if let Err(err) = self.details.endpoint.send(message).await {
            warn!(transaction_id, %err, "Initial stage could not be sent");
            return Err(err);
        }
        guard.disarm();
        Ok(transaction_id)
    }
}

/// Removes a just-created entry unless the initial stage went out
struct AbandonOnDrop<'a> {
    table: &'a ConsumerInteractionTable,
    transaction_id: u64,
}

impl AbandonOnDrop<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        self.table.abandon(self.transaction_id);
    }
}

/// Listener of a register interaction: a rejected registration also drops
/// the notify route set up for it
struct RegistrationListener {
    inner: Arc<dyn InteractionListener>,
    routing: Arc<PubSubRoutingTable>,
    details: Arc<MessageDetails>,
    subscription_id: String,
}

#[async_trait]
impl InteractionListener for RegistrationListener {
    async fn register_ack_received(&self, message: &MalMessage) {
        self.inner.register_ack_received(message).await;
    }

    async fn register_error_received(&self, header: &MessageHeader, error: &MalStandardError) {
        self.routing
            .deregister_notify_listener(&self.details, std::slice::from_ref(&self.subscription_id));
        self.inner.register_error_received(header, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MalError;
    use crate::test_utils::{CollectingEndpoint, ManualClock, RecordingListener};
    use crate::transaction::TransactionIdAllocator;
    use mal_types::ServiceKey;

    const EPOCH: u64 = 1_262_304_000;

    struct Fixture {
        endpoint: Arc<CollectingEndpoint>,
        table: Arc<ConsumerInteractionTable>,
        routing: Arc<PubSubRoutingTable>,
        consumer: Consumer,
    }

    fn fixture() -> Fixture {
        let endpoint = Arc::new(CollectingEndpoint::new("malhttp://consumer"));
        let allocator = TransactionIdAllocator::with_clock(EPOCH, Arc::new(ManualClock::new(EPOCH + 7)));
        let table = Arc::new(ConsumerInteractionTable::new(
            Arc::new(allocator),
            Duration::from_secs(2),
        ));
        let routing = Arc::new(PubSubRoutingTable::new("::"));
        let details = MessageDetails::new(endpoint.clone(), "malhttp://provider", ServiceKey::new(2, 3, 0, 1))
            .with_broker("malhttp://broker");
        let consumer = Consumer::new(details, table.clone(), routing.clone());
        Fixture {
            endpoint,
            table,
            routing,
            consumer,
        }
    }

    fn reply_to(sent: &MalMessage, stage: u8) -> MalMessage {
        MalMessage::new(sent.header.reply(stage, false), MessageBody::Empty)
    }

    /// Wait until the endpoint has `count` messages and return the last one
    async fn sent(endpoint: &CollectingEndpoint, count: usize) -> MalMessage {
        for _ in 0..200 {
            if endpoint.message_count() >= count {
                return endpoint.sent_messages()[count - 1].clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("endpoint never reached {} messages", count);
    }

    #[tokio::test]
    async fn test_send_allocates_but_records_nothing() {
        let f = fixture();
        f.consumer.send(4, MessageBody::Empty).await.unwrap();

        let sent = f.endpoint.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header.interaction_type, InteractionType::Send);
        assert_eq!(sent[0].header.service.operation, 4);
        assert!(sent[0].header.transaction_id.is_some());
        assert!(f.table.is_empty());
    }

    #[tokio::test]
    async fn test_sync_submit_waits_for_ack() {
        let f = fixture();
        let consumer = f.consumer.clone();
        let call = tokio::spawn(async move { consumer.submit(1, MessageBody::Empty).await });

        let request = sent(&f.endpoint, 1).await;
        assert_eq!(request.header.uri_to, "malhttp://provider");
        f.table
            .handle_stage(reply_to(&request, stages::SUBMIT_ACK_STAGE))
            .await
            .unwrap();

        let ack = call.await.unwrap().unwrap();
        assert_eq!(ack.transaction_id(), request.transaction_id());
        assert!(f.table.is_empty());
    }

    #[tokio::test]
    async fn test_sync_progress_streams_updates() {
        let f = fixture();
        let consumer = f.consumer.clone();
        let call = tokio::spawn(async move { consumer.progress(9, MessageBody::Empty).await });

        let request = sent(&f.endpoint, 1).await;
        for stage in [
            stages::PROGRESS_ACK_STAGE,
            stages::PROGRESS_UPDATE_STAGE,
            stages::PROGRESS_UPDATE_STAGE,
            stages::PROGRESS_RESPONSE_STAGE,
        ] {
            f.table.handle_stage(reply_to(&request, stage)).await.unwrap();
        }

        let (ack, pending) = call.await.unwrap().unwrap();
        assert_eq!(ack.header.interaction_stage, Some(stages::PROGRESS_ACK_STAGE));

        let mut seen = Vec::new();
        while pending.is_pending() {
            seen.push(pending.next_stage().await.unwrap().header.stage_or_zero());
        }
        assert_eq!(
            seen,
            vec![
                stages::PROGRESS_UPDATE_STAGE,
                stages::PROGRESS_UPDATE_STAGE,
                stages::PROGRESS_RESPONSE_STAGE
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_pending_interaction_is_abandoned() {
        let f = fixture();
        let consumer = f.consumer.clone();
        let call = tokio::spawn(async move { consumer.invoke(2, MessageBody::Empty).await });

        let request = sent(&f.endpoint, 1).await;
        f.table
            .handle_stage(reply_to(&request, stages::INVOKE_ACK_STAGE))
            .await
            .unwrap();

        let (_, pending) = call.await.unwrap().unwrap();
        assert!(pending.is_pending());
        drop(pending);
        assert!(f.table.is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_abandons_transaction() {
        let f = fixture();
        f.endpoint.fail_next_send();

        let err = f.consumer.request(1, MessageBody::Empty).await.unwrap_err();
        assert!(matches!(err, MalError::Transport(_)));
        assert!(f.table.is_empty());
    }

    #[tokio::test]
    async fn test_register_routes_to_broker_and_keeps_listener() {
        let f = fixture();
        let listener = Arc::new(RecordingListener::new());
        let consumer = f.consumer.clone();
        let call_listener = listener.clone();
        let call = tokio::spawn(async move {
            consumer
                .register(Subscription::new("sub-1", vec![EntityKey::named("temp")]), call_listener)
                .await
        });

        let register = sent(&f.endpoint, 1).await;
        assert_eq!(register.header.uri_to, "malhttp://broker");
        assert!(matches!(register.body, MessageBody::Subscription(_)));
        f.table
            .handle_stage(reply_to(&register, stages::PUBSUB_REGISTER_ACK_STAGE))
            .await
            .unwrap();

        call.await.unwrap().unwrap();
        assert!(f.routing.get_notify_listener("malhttp://consumer", "sub-1").is_some());
    }

    #[tokio::test]
    async fn test_failed_register_removes_listener() {
        let f = fixture();
        let consumer = f.consumer.clone();
        let call = tokio::spawn(async move {
            consumer
                .register(Subscription::new("sub-2", vec![]), Arc::new(RecordingListener::new()))
                .await
        });

        let register = sent(&f.endpoint, 1).await;
        let error = MalMessage::error(
            register.header.reply(stages::PUBSUB_REGISTER_ACK_STAGE, true),
            MalStandardError::new(mal_types::standard_errors::DESTINATION_UNKNOWN, None),
        );
        f.table.handle_stage(error).await.unwrap();

        assert!(call.await.unwrap().is_err());
        assert!(f.routing.get_notify_listener("malhttp://consumer", "sub-2").is_none());
    }

    #[tokio::test]
    async fn test_async_invoke_reports_through_listener() {
        let f = fixture();
        let listener = Arc::new(RecordingListener::new());
        let tid = f
            .consumer
            .async_invoke(5, MessageBody::Empty, listener.clone())
            .await
            .unwrap();

        let ack = MessageHeader::new("malhttp://provider", "malhttp://consumer", InteractionType::Invoke, Some(stages::INVOKE_ACK_STAGE))
            .with_transaction_id(tid);
        f.table
            .handle_stage(MalMessage::new(ack, MessageBody::Empty))
            .await
            .unwrap();

        assert_eq!(listener.callbacks(), vec!["invoke_ack_received"]);
        assert!(f.table.contains(tid));
    }

    #[tokio::test]
    async fn test_publish_has_no_pending_entry() {
        let f = fixture();
        f.consumer.publish(vec![]).await.unwrap();
        assert!(f.table.is_empty());
        let sent = f.endpoint.sent_messages();
        assert_eq!(sent[0].header.interaction_stage, Some(stages::PUBSUB_PUBLISH_STAGE));
        assert_eq!(sent[0].header.uri_to, "malhttp://broker");
    }

    #[tokio::test]
    async fn test_cancelled_request_abandons_transaction() {
        let f = fixture();
        let waited = tokio::time::timeout(
            Duration::from_millis(20),
            f.consumer.request(1, MessageBody::Empty),
        )
        .await;

        assert!(waited.is_err());
        assert_eq!(f.endpoint.message_count(), 1);
        assert_eq!(f.table.len(), 0);
    }

    #[tokio::test]
    async fn test_failed_async_publish_register_removes_listener() {
        let f = fixture();
        f.endpoint.fail_next_send();

        let result = f
            .consumer
            .async_publish_register(vec![], Arc::new(RecordingListener::new()))
            .await;
        assert!(result.is_err());

        let key = f.routing.publisher_key(f.consumer.details());
        assert!(f.routing.get_publish_listener(&key).is_none());
        assert!(f.table.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_async_register_removes_notify_route() {
        let f = fixture();
        let listener = Arc::new(RecordingListener::new());
        let tid = f
            .consumer
            .async_register(Subscription::new("sub-3", vec![]), listener.clone())
            .await
            .unwrap();
        assert!(f.routing.get_notify_listener("malhttp://consumer", "sub-3").is_some());

        let register = f.endpoint.sent_messages()[0].clone();
        let error = MalMessage::error(
            register.header.reply(stages::PUBSUB_REGISTER_ACK_STAGE, true),
            MalStandardError::new(mal_types::standard_errors::DESTINATION_UNKNOWN, None),
        );
        f.table.handle_stage(error).await.unwrap();

        assert_eq!(listener.callbacks(), vec!["register_error_received"]);
        assert!(f.routing.get_notify_listener("malhttp://consumer", "sub-3").is_none());
        assert!(!f.table.contains(tid));
    }

    #[tokio::test]
    async fn test_accepted_async_register_keeps_notify_route() {
        let f = fixture();
        let listener = Arc::new(RecordingListener::new());
        f.consumer
            .async_register(Subscription::new("sub-4", vec![]), listener.clone())
            .await
            .unwrap();

        let register = f.endpoint.sent_messages()[0].clone();
        f.table
            .handle_stage(reply_to(&register, stages::PUBSUB_REGISTER_ACK_STAGE))
            .await
            .unwrap();

        assert_eq!(listener.callbacks(), vec!["register_ack_received"]);
        assert!(f.routing.get_notify_listener("malhttp://consumer", "sub-4").is_some());
    }
}
