//! Consumer and publisher callbacks
//!
//! Asynchronous interactions report each stage through one of these
//! listeners, invoked on the dispatching task. Every method has a no-op
//! default so listeners only implement what their interaction can receive.

use async_trait::async_trait;
use mal_types::{stages, InteractionType, MalMessage, MalStandardError, MessageHeader};
use std::sync::Arc;
use tracing::warn;

/// Callbacks of consumer-side interactions and pub-sub subscriptions
#[async_trait]
#[allow(unused_variables)]
pub trait InteractionListener: Send + Sync {
    async fn submit_ack_received(&self, message: &MalMessage) {}
    async fn submit_error_received(&self, header: &MessageHeader, error: &MalStandardError) {}

    async fn request_response_received(&self, message: &MalMessage) {}
    async fn request_error_received(&self, header: &MessageHeader, error: &MalStandardError) {}

    async fn invoke_ack_received(&self, message: &MalMessage) {}
    async fn invoke_ack_error_received(&self, header: &MessageHeader, error: &MalStandardError) {}
    async fn invoke_response_received(&self, message: &MalMessage) {}
    async fn invoke_response_error_received(
        &self,
        header: &MessageHeader,
        error: &MalStandardError,
    ) {
    }

    async fn progress_ack_received(&self, message: &MalMessage) {}
    async fn progress_ack_error_received(&self, header: &MessageHeader, error: &MalStandardError) {}
    async fn progress_update_received(&self, message: &MalMessage) {}
    async fn progress_update_error_received(
        &self,
        header: &MessageHeader,
        error: &MalStandardError,
    ) {
    }
    async fn progress_response_received(&self, message: &MalMessage) {}
    async fn progress_response_error_received(
        &self,
        header: &MessageHeader,
        error: &MalStandardError,
    ) {
    }

    async fn register_ack_received(&self, message: &MalMessage) {}
    async fn register_error_received(&self, header: &MessageHeader, error: &MalStandardError) {}
    async fn deregister_ack_received(&self, message: &MalMessage) {}
    async fn deregister_error_received(&self, header: &MessageHeader, error: &MalStandardError) {}

    async fn notify_received(&self, message: &MalMessage) {}
    async fn notify_error_received(&self, header: &MessageHeader, error: &MalStandardError) {}
}

/// Callbacks of the publishing side of pub-sub
#[async_trait]
#[allow(unused_variables)]
pub trait PublishListener: Send + Sync {
    async fn publish_register_ack_received(&self, message: &MalMessage) {}
    async fn publish_register_error_received(
        &self,
        header: &MessageHeader,
        error: &MalStandardError,
    ) {
    }
    async fn publish_error_received(&self, header: &MessageHeader, error: &MalStandardError) {}
    async fn publish_deregister_ack_received(&self, message: &MalMessage) {}
}

/// What arrived for an interaction: a stage message or an error at a stage
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Message(MalMessage),
    Error {
        header: MessageHeader,
        error: MalStandardError,
    },
}

impl StageOutcome {
    /// Classify a received stage message by its error flag
    pub fn from_message(message: MalMessage) -> Self {
        match message.error_body() {
            Some(error) => StageOutcome::Error {
                header: message.header,
                error,
            },
            None => StageOutcome::Message(message),
        }
    }

    pub fn header(&self) -> &MessageHeader {
        match self {
            StageOutcome::Message(message) => &message.header,
            StageOutcome::Error { header, .. } => header,
        }
    }
}

/// Listener attached to an asynchronous consumer interaction
#[derive(Clone)]
pub enum ConsumerListener {
    Interaction(Arc<dyn InteractionListener>),
    Publish(Arc<dyn PublishListener>),
}

impl std::fmt::Debug for ConsumerListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerListener::Interaction(_) => f.write_str("ConsumerListener::Interaction"),
            ConsumerListener::Publish(_) => f.write_str("ConsumerListener::Publish"),
        }
    }
}

impl ConsumerListener {
    /// Invoke the callback matching the outcome's interaction type and stage
    pub async fn deliver(&self, outcome: StageOutcome) {
        match self {
            ConsumerListener::Interaction(listener) => {
                deliver_interaction(listener.as_ref(), outcome).await
            }
            ConsumerListener::Publish(listener) => deliver_publish(listener.as_ref(), outcome).await,
        }
    }
}

async fn deliver_interaction(listener: &dyn InteractionListener, outcome: StageOutcome) {
    let interaction_type = outcome.header().interaction_type;
    let stage = outcome.header().stage_or_zero();

    match (interaction_type, stage, outcome) {
        (InteractionType::Submit, _, StageOutcome::Message(m)) => {
            listener.submit_ack_received(&m).await
        }
        (InteractionType::Submit, _, StageOutcome::Error { header, error }) => {
            listener.submit_error_received(&header, &error).await
        }
        (InteractionType::Request, _, StageOutcome::Message(m)) => {
            listener.request_response_received(&m).await
        }
        (InteractionType::Request, _, StageOutcome::Error { header, error }) => {
            listener.request_error_received(&header, &error).await
        }
        (InteractionType::Invoke, stages::INVOKE_ACK_STAGE, StageOutcome::Message(m)) => {
            listener.invoke_ack_received(&m).await
        }
        (InteractionType::Invoke, stages::INVOKE_ACK_STAGE, StageOutcome::Error { header, error }) => {
            listener.invoke_ack_error_received(&header, &error).await
        }
        (InteractionType::Invoke, _, StageOutcome::Message(m)) => {
            listener.invoke_response_received(&m).await
        }
        (InteractionType::Invoke, _, StageOutcome::Error { header, error }) => {
            listener.invoke_response_error_received(&header, &error).await
        }
        (InteractionType::Progress, stages::PROGRESS_ACK_STAGE, StageOutcome::Message(m)) => {
            listener.progress_ack_received(&m).await
        }
        (InteractionType::Progress, stages::PROGRESS_ACK_STAGE, StageOutcome::Error { header, error }) => {
            listener.progress_ack_error_received(&header, &error).await
        }
        (InteractionType::Progress, stages::PROGRESS_UPDATE_STAGE, StageOutcome::Message(m)) => {
            listener.progress_update_received(&m).await
        }
        (InteractionType::Progress, stages::PROGRESS_UPDATE_STAGE, StageOutcome::Error { header, error }) => {
            listener.progress_update_error_received(&header, &error).await
        }
        (InteractionType::Progress, _, StageOutcome::Message(m)) => {
            listener.progress_response_received(&m).await
        }
        (InteractionType::Progress, _, StageOutcome::Error { header, error }) => {
            listener.progress_response_error_received(&header, &error).await
        }
        (InteractionType::PubSub, stages::PUBSUB_DEREGISTER_ACK_STAGE, StageOutcome::Message(m)) => {
            listener.deregister_ack_received(&m).await
        }
        (InteractionType::PubSub, stages::PUBSUB_DEREGISTER_ACK_STAGE, StageOutcome::Error { header, error }) => {
            listener.deregister_error_received(&header, &error).await
        }
        (InteractionType::PubSub, stages::PUBSUB_NOTIFY_STAGE, StageOutcome::Message(m)) => {
            listener.notify_received(&m).await
        }
        (InteractionType::PubSub, stages::PUBSUB_NOTIFY_STAGE, StageOutcome::Error { header, error }) => {
            listener.notify_error_received(&header, &error).await
        }
        (InteractionType::PubSub, _, StageOutcome::Message(m)) => {
            listener.register_ack_received(&m).await
        }
        (InteractionType::PubSub, _, StageOutcome::Error { header, error }) => {
            listener.register_error_received(&header, &error).await
        }
        (InteractionType::Send, _, _) => {
            warn!("Send interactions have no replies, outcome dropped");
        }
    }
}

async fn deliver_publish(listener: &dyn PublishListener, outcome: StageOutcome) {
    let stage = outcome.header().stage_or_zero();

    match (stage, outcome) {
        (stages::PUBSUB_PUBLISH_DEREGISTER_ACK_STAGE, StageOutcome::Message(m)) => {
            listener.publish_deregister_ack_received(&m).await
        }
        (stages::PUBSUB_PUBLISH_REGISTER_ACK_STAGE, StageOutcome::Error { header, error }) => {
            listener.publish_register_error_received(&header, &error).await
        }
        (_, StageOutcome::Message(m)) => listener.publish_register_ack_received(&m).await,
        (_, StageOutcome::Error { header, error }) => {
            listener.publish_error_received(&header, &error).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingListener;
    use mal_types::{standard_errors, MessageBody};

    fn message(interaction_type: InteractionType, stage: u8, is_error: bool) -> MalMessage {
        let header = MessageHeader::new("p", "c", interaction_type, Some(stage))
            .with_transaction_id(9)
            .with_error_flag(is_error);
        let body = if is_error {
            MessageBody::Error(MalStandardError::new(standard_errors::INTERNAL, None))
        } else {
            MessageBody::Empty
        };
        MalMessage::new(header, body)
    }

    #[tokio::test]
    async fn test_invoke_callbacks_by_stage() {
        let recorder = Arc::new(RecordingListener::new());
        let listener = ConsumerListener::Interaction(recorder.clone());

        listener
            .deliver(StageOutcome::from_message(message(
                InteractionType::Invoke,
                stages::INVOKE_ACK_STAGE,
                false,
            )))
            .await;
        listener
            .deliver(StageOutcome::from_message(message(
                InteractionType::Invoke,
                stages::INVOKE_RESPONSE_STAGE,
                true,
            )))
            .await;

        assert_eq!(
            recorder.callbacks(),
            vec!["invoke_ack_received", "invoke_response_error_received"]
        );
    }

    #[tokio::test]
    async fn test_publish_listener_callbacks() {
        let recorder = Arc::new(RecordingListener::new());
        let listener = ConsumerListener::Publish(recorder.clone());

        listener
            .deliver(StageOutcome::from_message(message(
                InteractionType::PubSub,
                stages::PUBSUB_PUBLISH_REGISTER_ACK_STAGE,
                false,
            )))
            .await;
        listener
            .deliver(StageOutcome::from_message(message(
                InteractionType::PubSub,
                stages::PUBSUB_PUBLISH_REGISTER_ACK_STAGE,
                true,
            )))
            .await;
        listener
            .deliver(StageOutcome::from_message(message(
                InteractionType::PubSub,
                stages::PUBSUB_PUBLISH_DEREGISTER_ACK_STAGE,
                false,
            )))
            .await;

        assert_eq!(
            recorder.callbacks(),
            vec![
                "publish_register_ack_received",
                "publish_register_error_received",
                "publish_deregister_ack_received"
            ]
        );
    }
}
