//! Provider-side interaction contexts
//!
//! Each context wraps the received initial stage and the provider address
//! it arrived at, and sends the replies the pattern allows in the order the
//! pattern allows them. Contexts are cheap to clone; clones share the reply
//! progress.

use crate::details::Address;
use crate::error::{MalError, Result};
use crate::sender::MessageSender;
use mal_types::{stages, MalMessage, MalStandardError, MessageBody, MessageHeader};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default, Clone, Copy)]
struct ReplyProgress {
    ack_sent: bool,
    complete: bool,
}

struct InteractionCore {
    message: MalMessage,
    address: Arc<Address>,
    sender: MessageSender,
    progress: Mutex<ReplyProgress>,
}

impl InteractionCore {
    fn new(message: MalMessage, address: Arc<Address>, sender: MessageSender) -> Arc<Self> {
        Arc::new(Self {
            message,
            address,
            sender,
            progress: Mutex::new(ReplyProgress::default()),
        })
    }

    /// Check a reply is allowed and record it before sending. Returns the
    /// progress to restore if the send fails.
    fn advance(
        &self,
        stage: u8,
        requires_ack: bool,
        marks_ack: bool,
        completes: bool,
    ) -> Result<ReplyProgress> {
        let mut progress = self.progress.lock();
        let previous = *progress;
        let header = &self.message.header;
        if progress.complete {
            return Err(MalError::incorrect_state(
                "interaction already complete",
                header.transaction_id,
                Some(stage),
            ));
        }
        if requires_ack && !progress.ack_sent {
            return Err(MalError::incorrect_state(
                "acknowledgement not sent yet",
                header.transaction_id,
                Some(stage),
            ));
        }
        if marks_ack && progress.ack_sent {
            return Err(MalError::incorrect_state(
                "acknowledgement already sent",
                header.transaction_id,
                Some(stage),
            ));
        }
        progress.ack_sent |= marks_ack;
        progress.complete |= completes;
        Ok(previous)
    }

    /// Undo an [`advance`](Self::advance) whose reply never left
    fn rollback<T>(&self, previous: ReplyProgress, result: Result<T>) -> Result<T> {
        if result.is_err() {
            *self.progress.lock() = previous;
        }
        result
    }

    async fn reply(
        &self,
        stage: u8,
        body: MessageBody,
        requires_ack: bool,
        marks_ack: bool,
        completes: bool,
    ) -> Result<()> {
        let previous = self.advance(stage, requires_ack, marks_ack, completes)?;
        let sent = self
            .sender
            .return_response(
                &self.address,
                &self.message.header,
                &self.message.qos_properties,
                stage,
                body,
            )
            .await;
        self.rollback(previous, sent)
    }

    async fn error(&self, stage: u8, requires_ack: bool, error: MalStandardError) -> Result<()> {
        let previous = self.advance(stage, requires_ack, false, true)?;
        let sent = self
            .sender
            .return_error(&self.address, &self.message.header, stage, error)
            .await;
        self.rollback(previous, sent)
    }

    /// Stage an error is returned at: before the ack the ack stage,
    /// afterwards the final stage
    fn error_stage(&self, ack_stage: u8, final_stage: u8) -> Option<u8> {
        let progress = self.progress.lock();
        match (progress.complete, progress.ack_sent) {
            (true, _) => None,
            (false, false) => Some(ack_stage),
            (false, true) => Some(final_stage),
        }
    }
}

macro_rules! interaction_accessors {
    ($name:ident) => {
        impl $name {
            /// The received initial stage
            pub fn message(&self) -> &MalMessage {
                &self.core.message
            }

            pub fn header(&self) -> &MessageHeader {
                &self.core.message.header
            }

            pub fn body(&self) -> &MessageBody {
                &self.core.message.body
            }

            pub fn address(&self) -> &Address {
                &self.core.address
            }

            pub fn is_complete(&self) -> bool {
                self.core.progress.lock().complete
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("transaction_id", &self.core.message.header.transaction_id)
                    .field("progress", &*self.core.progress.lock())
                    .finish()
            }
        }
    };
}

/// A received Send: nothing can be returned
#[derive(Clone)]
pub struct SendInteraction {
    core: Arc<InteractionCore>,
}

#[derive(Clone)]
pub struct SubmitInteraction {
    core: Arc<InteractionCore>,
}

#[derive(Clone)]
pub struct RequestInteraction {
    core: Arc<InteractionCore>,
}

#[derive(Clone)]
pub struct InvokeInteraction {
    core: Arc<InteractionCore>,
}

#[derive(Clone)]
pub struct ProgressInteraction {
    core: Arc<InteractionCore>,
}

interaction_accessors!(SendInteraction);
interaction_accessors!(SubmitInteraction);
interaction_accessors!(RequestInteraction);
interaction_accessors!(InvokeInteraction);
interaction_accessors!(ProgressInteraction);

impl SendInteraction {
    pub fn new(message: MalMessage, address: Arc<Address>, sender: MessageSender) -> Self {
        Self {
            core: InteractionCore::new(message, address, sender),
        }
    }
}

impl SubmitInteraction {
    pub fn new(message: MalMessage, address: Arc<Address>, sender: MessageSender) -> Self {
        Self {
            core: InteractionCore::new(message, address, sender),
        }
    }

    pub async fn send_acknowledgement(&self) -> Result<()> {
        self.core
            .reply(stages::SUBMIT_ACK_STAGE, MessageBody::Empty, false, true, true)
            .await
    }

    pub async fn send_error(&self, error: MalStandardError) -> Result<()> {
        self.core.error(stages::SUBMIT_ACK_STAGE, false, error).await
    }

    pub(crate) fn pending_error_stage(&self) -> Option<u8> {
        self.core
            .error_stage(stages::SUBMIT_ACK_STAGE, stages::SUBMIT_ACK_STAGE)
    }
}

impl RequestInteraction {
    pub fn new(message: MalMessage, address: Arc<Address>, sender: MessageSender) -> Self {
        Self {
            core: InteractionCore::new(message, address, sender),
        }
    }

    pub async fn send_response(&self, body: MessageBody) -> Result<()> {
        self.core
            .reply(stages::REQUEST_RESPONSE_STAGE, body, false, false, true)
            .await
    }

    pub async fn send_error(&self, error: MalStandardError) -> Result<()> {
        self.core
            .error(stages::REQUEST_RESPONSE_STAGE, false, error)
            .await
    }

    pub(crate) fn pending_error_stage(&self) -> Option<u8> {
        self.core
            .error_stage(stages::REQUEST_RESPONSE_STAGE, stages::REQUEST_RESPONSE_STAGE)
    }
}

impl InvokeInteraction {
    pub fn new(message: MalMessage, address: Arc<Address>, sender: MessageSender) -> Self {
        Self {
            core: InteractionCore::new(message, address, sender),
        }
    }

    pub async fn send_acknowledgement(&self, body: MessageBody) -> Result<()> {
        self.core
            .reply(stages::INVOKE_ACK_STAGE, body, false, true, false)
            .await
    }

    pub async fn send_response(&self, body: MessageBody) -> Result<()> {
        self.core
            .reply(stages::INVOKE_RESPONSE_STAGE, body, true, false, true)
            .await
    }

    /// Error at the acknowledgement, or at the response once acknowledged
    pub async fn send_error(&self, error: MalStandardError) -> Result<()> {
        match self.pending_error_stage() {
            Some(stage) => self.core.error(stage, false, error).await,
            None => Err(MalError::incorrect_state(
                "interaction already complete",
                self.header().transaction_id,
                None,
            )),
        }
    }

    pub(crate) fn pending_error_stage(&self) -> Option<u8> {
        self.core
            .error_stage(stages::INVOKE_ACK_STAGE, stages::INVOKE_RESPONSE_STAGE)
    }
}

impl ProgressInteraction {
    pub fn new(message: MalMessage, address: Arc<Address>, sender: MessageSender) -> Self {
        Self {
            core: InteractionCore::new(message, address, sender),
        }
    }

    pub async fn send_acknowledgement(&self, body: MessageBody) -> Result<()> {
        self.core
            .reply(stages::PROGRESS_ACK_STAGE, body, false, true, false)
            .await
    }

    pub async fn send_update(&self, body: MessageBody) -> Result<()> {
        self.core
            .reply(stages::PROGRESS_UPDATE_STAGE, body, true, false, false)
            .await
    }

    /// Terminates the interaction at the update stage
    pub async fn send_update_error(&self, error: MalStandardError) -> Result<()> {
        self.core
            .error(stages::PROGRESS_UPDATE_STAGE, true, error)
            .await
    }

    pub async fn send_response(&self, body: MessageBody) -> Result<()> {
        self.core
            .reply(stages::PROGRESS_RESPONSE_STAGE, body, true, false, true)
            .await
    }

    /// Error at the acknowledgement, or at the response once acknowledged
    pub async fn send_error(&self, error: MalStandardError) -> Result<()> {
        match self.pending_error_stage() {
            Some(stage) => self.core.error(stage, false, error).await,
            None => Err(MalError::incorrect_state(
                "interaction already complete",
                self.header().transaction_id,
                None,
            )),
        }
    }

    pub(crate) fn pending_error_stage(&self) -> Option<u8> {
        self.core
            .error_stage(stages::PROGRESS_ACK_STAGE, stages::PROGRESS_RESPONSE_STAGE)
    }
}
