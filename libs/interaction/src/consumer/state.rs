//! Per-pattern consumer state machines
//!
//! Each pending interaction holds one [`InteractionState`]. Stage arrival is
//! validated against the pattern's legal order; anything else is an
//! incorrect-state error and leaves the state untouched.

use crate::error::{MalError, Result};
use mal_types::{stages, InteractionType, MessageHeader};

/// One reply stage, received at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleReply {
    expected_stage: u8,
    received: bool,
}

impl SingleReply {
    fn new(expected_stage: u8) -> Self {
        Self {
            expected_stage,
            received: false,
        }
    }

    /// Shared by every submit-shaped pattern: the stage must be accepted
    /// and must not have been seen before
    fn accept(&mut self, stage_accepted: bool, header: &MessageHeader) -> Result<()> {
        if self.received || !stage_accepted {
            return Err(unexpected(header, "single reply already received or stage not expected"));
        }
        self.received = true;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvokeState {
    ack_received: bool,
    response_received: bool,
    terminal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressState {
    ack_received: bool,
    response_received: bool,
    terminal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionState {
    /// Submit, Request, PubSub register and deregister
    Submit(SingleReply),
    Invoke(InvokeState),
    Progress(ProgressState),
    /// PubSub publish-register and publish-deregister; any stage is accepted once
    Publish(SingleReply),
}

impl InteractionState {
    /// State of a newly initiated interaction, `None` when nothing will be correlated
    pub fn for_initiation(interaction_type: InteractionType, stage: Option<u8>) -> Result<Option<Self>> {
        let state = match (interaction_type, stage) {
            (InteractionType::Send, _) => None,
            (InteractionType::Submit, Some(stages::SUBMIT_STAGE)) => {
                Some(Self::Submit(SingleReply::new(stages::SUBMIT_ACK_STAGE)))
            }
            (InteractionType::Request, Some(stages::REQUEST_STAGE)) => {
                Some(Self::Submit(SingleReply::new(stages::REQUEST_RESPONSE_STAGE)))
            }
            (InteractionType::Invoke, Some(stages::INVOKE_STAGE)) => Some(Self::Invoke(InvokeState::default())),
            (InteractionType::Progress, Some(stages::PROGRESS_STAGE)) => {
                Some(Self::Progress(ProgressState::default()))
            }
            (InteractionType::PubSub, Some(stages::PUBSUB_REGISTER_STAGE)) => {
                Some(Self::Submit(SingleReply::new(stages::PUBSUB_REGISTER_ACK_STAGE)))
            }
            (InteractionType::PubSub, Some(stages::PUBSUB_DEREGISTER_STAGE)) => {
                Some(Self::Submit(SingleReply::new(stages::PUBSUB_DEREGISTER_ACK_STAGE)))
            }
            (InteractionType::PubSub, Some(stages::PUBSUB_PUBLISH_REGISTER_STAGE)) => {
                Some(Self::Publish(SingleReply::new(stages::PUBSUB_PUBLISH_REGISTER_ACK_STAGE)))
            }
            (InteractionType::PubSub, Some(stages::PUBSUB_PUBLISH_DEREGISTER_STAGE)) => {
                Some(Self::Publish(SingleReply::new(stages::PUBSUB_PUBLISH_DEREGISTER_ACK_STAGE)))
            }
            (InteractionType::PubSub, Some(stages::PUBSUB_PUBLISH_STAGE)) => None,
            (interaction_type, stage) => {
                return Err(MalError::incorrect_state(
                    format!("{:?} cannot be initiated at stage {:?}", interaction_type, stage),
                    None,
                    stage,
                ))
            }
        };
        Ok(state)
    }

    /// Rebuild the state of an interaction whose last seen stage is `last_stage`
    pub fn resume(interaction_type: InteractionType, last_stage: u8) -> Result<Self> {
        let state = match (interaction_type, last_stage) {
            (InteractionType::Invoke, stages::INVOKE_ACK_STAGE) => Self::Invoke(InvokeState {
                ack_received: true,
                ..InvokeState::default()
            }),
            (
                InteractionType::Progress,
                stages::PROGRESS_ACK_STAGE | stages::PROGRESS_UPDATE_STAGE,
            ) => Self::Progress(ProgressState {
                ack_received: true,
                ..ProgressState::default()
            }),
            (InteractionType::Send, _) => {
                return Err(MalError::incorrect_state(
                    "Send interactions cannot be continued",
                    None,
                    Some(last_stage),
                ))
            }
            (interaction_type, stage) => Self::for_initiation(interaction_type, Some(stage))?
                .ok_or_else(|| {
                    MalError::incorrect_state(
                        format!("{:?} has nothing left to receive after stage {}", interaction_type, stage),
                        None,
                        Some(stage),
                    )
                })?,
        };
        Ok(state)
    }

    /// Validate and record an arriving stage
    pub fn on_stage(&mut self, header: &MessageHeader) -> Result<()> {
        let stage = header.stage_or_zero();
        let is_error = header.is_error_message;

        match self {
            Self::Submit(reply) => {
                let expected = reply.expected_stage;
                reply.accept(stage == expected, header)
            }
            Self::Publish(reply) => reply.accept(true, header),
            Self::Invoke(state) => {
                if state.terminal {
                    return Err(unexpected(header, "invoke already complete"));
                }
                match stage {
                    stages::INVOKE_ACK_STAGE if !state.ack_received => {
                        state.ack_received = true;
                        state.terminal = is_error;
                        Ok(())
                    }
                    stages::INVOKE_RESPONSE_STAGE if state.ack_received && !state.response_received => {
                        state.response_received = true;
                        state.terminal = true;
                        Ok(())
                    }
                    _ => Err(unexpected(header, "invoke stage out of order")),
                }
            }
            Self::Progress(state) => {
                if state.terminal {
                    return Err(unexpected(header, "progress already complete"));
                }
                match stage {
                    stages::PROGRESS_ACK_STAGE if !state.ack_received => {
                        state.ack_received = true;
                        state.terminal = is_error;
                        Ok(())
                    }
                    stages::PROGRESS_UPDATE_STAGE if state.ack_received => {
                        state.terminal = is_error;
                        Ok(())
                    }
                    stages::PROGRESS_RESPONSE_STAGE if state.ack_received && !state.response_received => {
                        state.response_received = true;
                        state.terminal = true;
                        Ok(())
                    }
                    _ => Err(unexpected(header, "progress stage out of order")),
                }
            }
        }
    }

    /// Terminate on an error that did not arrive as a stage.
    ///
    /// Returns the stage the error is reported at, or `None` if the
    /// interaction had already finished.
    pub fn on_error(&mut self) -> Option<u8> {
        let stage = self.pending_stage()?;
        match self {
            Self::Submit(reply) | Self::Publish(reply) => reply.received = true,
            Self::Invoke(state) => state.terminal = true,
            Self::Progress(state) => state.terminal = true,
        }
        Some(stage)
    }

    /// Next stage this interaction is waiting for
    pub fn pending_stage(&self) -> Option<u8> {
        match self {
            Self::Submit(reply) | Self::Publish(reply) => {
                (!reply.received).then_some(reply.expected_stage)
            }
            Self::Invoke(state) if state.terminal => None,
            Self::Invoke(state) => Some(if state.ack_received {
                stages::INVOKE_RESPONSE_STAGE
            } else {
                stages::INVOKE_ACK_STAGE
            }),
            Self::Progress(state) if state.terminal => None,
            Self::Progress(state) => Some(if state.ack_received {
                stages::PROGRESS_RESPONSE_STAGE
            } else {
                stages::PROGRESS_ACK_STAGE
            }),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.pending_stage().is_none()
    }
}

fn unexpected(header: &MessageHeader, reason: &str) -> MalError {
    MalError::incorrect_state(
        format!(
            "{}: {:?} stage {:?}{}",
            reason,
            header.interaction_type,
            header.interaction_stage,
            if header.is_error_message { " (error)" } else { "" }
        ),
        header.transaction_id,
        header.interaction_stage,
    )
}
