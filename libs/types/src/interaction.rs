//! Interaction patterns, stage numbers and QoS enumerations

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// The six MAL interaction patterns
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
pub enum InteractionType {
    /// Fire-and-forget, no reply of any kind
    Send = 1,
    /// Single acknowledgement
    Submit = 2,
    /// Single response carrying data
    Request = 3,
    /// Acknowledgement then response
    Invoke = 4,
    /// Acknowledgement, updates, then response
    Progress = 5,
    /// Broker mediated publish-subscribe
    PubSub = 6,
}

impl InteractionType {
    /// True when the pattern has a reply that must be correlated by transaction id
    pub fn expects_reply(&self) -> bool {
        !matches!(self, InteractionType::Send)
    }
}

/// Stage numbers of each pattern. Numbering restarts per pattern.
pub mod stages {
    pub const SUBMIT_STAGE: u8 = 1;
    pub const SUBMIT_ACK_STAGE: u8 = 2;

    pub const REQUEST_STAGE: u8 = 1;
    pub const REQUEST_RESPONSE_STAGE: u8 = 2;

    pub const INVOKE_STAGE: u8 = 1;
    pub const INVOKE_ACK_STAGE: u8 = 2;
    pub const INVOKE_RESPONSE_STAGE: u8 = 3;

    pub const PROGRESS_STAGE: u8 = 1;
    pub const PROGRESS_ACK_STAGE: u8 = 2;
    pub const PROGRESS_UPDATE_STAGE: u8 = 3;
    pub const PROGRESS_RESPONSE_STAGE: u8 = 4;

    pub const PUBSUB_REGISTER_STAGE: u8 = 1;
    pub const PUBSUB_REGISTER_ACK_STAGE: u8 = 2;
    pub const PUBSUB_PUBLISH_REGISTER_STAGE: u8 = 3;
    pub const PUBSUB_PUBLISH_REGISTER_ACK_STAGE: u8 = 4;
    pub const PUBSUB_PUBLISH_STAGE: u8 = 5;
    pub const PUBSUB_NOTIFY_STAGE: u8 = 6;
    pub const PUBSUB_DEREGISTER_STAGE: u8 = 7;
    pub const PUBSUB_DEREGISTER_ACK_STAGE: u8 = 8;
    pub const PUBSUB_PUBLISH_DEREGISTER_STAGE: u8 = 9;
    pub const PUBSUB_PUBLISH_DEREGISTER_ACK_STAGE: u8 = 10;
}

/// Delivery guarantee requested for a message. Echoed, never interpreted, by the core.
#[repr(u8)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
pub enum QosLevel {
    #[default]
    BestEffort = 1,
    Assured = 2,
    Queued = 3,
    Timely = 4,
}

/// Session a message belongs to
#[repr(u8)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
pub enum SessionType {
    #[default]
    Live = 1,
    Simulation = 2,
    Replay = 3,
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionType::Live => "LIVE",
            SessionType::Simulation => "SIMULATION",
            SessionType::Replay => "REPLAY",
        };
        f.write_str(name)
    }
}
