//! Message body shapes
//!
//! The middleware never decodes operation payloads. It only needs to know the
//! high-level shape of a body: whether it is a subscription, a key list, an
//! update list, a notification, an identifier list or an error.

use crate::error::MalStandardError;
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Four-part key identifying a published entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EntityKey {
    pub first_sub_key: Option<String>,
    pub second_sub_key: Option<u64>,
    pub third_sub_key: Option<u64>,
    pub fourth_sub_key: Option<u64>,
}

impl EntityKey {
    pub fn named(first_sub_key: impl Into<String>) -> Self {
        Self {
            first_sub_key: Some(first_sub_key.into()),
            ..Self::default()
        }
    }
}

/// Consumer subscription sent with a register stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: String,
    pub entities: Vec<EntityKey>,
}

impl Subscription {
    pub fn new(subscription_id: impl Into<String>, entities: Vec<EntityKey>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            entities,
        }
    }
}

#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
pub enum UpdateType {
    Creation = 1,
    Update = 2,
    Modification = 3,
    Deletion = 4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateHeader {
    pub timestamp_ms: u64,
    pub source_uri: String,
    pub update_type: UpdateType,
    pub key: EntityKey,
}

/// One published update: its header and the opaque encoded value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub header: UpdateHeader,
    pub value: Bytes,
}

/// Body of a notify stage forwarded by a broker to one subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyBody {
    pub subscription_id: String,
    pub updates: Vec<Update>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageBody {
    #[default]
    Empty,
    /// Operation payload, already encoded by the caller
    Elements(Vec<Bytes>),
    /// Register stage
    Subscription(Subscription),
    /// Publish-register stage
    EntityKeyList(Vec<EntityKey>),
    /// Publish stage
    UpdateList(Vec<Update>),
    /// Notify stage
    Notify(NotifyBody),
    /// Deregister stage: subscription ids to remove
    IdentifierList(Vec<String>),
    /// Any error reply
    Error(MalStandardError),
}

impl MessageBody {
    /// Short name of the body shape, used in log lines and encoding errors
    pub fn shape_name(&self) -> &'static str {
        match self {
            MessageBody::Empty => "empty",
            MessageBody::Elements(_) => "elements",
            MessageBody::Subscription(_) => "subscription",
            MessageBody::EntityKeyList(_) => "entity-key-list",
            MessageBody::UpdateList(_) => "update-list",
            MessageBody::Notify(_) => "notify",
            MessageBody::IdentifierList(_) => "identifier-list",
            MessageBody::Error(_) => "error",
        }
    }

    pub fn as_error(&self) -> Option<&MalStandardError> {
        match self {
            MessageBody::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn elements(elements: impl IntoIterator<Item = Bytes>) -> Self {
        MessageBody::Elements(elements.into_iter().collect())
    }
}
