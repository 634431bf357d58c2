//! MAL message header
//!
//! The header is owned by the transport's wire contract; the middleware reads
//! it to correlate and route, and derives reply headers from it.

use crate::interaction::{stages, InteractionType, QosLevel, SessionType};
use crate::ServiceKey;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Header carried by every MAL message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub uri_from: String,
    pub uri_to: String,
    pub authentication_id: Bytes,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub qos_level: QosLevel,
    pub priority: u32,
    pub domain: Vec<String>,
    pub network_zone: String,
    pub session: SessionType,
    pub session_name: String,
    pub interaction_type: InteractionType,
    /// Absent only for Send, which has no stages
    pub interaction_stage: Option<u8>,
    /// Absent only on a first stage that has not been allocated an id yet
    pub transaction_id: Option<u64>,
    pub service: ServiceKey,
    pub is_error_message: bool,
}

impl MessageHeader {
    /// Create a header with default QoS, session and addressing scope
    pub fn new(
        uri_from: impl Into<String>,
        uri_to: impl Into<String>,
        interaction_type: InteractionType,
        interaction_stage: Option<u8>,
    ) -> Self {
        Self {
            uri_from: uri_from.into(),
            uri_to: uri_to.into(),
            authentication_id: Bytes::new(),
            timestamp_ms: now_ms(),
            qos_level: QosLevel::default(),
            priority: 0,
            domain: Vec::new(),
            network_zone: String::new(),
            session: SessionType::default(),
            session_name: String::new(),
            interaction_type,
            interaction_stage,
            transaction_id: None,
            service: ServiceKey::default(),
            is_error_message: false,
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: u64) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn with_service(mut self, service: ServiceKey) -> Self {
        self.service = service;
        self
    }

    pub fn with_qos(mut self, qos_level: QosLevel, priority: u32) -> Self {
        self.qos_level = qos_level;
        self.priority = priority;
        self
    }

    pub fn with_error_flag(mut self, is_error_message: bool) -> Self {
        self.is_error_message = is_error_message;
        self
    }

    pub fn with_scope(
        mut self,
        domain: Vec<String>,
        network_zone: impl Into<String>,
        session: SessionType,
        session_name: impl Into<String>,
    ) -> Self {
        self.domain = domain;
        self.network_zone = network_zone.into();
        self.session = session;
        self.session_name = session_name.into();
        self
    }

    /// True if this message opens an exchange the receiver has to answer or handle
    pub fn is_initial_stage(&self) -> bool {
        match self.interaction_type {
            InteractionType::Send => true,
            InteractionType::PubSub => matches!(
                self.interaction_stage,
                Some(
                    stages::PUBSUB_REGISTER_STAGE
                        | stages::PUBSUB_PUBLISH_REGISTER_STAGE
                        | stages::PUBSUB_PUBLISH_STAGE
                        | stages::PUBSUB_DEREGISTER_STAGE
                        | stages::PUBSUB_PUBLISH_DEREGISTER_STAGE
                )
            ),
            _ => self.interaction_stage == Some(1),
        }
    }

    /// Stage number, or 0 when the message carries none
    pub fn stage_or_zero(&self) -> u8 {
        self.interaction_stage.unwrap_or(0)
    }

    /// Build the header of a reply to this message.
    ///
    /// Addressing is swapped, the transaction id, service identity, QoS and
    /// scope are echoed, and the timestamp is refreshed.
    pub fn reply(&self, stage: u8, is_error_message: bool) -> MessageHeader {
        MessageHeader {
            uri_from: self.uri_to.clone(),
            uri_to: self.uri_from.clone(),
            authentication_id: self.authentication_id.clone(),
            timestamp_ms: now_ms(),
            qos_level: self.qos_level,
            priority: self.priority,
            domain: self.domain.clone(),
            network_zone: self.network_zone.clone(),
            session: self.session,
            session_name: self.session_name.clone(),
            interaction_type: self.interaction_type,
            interaction_stage: Some(stage),
            transaction_id: self.transaction_id,
            service: self.service,
            is_error_message,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
