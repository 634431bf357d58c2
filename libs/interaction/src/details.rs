//! Bound provider addresses and outgoing message details

use crate::provider::ProviderHandler;
use crate::transport::Endpoint;
use bytes::Bytes;
use mal_types::{InteractionType, MessageHeader, QosLevel, ServiceKey, SessionType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A provider bound to a local endpoint
#[derive(Clone)]
pub struct Address {
    pub endpoint: Arc<dyn Endpoint>,
    pub uri: String,
    pub authentication_id: Bytes,
    pub handler: Arc<dyn ProviderHandler>,
}

impl Address {
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        authentication_id: Bytes,
        handler: Arc<dyn ProviderHandler>,
    ) -> Self {
        Self {
            uri: endpoint.uri().to_string(),
            endpoint,
            authentication_id,
            handler,
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("uri", &self.uri)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Routing and QoS context of the messages a consumer or publisher sends
#[derive(Clone)]
pub struct MessageDetails {
    pub endpoint: Arc<dyn Endpoint>,
    pub uri_from: String,
    pub uri_to: String,
    pub broker_uri: Option<String>,
    pub service: ServiceKey,
    pub authentication_id: Bytes,
    pub domain: Vec<String>,
    pub network_zone: String,
    pub session: SessionType,
    pub session_name: String,
    pub qos_level: QosLevel,
    pub qos_properties: HashMap<String, String>,
    pub priority: u32,
}

impl fmt::Debug for MessageDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDetails")
            .field("uri_from", &self.uri_from)
            .field("uri_to", &self.uri_to)
            .field("broker_uri", &self.broker_uri)
            .field("service", &self.service)
            .field("qos_level", &self.qos_level)
            .field("priority", &self.priority)
            .finish()
    }
}

impl MessageDetails {
    /// Details addressed from `endpoint` to `uri_to`, with default scope and QoS
    pub fn new(endpoint: Arc<dyn Endpoint>, uri_to: impl Into<String>, service: ServiceKey) -> Self {
        Self {
            uri_from: endpoint.uri().to_string(),
            endpoint,
            uri_to: uri_to.into(),
            broker_uri: None,
            service,
            authentication_id: Bytes::new(),
            domain: Vec::new(),
            network_zone: String::new(),
            session: SessionType::default(),
            session_name: String::new(),
            qos_level: QosLevel::default(),
            qos_properties: HashMap::new(),
            priority: 0,
        }
    }

    pub fn with_broker(mut self, broker_uri: impl Into<String>) -> Self {
        self.broker_uri = Some(broker_uri.into());
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

    pub fn with_qos(mut self, qos_level: QosLevel, priority: u32) -> Self {
        self.qos_level = qos_level;
        self.priority = priority;
        self
    }

    pub fn with_authentication_id(mut self, authentication_id: Bytes) -> Self {
        self.authentication_id = authentication_id;
        self
    }

    /// URI of the endpoint these details send from
    pub fn endpoint_uri(&self) -> &str {
        self.endpoint.uri()
    }

    /// Pub-sub publisher key of these details
    pub fn provider_key(&self, separator: &str) -> String {
        provider_key(
            self.session,
            &self.session_name,
            &self.network_zone,
            &self.domain,
            separator,
        )
    }

    /// Header of an outgoing message. Pub-sub traffic is addressed to the broker when one is set.
    pub fn header(
        &self,
        interaction_type: InteractionType,
        stage: Option<u8>,
        operation: u16,
    ) -> MessageHeader {
        let uri_to = match (interaction_type, &self.broker_uri) {
            (InteractionType::PubSub, Some(broker)) => broker.clone(),
            _ => self.uri_to.clone(),
        };
        let service = ServiceKey {
            operation,
            ..self.service
        };

        let mut header = MessageHeader::new(self.uri_from.clone(), uri_to, interaction_type, stage)
            .with_service(service)
            .with_qos(self.qos_level, self.priority)
            .with_scope(
                self.domain.clone(),
                self.network_zone.clone(),
                self.session,
                self.session_name.clone(),
            );
        header.authentication_id = self.authentication_id.clone();
        header
    }
}

/// Key identifying a publisher's registration scope
pub fn provider_key(
    session: SessionType,
    session_name: &str,
    network_zone: &str,
    domain: &[String],
    separator: &str,
) -> String {
    [
        session.to_string(),
        session_name.to_string(),
        network_zone.to_string(),
        domain.join("."),
    ]
    .join(separator)
}

/// Publisher key of a received header, mirroring [`MessageDetails::provider_key`]
pub fn provider_key_for_header(header: &MessageHeader, separator: &str) -> String {
    provider_key(
        header.session,
        &header.session_name,
        &header.network_zone,
        &header.domain,
        separator,
    )
}
