//! Complete MAL message: header, body and QoS properties

use crate::body::MessageBody;
use crate::error::MalStandardError;
use crate::header::MessageHeader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalMessage {
    pub header: MessageHeader,
    pub body: MessageBody,
    pub qos_properties: HashMap<String, String>,
}

impl MalMessage {
    pub fn new(header: MessageHeader, body: MessageBody) -> Self {
        Self {
            header,
            body,
            qos_properties: HashMap::new(),
        }
    }

    pub fn with_qos_properties(mut self, qos_properties: HashMap<String, String>) -> Self {
        self.qos_properties = qos_properties;
        self
    }

    /// Build an error message; the header's error flag is forced on
    pub fn error(mut header: MessageHeader, error: MalStandardError) -> Self {
        header.is_error_message = true;
        Self::new(header, MessageBody::Error(error))
    }

    pub fn transaction_id(&self) -> Option<u64> {
        self.header.transaction_id
    }

    /// The carried error, for messages flagged as errors.
    ///
    /// An error-flagged message whose body is not an error shape still reports
    /// an error so it cannot be mistaken for a success.
    pub fn error_body(&self) -> Option<MalStandardError> {
        if !self.header.is_error_message {
            return None;
        }
        Some(self.body.as_error().cloned().unwrap_or_else(|| {
            MalStandardError::with_info(
                crate::standard_errors::UNKNOWN,
                format!("error message with {} body", self.body.shape_name()),
            )
        }))
    }
}
