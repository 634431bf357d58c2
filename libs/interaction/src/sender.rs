//! Reply construction and sending
//!
//! Replies are built from the header of the message being answered: the
//! addressing is swapped and the transaction id, QoS, priority and scope are
//! echoed, so a reply always correlates with its request.

use crate::details::Address;
use crate::error::Result;
use crate::transport::Endpoint;
use mal_types::{MalMessage, MalStandardError, MessageBody, MessageHeader};
use std::collections::HashMap;
use tracing::{debug, error};

#[derive(Debug, Default, Clone, Copy)]
pub struct MessageSender;

impl MessageSender {
    pub fn new() -> Self {
        Self
    }

    /// Send a reply stage from a bound provider
    pub async fn return_response(
        &self,
        address: &Address,
        src_header: &MessageHeader,
        qos_properties: &HashMap<String, String>,
        stage: u8,
        body: MessageBody,
    ) -> Result<()> {
        let mut header = src_header.reply(stage, false);
        header.uri_from = address.uri.clone();
        header.authentication_id = address.authentication_id.clone();

        let message = MalMessage::new(header, body).with_qos_properties(qos_properties.clone());
        send_logged(address.endpoint.as_ref(), message).await
    }

    /// Send an error reply from a bound provider
    pub async fn return_error(
        &self,
        address: &Address,
        src_header: &MessageHeader,
        stage: u8,
        error: MalStandardError,
    ) -> Result<()> {
        let mut header = src_header.reply(stage, true);
        header.uri_from = address.uri.clone();
        header.authentication_id = address.authentication_id.clone();

        send_logged(address.endpoint.as_ref(), MalMessage::error(header, error)).await
    }

    /// Send a reply through the endpoint a message arrived on, for replies
    /// not owned by a registered provider (broker acknowledgements)
    pub async fn return_ack_via(
        &self,
        endpoint: &dyn Endpoint,
        src_header: &MessageHeader,
        qos_properties: &HashMap<String, String>,
        stage: u8,
        body: MessageBody,
    ) -> Result<()> {
        let message = MalMessage::new(src_header.reply(stage, false), body)
            .with_qos_properties(qos_properties.clone());
        send_logged(endpoint, message).await
    }

    /// Send an error reply through the endpoint a message arrived on
    pub async fn return_error_via(
        &self,
        endpoint: &dyn Endpoint,
        src_header: &MessageHeader,
        stage: u8,
        error: MalStandardError,
    ) -> Result<()> {
        let message = MalMessage::error(src_header.reply(stage, true), error);
        send_logged(endpoint, message).await
    }
}

async fn send_logged(endpoint: &dyn Endpoint, message: MalMessage) -> Result<()> {
    let transaction_id = message.header.transaction_id;
    let stage = message.header.interaction_stage;
    let is_error = message.header.is_error_message;
    let uri = message.header.uri_to.clone();

    match endpoint.send(message).await {
        Ok(()) => {
            debug!(?transaction_id, ?stage, is_error, uri = %uri, "Reply sent");
            Ok(())
        }
        Err(err) => {
            error!(?transaction_id, ?stage, uri = %uri, %err, "Failed to send reply");
            Err(err)
        }
    }
}
