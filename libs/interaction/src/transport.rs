//! Transport and access-control boundaries
//!
//! The middleware does not own encoding or connection management. It sends
//! through an [`Endpoint`] and receives through
//! [`MessageDispatcher::on_message`](crate::MessageDispatcher::on_message),
//! which the transport calls from its receive workers.

use crate::error::{MalError, Result};
use async_trait::async_trait;
use mal_types::MalMessage;
use std::fmt::Debug;

/// A bound transport endpoint
#[async_trait]
pub trait Endpoint: Send + Sync + Debug {
    /// URI other components address this endpoint by
    fn uri(&self) -> &str;

    /// Send a single message
    async fn send(&self, message: MalMessage) -> Result<()>;

    /// Close the endpoint (may be no-op if already closed)
    async fn close(&self) -> Result<()>;
}

/// Access-control check run on every inbound message before dispatch.
///
/// Implementations may return a replacement message, or reject with an error.
pub trait SecurityManager: Send + Sync {
    fn check(&self, message: MalMessage) -> Result<MalMessage>;
}

/// Accepts every message unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSecurityManager;

impl SecurityManager for NullSecurityManager {
    fn check(&self, message: MalMessage) -> Result<MalMessage> {
        Ok(message)
    }
}

/// Rejects messages whose authentication id is not in an allow list
#[derive(Debug, Default, Clone)]
pub struct AuthenticationIdFilter {
    allowed: Vec<bytes::Bytes>,
}

impl AuthenticationIdFilter {
    pub fn new(allowed: impl IntoIterator<Item = bytes::Bytes>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl SecurityManager for AuthenticationIdFilter {
    fn check(&self, message: MalMessage) -> Result<MalMessage> {
        if self.allowed.contains(&message.header.authentication_id) {
            Ok(message)
        } else {
            Err(MalError::Security(format!(
                "authentication id from {} not permitted",
                message.header.uri_from
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mal_types::{stages, InteractionType, MessageBody, MessageHeader};

    fn message(auth: &'static [u8]) -> MalMessage {
        let mut header =
            MessageHeader::new("a", "b", InteractionType::Submit, Some(stages::SUBMIT_STAGE));
        header.authentication_id = Bytes::from_static(auth);
        MalMessage::new(header, MessageBody::Empty)
    }

    #[test]
    fn test_null_security_passes() {
        let msg = message(b"anyone");
        assert_eq!(NullSecurityManager.check(msg.clone()).unwrap(), msg);
    }

    #[test]
    fn test_authentication_filter() {
        let filter = AuthenticationIdFilter::new([Bytes::from_static(b"operator")]);
        assert!(filter.check(message(b"operator")).is_ok());

        let err = filter.check(message(b"intruder")).unwrap_err();
        assert!(matches!(err, MalError::Security(_)));
    }
}
