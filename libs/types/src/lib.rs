//! # MAL Message Types
//!
//! Value types shared by every layer of the MAL interaction middleware: the
//! message header consumed from the wire, the interaction pattern and stage
//! numbering, the body shapes the dispatcher inspects, and the standard
//! error numbers returned in error replies.
//!
//! ## Quick Start
//!
//! ```rust
//! use mal_types::{InteractionType, MessageHeader, stages};
//!
//! let header = MessageHeader::new(
//!     "malhttp://ground/consumer",
//!     "malhttp://ground/provider",
//!     InteractionType::Submit,
//!     Some(stages::SUBMIT_STAGE),
//! );
//! assert!(header.is_initial_stage());
//! ```
//!
//! ## Stage Numbering
//!
//! | pattern  | stages |
//! |----------|--------|
//! | Submit   | 1 submit, 2 ack |
//! | Request  | 1 request, 2 response |
//! | Invoke   | 1 invoke, 2 ack, 3 response |
//! | Progress | 1 progress, 2 ack, 3 update, 4 response |
//! | PubSub   | 1 register, 2 ack, 3 publish-register, 4 ack, 5 publish, 6 notify, 7 deregister, 8 ack, 9 publish-deregister, 10 ack |

pub mod body;
pub mod error;
pub mod header;
pub mod interaction;
pub mod message;

pub use body::{EntityKey, MessageBody, NotifyBody, Subscription, Update, UpdateHeader, UpdateType};
pub use error::{standard_errors, MalStandardError};
pub use header::{now_ms, MessageHeader};
pub use interaction::{stages, InteractionType, QosLevel, SessionType};
pub use message::MalMessage;

/// Service identity of an operation: area, service, operation and area version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct ServiceKey {
    pub area: u16,
    pub service: u16,
    pub operation: u16,
    pub area_version: u8,
}

impl ServiceKey {
    pub fn new(area: u16, service: u16, operation: u16, area_version: u8) -> Self {
        Self {
            area,
            service,
            operation,
            area_version,
        }
    }

    /// Key of the service this operation belongs to, operation number zeroed
    pub fn service_only(&self) -> Self {
        Self {
            operation: 0,
            ..*self
        }
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}/v{}",
            self.area, self.service, self.operation, self.area_version
        )
    }
}
