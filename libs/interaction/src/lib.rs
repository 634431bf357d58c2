//! # MAL Interaction Middleware
//!
//! Correlates the stages of MAL interaction patterns (Send, Submit, Request,
//! Invoke, Progress, PubSub) between consumers, providers and brokers, and
//! routes every received message to whoever is waiting for it.
//!
//! ## Architecture
//!
//! ```text
//! transport ──on_message──► MessageDispatcher
//!                              │
//!        ┌─────────────────────┼──────────────────────┐
//!        ▼                     ▼                      ▼
//!  EndpointRegistry   ConsumerInteractionTable   PubSubRoutingTable
//!  (providers)        (pending interactions)     (notify / publish listeners)
//!        │                     │                      │
//!  ProviderHandler       sync waiter or         InteractionListener
//!  BrokerHandler         InteractionListener    PublishListener
//! ```
//!
//! Encoding, connection management and broker subscription matching live
//! outside this crate, behind [`Endpoint`] and [`BrokerHandler`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mal_config::MalConfig;
//! use mal_interaction::{MalInstance, MessageDetails};
//! # use mal_interaction::Endpoint;
//! # use std::sync::Arc;
//! # async fn example(endpoint: Arc<dyn Endpoint>) -> mal_interaction::Result<()> {
//! let mal = MalInstance::new(MalConfig::default());
//! let details = MessageDetails::new(endpoint, "malhttp://provider", Default::default());
//! let consumer = mal.create_consumer(details);
//!
//! let response = consumer.request(1, Default::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod consumer;
pub mod details;
pub mod dispatcher;
pub mod error;
pub mod instance;
pub mod listener;
pub mod provider;
pub mod pubsub;
pub mod sender;
pub mod telemetry;
pub mod test_utils;
pub mod transaction;
pub mod transport;

pub use consumer::{Consumer, ConsumerInteractionTable, InteractionState, PendingInteraction};
pub use details::{provider_key, provider_key_for_header, Address, MessageDetails};
pub use dispatcher::{expected_reply_stage, MessageDispatcher};
pub use error::{MalError, Result};
pub use instance::MalInstance;
pub use listener::{ConsumerListener, InteractionListener, PublishListener, StageOutcome};
pub use provider::{
    BrokerBindingLookup, BrokerBindingMap, BrokerHandler, EndpointRegistry, InvokeInteraction,
    ProgressInteraction, ProviderHandler, ProviderInteractionTable, RequestInteraction,
    SendInteraction, SubmitInteraction, TransactionSource,
};
pub use pubsub::{PubSubRoutingTable, PublisherKey};
pub use sender::MessageSender;
pub use transaction::{Clock, SystemClock, TransactionIdAllocator};
pub use transport::{AuthenticationIdFilter, Endpoint, NullSecurityManager, SecurityManager};
