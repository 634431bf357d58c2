//! Provider and broker side of the interaction patterns

pub mod handler;
pub mod interaction;
pub mod registry;
pub mod table;

pub use handler::{BrokerBindingLookup, BrokerBindingMap, BrokerHandler, ProviderHandler};
pub use interaction::{
    InvokeInteraction, ProgressInteraction, RequestInteraction, SendInteraction,
    SubmitInteraction,
};
pub use registry::EndpointRegistry;
pub use table::{ProviderInteractionTable, TransactionSource};
