//! Consumer side of the interaction patterns
//!
//! - [`state`]: per-pattern stage validation
//! - [`table`]: pending interactions by transaction id
//! - [`session`]: the [`Consumer`] API used to start interactions

pub mod session;
pub mod state;
pub mod table;

pub use session::{Consumer, PendingInteraction};
pub use state::InteractionState;
pub use table::ConsumerInteractionTable;
