//! Consumer Interaction Table
//!
//! Pending consumer-side interactions keyed by transaction id. The table
//! mutex only guards the map; each entry carries its own state lock and its
//! own signal, so a waiter on one transaction never blocks stage delivery
//! for another. Neither lock is held across an await or a listener call.

use super::state::InteractionState;
use crate::error::{MalError, Result};
use crate::listener::{ConsumerListener, StageOutcome};
use crate::transaction::TransactionIdAllocator;
use mal_types::{standard_errors, InteractionType, MalMessage, MalStandardError, MessageHeader};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// One stage outcome queued for a synchronous waiter
#[derive(Debug)]
struct Delivery {
    outcome: Result<MalMessage>,
    /// Set on the last outcome of the interaction
    terminal: bool,
}

enum EntryMode {
    Sync {
        tx: UnboundedSender<Delivery>,
        rx: tokio::sync::Mutex<UnboundedReceiver<Delivery>>,
    },
    Async(ConsumerListener),
}

struct ConsumerEntry {
    interaction_type: InteractionType,
    state: Mutex<InteractionState>,
    mode: EntryMode,
}

impl ConsumerEntry {
    fn new(
        interaction_type: InteractionType,
        state: InteractionState,
        listener: Option<ConsumerListener>,
    ) -> Self {
        let mode = match listener {
            Some(listener) => EntryMode::Async(listener),
            None => {
                let (tx, rx) = unbounded_channel();
                EntryMode::Sync {
                    tx,
                    rx: tokio::sync::Mutex::new(rx),
                }
            }
        };
        Self {
            interaction_type,
            state: Mutex::new(state),
            mode,
        }
    }
}

/// What to do once the entry's state lock has been released
enum Followup {
    Nothing,
    Deliver(ConsumerListener, StageOutcome),
}

pub struct ConsumerInteractionTable {
    allocator: Arc<TransactionIdAllocator>,
    entries: Mutex<HashMap<u64, Arc<ConsumerEntry>>>,
    default_timeout: Duration,
}

impl std::fmt::Debug for ConsumerInteractionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerInteractionTable")
            .field("pending", &self.len())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ConsumerInteractionTable {
    pub fn new(allocator: Arc<TransactionIdAllocator>, default_timeout: Duration) -> Self {
        Self {
            allocator,
            entries: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Allocate a transaction id for an outgoing initial stage.
    ///
    /// Interactions that will receive replies are recorded: synchronously
    /// (awaited with [`wait_for_response`](Self::wait_for_response)) when
    /// `listener` is `None`, otherwise through the listener. Send and
    /// publish record nothing.
    pub fn create_transaction(
        &self,
        interaction_type: InteractionType,
        stage: Option<u8>,
        listener: Option<ConsumerListener>,
    ) -> Result<u64> {
        let state = InteractionState::for_initiation(interaction_type, stage)?;

        let mut entries = self.entries.lock();
        let transaction_id = self.allocator.next(|id| entries.contains_key(&id));
        if let Some(state) = state {
            entries.insert(
                transaction_id,
                Arc::new(ConsumerEntry::new(interaction_type, state, listener)),
            );
        }

        debug!(transaction_id, ?interaction_type, ?stage, "Created consumer transaction");
        Ok(transaction_id)
    }

    /// Resume an interaction created elsewhere, e.g. before a restart
    pub fn continue_transaction(
        &self,
        interaction_type: InteractionType,
        last_stage: u8,
        transaction_id: u64,
        listener: ConsumerListener,
    ) -> Result<()> {
        let state = InteractionState::resume(interaction_type, last_stage).map_err(|err| match err {
            MalError::IncorrectState { message, stage, .. } => {
                MalError::incorrect_state(message, Some(transaction_id), stage)
            }
            other => other,
        })?;

        let mut entries = self.entries.lock();
        if entries.contains_key(&transaction_id) {
            return Err(MalError::incorrect_state(
                "transaction id already in use",
                Some(transaction_id),
                Some(last_stage),
            ));
        }
        entries.insert(
            transaction_id,
            Arc::new(ConsumerEntry::new(interaction_type, state, Some(listener))),
        );

        debug!(transaction_id, ?interaction_type, last_stage, "Continued consumer transaction");
        Ok(())
    }

    /// Wait for the next stage of a synchronous interaction.
    ///
    /// The entry is removed once its last stage has been returned, or when
    /// the wait times out. An error reply is returned as `Err`.
    pub async fn wait_for_response(
        &self,
        transaction_id: u64,
        timeout: Option<Duration>,
    ) -> Result<MalMessage> {
        let entry = self.entry(transaction_id).ok_or_else(|| {
            MalError::incorrect_state("no pending interaction", Some(transaction_id), None)
        })?;
        let EntryMode::Sync { rx, .. } = &entry.mode else {
            return Err(MalError::incorrect_state(
                "asynchronous interaction cannot be waited on",
                Some(transaction_id),
                None,
            ));
        };

        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut rx = rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(delivery)) => {
                if delivery.terminal {
                    self.remove_entry(transaction_id, &entry);
                }
                delivery.outcome
            }
            Ok(None) => {
                self.remove_entry(transaction_id, &entry);
                Err(MalError::internal("interaction signal closed"))
            }
            Err(_) => {
                self.remove_entry(transaction_id, &entry);
                warn!(transaction_id, timeout_ms = timeout.as_millis() as u64, "Wait for response timed out");
                Err(MalError::Timeout {
                    transaction_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Route a received reply stage to its pending interaction.
    ///
    /// Unknown transactions are logged and dropped. A stage the pattern does
    /// not allow is rejected with an incorrect-state error and the
    /// interaction is left as it was.
    pub async fn handle_stage(&self, message: MalMessage) -> Result<()> {
        let Some(transaction_id) = message.transaction_id() else {
            warn!(uri = %message.header.uri_from, "Reply stage without transaction id dropped");
            return Ok(());
        };
        let Some(entry) = self.entry(transaction_id) else {
            warn!(
                transaction_id,
                stage = ?message.header.interaction_stage,
                uri = %message.header.uri_from,
                "No pending interaction for reply, dropped"
            );
            return Ok(());
        };

        let followup = {
            let mut state = entry.state.lock();
            state.on_stage(&message.header)?;
            let terminal = state.is_finished();
            debug!(transaction_id, stage = ?message.header.interaction_stage, terminal, "Consumer stage accepted");

            match &entry.mode {
                EntryMode::Sync { tx, .. } => {
                    let outcome = match message.error_body() {
                        Some(error) => Err(MalError::Standard(error)),
                        None => Ok(message),
                    };
                    if tx.send(Delivery { outcome, terminal }).is_err() {
                        warn!(transaction_id, "Waiter gone, stage dropped");
                    }
                    Followup::Nothing
                }
                EntryMode::Async(listener) => {
                    if terminal {
                        self.remove_entry(transaction_id, &entry);
                    }
                    Followup::Deliver(listener.clone(), StageOutcome::from_message(message))
                }
            }
        };

        self.run(followup).await;
        Ok(())
    }

    /// Terminate the interaction `header` belongs to with `error`.
    ///
    /// `header` is the outgoing header of the interaction or a reply header;
    /// the error is reported at the stage the interaction was waiting for.
    pub async fn handle_error(&self, header: &MessageHeader, error: MalError) -> Result<()> {
        let Some(transaction_id) = header.transaction_id else {
            warn!(uri = %header.uri_to, %error, "Error without transaction id dropped");
            return Ok(());
        };
        let Some(entry) = self.entry(transaction_id) else {
            warn!(transaction_id, %error, "No pending interaction for error, dropped");
            return Ok(());
        };

        let followup = self.fail_entry(transaction_id, &entry, Some(header), error);
        self.run(followup).await;
        Ok(())
    }

    /// Forget a pending interaction without notifying anyone
    pub fn abandon(&self, transaction_id: u64) -> bool {
        self.entries.lock().remove(&transaction_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, transaction_id: u64) -> bool {
        self.entries.lock().contains_key(&transaction_id)
    }

    /// Fail every pending interaction with a SHUTDOWN error and empty the table
    pub async fn clear(&self) {
        let drained: Vec<(u64, Arc<ConsumerEntry>)> = self.entries.lock().drain().collect();
        if !drained.is_empty() {
            debug!(pending = drained.len(), "Shutting down pending consumer interactions");
        }

        for (transaction_id, entry) in drained {
            let error = MalError::Standard(MalStandardError::with_info(
                standard_errors::SHUTDOWN,
                "MAL instance closed",
            ));
            let followup = self.fail_entry(transaction_id, &entry, None, error);
            self.run(followup).await;
        }
    }

    fn entry(&self, transaction_id: u64) -> Option<Arc<ConsumerEntry>> {
        self.entries.lock().get(&transaction_id).cloned()
    }

    /// Remove `entry` if it is still the one stored under `transaction_id`
    fn remove_entry(&self, transaction_id: u64, entry: &Arc<ConsumerEntry>) {
        let mut entries = self.entries.lock();
        if entries
            .get(&transaction_id)
            .is_some_and(|stored| Arc::ptr_eq(stored, entry))
        {
            entries.remove(&transaction_id);
        }
    }

    fn fail_entry(
        &self,
        transaction_id: u64,
        entry: &Arc<ConsumerEntry>,
        header: Option<&MessageHeader>,
        error: MalError,
    ) -> Followup {
        let mut state = entry.state.lock();
        let Some(stage) = state.on_error() else {
            debug!(transaction_id, %error, "Interaction already finished, error dropped");
            return Followup::Nothing;
        };
        warn!(transaction_id, stage, %error, "Consumer interaction failed");

        match &entry.mode {
            EntryMode::Sync { tx, .. } => {
                let delivery = Delivery {
                    outcome: Err(error),
                    terminal: true,
                };
                if tx.send(delivery).is_err() {
                    debug!(transaction_id, "Waiter gone, error dropped");
                }
                Followup::Nothing
            }
            EntryMode::Async(listener) => {
                self.remove_entry(transaction_id, entry);
                let reply_header = match header {
                    Some(header) if header.is_error_message || header.stage_or_zero() == stage => {
                        let mut header = header.clone();
                        header.is_error_message = true;
                        header
                    }
                    Some(header) => header.reply(stage, true),
                    None => MessageHeader::new("", "", entry.interaction_type, Some(stage))
                        .with_transaction_id(transaction_id)
                        .with_error_flag(true),
                };
                Followup::Deliver(
                    listener.clone(),
                    StageOutcome::Error {
                        header: reply_header,
                        error: error.to_standard_error(),
                    },
                )
            }
        }
    }

    async fn run(&self, followup: Followup) {
        if let Followup::Deliver(listener, outcome) = followup {
            listener.deliver(outcome).await;
        }
    }
}
