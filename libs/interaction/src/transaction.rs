//! Transaction Id Allocation
//!
//! Ids are `magnitude + offset`, where the magnitude is the number of seconds
//! since a fixed epoch shifted left by 24 bits and the offset counts up from
//! zero. Once the offset passes [`OFFSET_SPAN`] the magnitude is recomputed
//! from the clock and the offset restarts, so ids grow monotonically while the
//! clock advances. Ids still open with the caller are skipped, which covers the
//! clock not having moved since the last wrap.
//!
//! Allocation only loops forever if more than 2^24 transactions are open at
//! once.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Largest offset added to a magnitude before the magnitude is recomputed
pub const OFFSET_SPAN: u64 = 0x00FF_FFFF;

/// Bits the epoch-relative seconds are shifted by
pub const MAGNITUDE_SHIFT: u32 = 24;

/// Source of wall-clock seconds
pub trait Clock: Send + Sync {
    fn unix_seconds(&self) -> u64;
}

/// Clock backed by `SystemTime`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

struct AllocatorState {
    magnitude: u64,
    offset: u64,
}

/// Thread-safe transaction id allocator, one per MAL instance or table
pub struct TransactionIdAllocator {
    epoch_unix_seconds: u64,
    clock: Arc<dyn Clock>,
    state: Mutex<AllocatorState>,
}

impl fmt::Debug for TransactionIdAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransactionIdAllocator")
            .field("epoch_unix_seconds", &self.epoch_unix_seconds)
            .field("magnitude", &state.magnitude)
            .field("offset", &state.offset)
            .finish()
    }
}

impl TransactionIdAllocator {
    pub fn new(epoch_unix_seconds: u64) -> Self {
        Self::with_clock(epoch_unix_seconds, Arc::new(SystemClock))
    }

    pub fn with_clock(epoch_unix_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        let magnitude = magnitude_at(clock.as_ref(), epoch_unix_seconds);
        Self {
            epoch_unix_seconds,
            clock,
            state: Mutex::new(AllocatorState {
                magnitude,
                offset: 0,
            }),
        }
    }

    /// Allocate the next id for which `in_use` returns false
    pub fn next(&self, in_use: impl Fn(u64) -> bool) -> u64 {
        let mut state = self.state.lock();
        loop {
            state.offset += 1;
            if state.offset > OFFSET_SPAN {
                state.magnitude = magnitude_at(self.clock.as_ref(), self.epoch_unix_seconds);
                state.offset = 0;
                debug!(magnitude = state.magnitude, "Transaction id offset wrapped");
            }

            let id = state.magnitude + state.offset;
            if !in_use(id) {
                return id;
            }
        }
    }

    /// Current offset counter
    pub fn offset(&self) -> u64 {
        self.state.lock().offset
    }

    #[cfg(test)]
    pub(crate) fn force_offset(&self, offset: u64) {
        self.state.lock().offset = offset;
    }
}

fn magnitude_at(clock: &dyn Clock, epoch_unix_seconds: u64) -> u64 {
    clock.unix_seconds().saturating_sub(epoch_unix_seconds) << MAGNITUDE_SHIFT
}
