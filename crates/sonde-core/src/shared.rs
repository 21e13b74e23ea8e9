//! Shared-storage locking discipline.
//!
//! Exactly one mutex guards the engine, and with it every storage handle:
//! no two tasks perform I/O on the same path without holding it. Every
//! acquisition is bounded — a handler that cannot take the lock within
//! [`STORAGE_LOCK_TIMEOUT`] surfaces [`StorageBusy`] to its caller instead
//! of queueing. Handlers streaming a long response over the slow link
//! should release the guard between chunks and re-acquire per chunk,
//! trading producer latency for bounded worst-case contention.
//!
//! The read path takes the same lock as the producer, including for plain
//! routing scalars; there are no unsynchronized reads.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex as AsyncMutex, MutexGuard};
use embassy_time::{with_timeout, Duration};

use crate::error::StorageBusy;
use crate::storage::{Engine, MAX_DEVICES};
use crate::store::BlockStore;

/// Bounded wait for the storage lock.
pub const STORAGE_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// The engine behind its single mutex. `None` until storage is brought up.
pub type SharedEngine<S, const N: usize = { MAX_DEVICES }> =
    AsyncMutex<CriticalSectionRawMutex, Option<Engine<S, N>>>;

/// Acquire the storage lock within the bounded wait.
pub async fn lock_storage<S: BlockStore, const N: usize>(
    shared: &SharedEngine<S, N>,
) -> Result<MutexGuard<'_, CriticalSectionRawMutex, Option<Engine<S, N>>>, StorageBusy> {
    with_timeout(STORAGE_LOCK_TIMEOUT, shared.lock())
        .await
        .map_err(|_| StorageBusy)
}
