//! The fragment pool: a fixed ring of reusable block buffers plus the single
//! coordination state that decides who owns each of them.
//!
//! Buffers are allocated once and addressed by slot index. A slot moves
//! through `Free -> Loaded -> Assigned -> Processed -> Free`, and each state
//! has exactly one owner:
//!
//! | state       | owner  | transition made by                 |
//! |-------------|--------|------------------------------------|
//! | `Free`      | reader | writer, in `release_after_write`   |
//! | `Loaded`    | pool   | reader, in `commit_loaded`         |
//! | `Assigned`  | worker | dispatcher                         |
//! | `Processed` | writer | dispatcher, collecting a result    |
//!
//! All transitions and all counters live behind one mutex. The per-slot
//! buffer mutexes exist only to hand out `&mut [u8]` safely; the ownership
//! protocol means they are never contended.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;

use crate::error::{PipelineError, Result};

/// How long a stage sleeps on a condition variable before re-checking state.
/// Wake-ups are explicit; this only bounds the damage of a missed one and
/// gives stalls a log line.
pub(crate) const STALL_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentState {
    Free,
    Loaded,
    Assigned,
    Processed,
}

/// Authoritative metadata for one ring slot.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub state: FragmentState,
    /// Index of the block currently held, meaningless while `Free`.
    pub block: u64,
    pub original_size: usize,
    pub actual_bytes: usize,
    pub is_processed: bool,
}

impl Fragment {
    fn free() -> Self {
        Self {
            state: FragmentState::Free,
            block: 0,
            original_size: 0,
            actual_bytes: 0,
            is_processed: false,
        }
    }
}

/// Monotonic progress counters. Slot index = counter mod pool size.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub read_count: u64,
    pub dispatch_count: u64,
    pub processed_count: u64,
    pub write_count: u64,
}

pub(crate) struct PoolState {
    pub(crate) fragments: Vec<Fragment>,
    pub(crate) counters: Counters,
    pub(crate) total_blocks: u64,
    loaded: usize,
    peak_loaded: usize,
    failure: Option<PipelineError>,
    pub(crate) aborted: bool,
}

/// A processed fragment ready to be drained by the writer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Drain {
    pub(crate) slot: usize,
    pub(crate) original_size: usize,
    pub(crate) actual_bytes: usize,
}

pub struct FragmentPool {
    buffers: Box<[Mutex<Vec<u8>>]>,
    capacity: usize,
    pub(crate) state: Mutex<PoolState>,
    pub(crate) data_available: Condvar,
    pub(crate) block_processed: Condvar,
    pub(crate) fragment_released: Condvar,
}

impl FragmentPool {
    /// Allocates `pool_size` buffers of `capacity` bytes for a run of
    /// `total_blocks` blocks. The ring always has at least one slot.
    pub fn new(pool_size: usize, capacity: usize, total_blocks: u64) -> Self {
        let pool_size = pool_size.max(1);
        let buffers = (0..pool_size)
            .map(|_| Mutex::new(vec![0u8; capacity]))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffers,
            capacity,
            state: Mutex::new(PoolState {
                fragments: vec![Fragment::free(); pool_size],
                counters: Counters::default(),
                total_blocks,
                loaded: 0,
                peak_loaded: 0,
                failure: None,
                aborted: false,
            }),
            data_available: Condvar::new(),
            block_processed: Condvar::new(),
            fragment_released: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Bytes each fragment buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn counters(&self) -> Counters {
        self.lock_state().counters
    }

    /// Most fragments that ever held data at the same time.
    pub fn peak_loaded(&self) -> usize {
        self.lock_state().peak_loaded
    }

    pub(crate) fn slot_of(&self, counter: u64) -> usize {
        (counter % self.buffers.len() as u64) as usize
    }

    // A panicking stage aborts the pool through `AbortOnPanic` before the
    // guard is dropped, so the state behind a poisoned lock is still usable
    // for an orderly shutdown.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to a slot's buffer. Callers must own the slot.
    pub(crate) fn buffer(&self, slot: usize) -> MutexGuard<'_, Vec<u8>> {
        self.buffers[slot]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits on `signal`, re-checking at least every [`STALL_TIMEOUT`].
    pub(crate) fn wait<'a>(
        &self,
        signal: &Condvar,
        guard: MutexGuard<'a, PoolState>,
        waiting_for: &str,
    ) -> MutexGuard<'a, PoolState> {
        let (guard, timeout) = signal
            .wait_timeout(guard, STALL_TIMEOUT)
            .unwrap_or_else(PoisonError::into_inner);
        if timeout.timed_out() {
            debug!(
                "still waiting for {waiting_for} after {:?}: {:?}",
                STALL_TIMEOUT, guard.counters
            );
        }
        guard
    }

    /// Returns the next ring slot once the writer has freed it.
    ///
    /// Only the reader calls this, so the slot it waits on is always the one
    /// at `read_count`.
    pub fn acquire_for_write(&self) -> Result<usize> {
        let mut state = self.lock_state();
        let slot = self.slot_of(state.counters.read_count);
        loop {
            if state.aborted {
                return Err(PipelineError::Aborted);
            }
            if state.fragments[slot].state == FragmentState::Free {
                return Ok(slot);
            }
            state = self.wait(&self.fragment_released, state, "a free fragment");
        }
    }

    /// Publishes a freshly filled slot to the workers.
    pub fn commit_loaded(&self, slot: usize, original_size: usize) {
        let mut state = self.lock_state();
        let block = state.counters.read_count;
        let fragment = &mut state.fragments[slot];
        debug_assert_eq!(fragment.state, FragmentState::Free);
        fragment.state = FragmentState::Loaded;
        fragment.block = block;
        fragment.original_size = original_size;
        fragment.actual_bytes = 0;
        fragment.is_processed = false;

        state.counters.read_count += 1;
        state.loaded += 1;
        state.peak_loaded = state.peak_loaded.max(state.loaded);
        drop(state);
        self.data_available.notify_all();
    }

    /// Blocks until the next slot in write order is processed. `None` once
    /// every block has been written.
    pub(crate) fn wait_processed(&self) -> Result<Option<Drain>> {
        let mut state = self.lock_state();
        loop {
            if state.aborted {
                return Err(PipelineError::Aborted);
            }
            let next = state.counters.write_count;
            if next == state.total_blocks {
                return Ok(None);
            }
            let slot = self.slot_of(next);
            let fragment = &state.fragments[slot];
            if fragment.state == FragmentState::Processed && fragment.block == next {
                return Ok(Some(Drain {
                    slot,
                    original_size: fragment.original_size,
                    actual_bytes: fragment.actual_bytes,
                }));
            }
            state = self.wait(&self.block_processed, state, "the next block in order");
        }
    }

    /// Returns a drained slot to the reader.
    pub fn release_after_write(&self, slot: usize) {
        let mut state = self.lock_state();
        debug_assert_eq!(state.fragments[slot].state, FragmentState::Processed);
        state.fragments[slot] = Fragment::free();
        state.counters.write_count += 1;
        state.loaded -= 1;
        drop(state);
        self.fragment_released.notify_all();
    }

    /// Stops the pipeline. The first real error wins; later ones, and the
    /// `Aborted` errors stages return once they notice, are dropped.
    pub fn abort(&self, error: PipelineError) {
        let mut state = self.lock_state();
        if state.failure.is_none() && !matches!(error, PipelineError::Aborted) {
            state.failure = Some(error);
        }
        state.aborted = true;
        drop(state);
        self.data_available.notify_all();
        self.block_processed.notify_all();
        self.fragment_released.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.lock_state().aborted
    }

    pub(crate) fn take_failure(&self) -> Option<PipelineError> {
        self.lock_state().failure.take()
    }
}

/// Aborts the pool if the owning thread unwinds, so the other stages stop
/// waiting for work that will never arrive.
pub(crate) struct AbortOnPanic<'a> {
    pool: &'a FragmentPool,
    role: &'static str,
}

impl<'a> AbortOnPanic<'a> {
    pub(crate) fn new(pool: &'a FragmentPool, role: &'static str) -> Self {
        Self { pool, role }
    }
}

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.pool.abort(PipelineError::WorkerPanicked(self.role));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn process(pool: &FragmentPool, slot: usize, actual_bytes: usize) {
        let mut state = pool.lock_state();
        let fragment = &mut state.fragments[slot];
        fragment.state = FragmentState::Processed;
        fragment.actual_bytes = actual_bytes;
        fragment.is_processed = true;
        drop(state);
        pool.block_processed.notify_all();
    }

    #[test]
    fn test_slots_are_handed_out_in_ring_order() {
        let pool = FragmentPool::new(3, 16, 10);
        for expected in 0..3 {
            let slot = pool.acquire_for_write().unwrap();
            assert_eq!(slot, expected);
            pool.commit_loaded(slot, 8);
        }
        assert_eq!(pool.counters().read_count, 3);
        assert_eq!(pool.peak_loaded(), 3);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let pool = FragmentPool::new(1, 16, 2);
        let slot = pool.acquire_for_write().unwrap();
        pool.commit_loaded(slot, 4);

        let acquired = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|| {
                let slot = pool.acquire_for_write().unwrap();
                assert_eq!(slot, 0);
                acquired.store(true, Ordering::SeqCst);
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!acquired.load(Ordering::SeqCst));

            process(&pool, 0, 2);
            let drain = pool.wait_processed().unwrap().unwrap();
            assert_eq!(drain.actual_bytes, 2);
            pool.release_after_write(drain.slot);
        });
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(pool.counters().write_count, 1);
    }

    #[test]
    fn test_abort_wakes_blocked_reader() {
        let pool = FragmentPool::new(1, 16, 2);
        let slot = pool.acquire_for_write().unwrap();
        pool.commit_loaded(slot, 4);

        thread::scope(|s| {
            let handle = s.spawn(|| pool.acquire_for_write());
            thread::sleep(Duration::from_millis(20));
            pool.abort(PipelineError::CorruptHeader("test".into()));
            assert!(matches!(handle.join().unwrap(), Err(PipelineError::Aborted)));
        });
        assert!(matches!(
            pool.take_failure(),
            Some(PipelineError::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_first_failure_wins() {
        let pool = FragmentPool::new(2, 16, 2);
        pool.abort(PipelineError::Aborted);
        pool.abort(PipelineError::CorruptHeader("first".into()));
        pool.abort(PipelineError::CorruptHeader("second".into()));
        match pool.take_failure() {
            Some(PipelineError::CorruptHeader(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn test_empty_ring_request_gets_one_slot() {
        let pool = FragmentPool::new(0, 16, 2);
        assert_eq!(pool.len(), 1);
        let slot = pool.acquire_for_write().unwrap();
        assert_eq!(slot, 0);
        pool.commit_loaded(slot, 3);
        assert_eq!(pool.counters().read_count, 1);
    }

    #[test]
    fn test_writer_sees_end_after_last_block() {
        let pool = FragmentPool::new(2, 16, 1);
        let slot = pool.acquire_for_write().unwrap();
        pool.commit_loaded(slot, 1);
        process(&pool, slot, 1);
        let drain = pool.wait_processed().unwrap().unwrap();
        pool.release_after_write(drain.slot);
        assert!(pool.wait_processed().unwrap().is_none());
    }
}
