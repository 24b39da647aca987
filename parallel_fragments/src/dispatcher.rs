//! The dispatcher: the one critical section every worker passes through
//! between blocks.
//!
//! A worker hands back the result of its previous block (if any) and gets
//! the next loaded slot in the same call, under the pool's coordination
//! lock. This is the only code that advances `dispatch_count` and
//! `processed_count`, so their updates are totally ordered no matter how
//! many workers race for work. The transform itself runs outside the lock.

use crate::pool::{FragmentPool, FragmentState};

/// A slot handed to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub slot: usize,
    pub block: u64,
    pub original_size: usize,
}

/// What a worker reports once its transform is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub slot: usize,
    pub original_size: usize,
    pub actual_bytes: usize,
}

pub struct Dispatcher<'a> {
    pool: &'a FragmentPool,
}

impl<'a> Dispatcher<'a> {
    pub fn new(pool: &'a FragmentPool) -> Self {
        Self { pool }
    }

    /// Collects `completed` into the pool and assigns the next loaded slot.
    ///
    /// Blocks while every loaded slot is already claimed. Returns `None`
    /// when there is nothing left to hand out: all blocks were dispatched or
    /// the pipeline was aborted.
    pub fn dispatch(&self, completed: Option<Completion>) -> Option<Assignment> {
        let mut state = self.pool.lock_state();

        if let Some(done) = completed {
            let fragment = &mut state.fragments[done.slot];
            debug_assert_eq!(fragment.state, FragmentState::Assigned);
            fragment.original_size = done.original_size;
            fragment.actual_bytes = done.actual_bytes;
            fragment.is_processed = true;
            fragment.state = FragmentState::Processed;
            state.counters.processed_count += 1;
            self.pool.block_processed.notify_all();
        }

        loop {
            if state.aborted {
                return None;
            }
            let counters = state.counters;
            if counters.dispatch_count < counters.read_count {
                let slot = self.pool.slot_of(counters.dispatch_count);
                let fragment = &mut state.fragments[slot];
                debug_assert_eq!(fragment.state, FragmentState::Loaded);
                fragment.state = FragmentState::Assigned;
                let assignment = Assignment {
                    slot,
                    block: fragment.block,
                    original_size: fragment.original_size,
                };
                state.counters.dispatch_count += 1;
                return Some(assignment);
            }
            if counters.dispatch_count == state.total_blocks {
                return None;
            }
            state = self
                .pool
                .wait(&self.pool.data_available, state, "a loaded fragment");
        }
    }
}
