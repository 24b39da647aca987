//! Transform workers.
//!
//! Each worker loops `Idle -> Transforming -> Done -> Idle`, passing through
//! the dispatcher at every boundary. The transform writes into a private
//! scratch buffer of fragment capacity which is then swapped with the slot's
//! buffer, so no block is ever copied back and no memory is allocated per
//! block.

use crate::codec::BlockCodec;
use crate::config::Mode;
use crate::dispatcher::{Assignment, Completion, Dispatcher};
use crate::error::{PipelineError, Result, TransformError};
use crate::pool::{AbortOnPanic, FragmentPool};

pub(crate) struct Worker<'a> {
    pool: &'a FragmentPool,
    codec: &'a dyn BlockCodec,
    mode: Mode,
    block_size: usize,
    total_blocks: u64,
    scratch: Vec<u8>,
}

impl<'a> Worker<'a> {
    pub(crate) fn new(
        pool: &'a FragmentPool,
        codec: &'a dyn BlockCodec,
        mode: Mode,
        block_size: usize,
        total_blocks: u64,
    ) -> Self {
        Self {
            pool,
            codec,
            mode,
            block_size,
            total_blocks,
            scratch: vec![0u8; pool.capacity()],
        }
    }

    /// Runs until the dispatcher has nothing left to hand out. A transform
    /// failure aborts the whole pipeline.
    pub(crate) fn run(mut self) {
        let _guard = AbortOnPanic::new(self.pool, "worker");
        let dispatcher = Dispatcher::new(self.pool);
        let mut completed = None;

        while let Some(task) = dispatcher.dispatch(completed.take()) {
            match self.transform(&task) {
                Ok(actual_bytes) => {
                    completed = Some(Completion {
                        slot: task.slot,
                        original_size: task.original_size,
                        actual_bytes,
                    });
                }
                Err(e) => {
                    self.pool.abort(e);
                    return;
                }
            }
        }
    }

    fn transform(&mut self, task: &Assignment) -> Result<usize> {
        let mut buffer = self.pool.buffer(task.slot);
        let src = &buffer[..task.original_size];

        let produced = match self.mode {
            Mode::Compress => self.codec.compress(src, &mut self.scratch),
            Mode::Decompress => self
                .codec
                .decompress(src, &mut self.scratch[..self.block_size]),
        }
        .map_err(|source| PipelineError::Transform {
            block: task.block,
            source,
        })?;

        let is_last = task.block + 1 == self.total_blocks;
        if self.mode == Mode::Decompress && !is_last && produced != self.block_size {
            return Err(PipelineError::Transform {
                block: task.block,
                source: TransformError::Malformed(format!(
                    "block decompressed to {produced} bytes, expected {}",
                    self.block_size
                )),
            });
        }

        std::mem::swap(&mut *buffer, &mut self.scratch);
        Ok(produced)
    }
}
