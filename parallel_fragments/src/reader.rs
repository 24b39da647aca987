//! The reader stage: fills ring slots from the input, in block order.

use std::io::{self, Read};

use log::warn;

use crate::error::Result;
use crate::format::{FrameReader, FRAME_PREFIX_LEN};
use crate::pool::FragmentPool;

/// Where blocks come from.
pub(crate) enum BlockSource<R> {
    /// Uncompressed input cut into `block_size` slices; the last one is
    /// whatever is left of `remaining`.
    Raw {
        input: R,
        block_size: usize,
        remaining: u64,
    },
    /// Length-prefixed compressed frames.
    Framed(FrameReader<R>),
}

pub(crate) struct Reader<'a, R> {
    pool: &'a FragmentPool,
    source: BlockSource<R>,
    total_blocks: u64,
}

impl<'a, R: Read> Reader<'a, R> {
    pub(crate) fn new(pool: &'a FragmentPool, source: BlockSource<R>, total_blocks: u64) -> Self {
        Self {
            pool,
            source,
            total_blocks,
        }
    }

    /// Loads every block into the pool, blocking whenever the ring is full.
    /// Returns the number of input bytes consumed.
    pub(crate) fn run(mut self) -> Result<u64> {
        let pool = self.pool;
        let mut consumed = 0u64;
        for _ in 0..self.total_blocks {
            let slot = pool.acquire_for_write()?;
            let original_size = {
                let mut buffer = pool.buffer(slot);
                self.fill(&mut buffer[..])?
            };
            consumed += match self.source {
                BlockSource::Raw { .. } => original_size as u64,
                BlockSource::Framed(_) => (FRAME_PREFIX_LEN + original_size) as u64,
            };
            pool.commit_loaded(slot, original_size);
        }

        if let BlockSource::Framed(frames) = &mut self.source {
            if frames.has_trailing_data()? {
                warn!(
                    "ignoring data after the last of {} frames",
                    frames.frames_read()
                );
            }
        }
        Ok(consumed)
    }

    fn fill(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match &mut self.source {
            BlockSource::Raw {
                input,
                block_size,
                remaining,
            } => {
                let want = (*remaining).min(*block_size as u64) as usize;
                input.read_exact(&mut buffer[..want]).map_err(|e| {
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "input ended before its announced length",
                        )
                    } else {
                        e
                    }
                })?;
                *remaining -= want as u64;
                Ok(want)
            }
            BlockSource::Framed(frames) => frames.read_block_frame(buffer),
        }
    }
}
