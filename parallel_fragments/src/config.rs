//! Pipeline configuration and sizing constants.

use crate::codec::CodecKind;
use crate::error::{PipelineError, Result};
use crate::format::FRAME_PREFIX_LEN;

/// Nominal raw bytes per block. 8 MiB keeps every core busy without
/// letting a single fragment dominate the pool's memory.
pub const DEFAULT_BLOCK_SIZE: usize = 8 * 1024 * 1024;

/// Largest block size a header may declare.
pub const MAX_BLOCK_SIZE: usize = 256 * 1024 * 1024;

/// Fragments per worker in the ring.
pub const DEFAULT_POOL_COEFFICIENT: usize = 10;

/// Size of each physical read the frame reader issues on compressed input.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Default codec level (zstd scale; bzip2 clamps it to 1-9).
pub const DEFAULT_LEVEL: i32 = 3;

/// Direction of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Compress,
    Decompress,
}

/// Tunables for a pipeline run.
///
/// `block_size` and `codec` only matter when compressing: a decompression
/// run takes both from the file header.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub block_size: usize,
    pub workers: usize,
    pub pool_coefficient: usize,
    pub codec: CodecKind,
    pub level: i32,
    pub read_buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            workers: available_cores(),
            pool_coefficient: DEFAULT_POOL_COEFFICIENT,
            codec: CodecKind::Zstd,
            level: DEFAULT_LEVEL,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Number of fragments in the ring: one batch of `pool_coefficient`
    /// slots per worker.
    pub fn pool_size(&self) -> usize {
        self.workers * self.pool_coefficient
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(PipelineError::InvalidConfig(format!(
                "block size must be between 1 and {MAX_BLOCK_SIZE} bytes, got {}",
                self.block_size
            )));
        }
        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "at least one worker is required".into(),
            ));
        }
        if self.pool_coefficient == 0 {
            return Err(PipelineError::InvalidConfig(
                "pool coefficient must be at least 1".into(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "read buffer size must be at least 1 byte".into(),
            ));
        }
        Ok(())
    }
}

/// Logical core count, falling back to a single worker when the platform
/// cannot tell.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Capacity of every fragment buffer for a given block size.
///
/// Compressed output can be larger than its input, so the slot keeps
/// 12.5% headroom plus the frame prefix, and never less than what the codec
/// itself declares as its worst case.
pub fn fragment_capacity(block_size: usize, codec_bound: usize) -> usize {
    let margin = block_size + block_size / 8 + FRAME_PREFIX_LEN;
    margin.max(codec_bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_is_workers_times_coefficient() {
        let config = PipelineConfig {
            workers: 4,
            pool_coefficient: 3,
            ..PipelineConfig::default()
        };
        assert_eq!(config.pool_size(), 12);
    }

    #[test]
    fn test_validate_rejects_zero_block_size() {
        let config = PipelineConfig {
            block_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = PipelineConfig {
            workers: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fragment_capacity_margin() {
        assert_eq!(fragment_capacity(800, 0), 800 + 100 + FRAME_PREFIX_LEN);
        assert_eq!(fragment_capacity(800, 5000), 5000);
    }
}
