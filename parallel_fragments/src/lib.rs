//! Parallel block compression with bounded memory.
//!
//! A file is cut into fixed-size blocks which flow through a fixed ring of
//! reusable buffers (the fragment pool):
//!
//! 1. **Reader** (calling thread): loads raw blocks or compressed frames
//!    into the next free slot, blocking when the ring is full.
//! 2. **Workers** (one per core): take loaded slots from the dispatcher and
//!    compress or decompress them.
//! 3. **Writer** (own thread): drains slots in original block order and
//!    frees them for the reader.
//!
//! Memory stays at `pool_size x fragment_capacity` plus one scratch buffer
//! per worker, whatever the file size.
//!
//! ```no_run
//! use parallel_fragments::{Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::new(PipelineConfig::default());
//! pipeline.compress_file("data.bin", "data.frag")?;
//! pipeline.decompress_file("data.frag", "data.out")?;
//! # Ok::<(), parallel_fragments::PipelineError>(())
//! ```

pub mod codec;
pub mod config;
pub mod digest;
pub mod dispatcher;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod pool;
mod reader;
pub mod space;
mod worker;
pub mod writer;

pub use codec::{BlockCodec, Bzip2Codec, CodecKind, ZstdCodec};
pub use config::{Mode, PipelineConfig, DEFAULT_BLOCK_SIZE, DEFAULT_POOL_COEFFICIENT};
pub use digest::hash_file;
pub use error::{PipelineError, Result, TransformError};
pub use format::{read_header, write_header, FileHeader, FrameReader, FRAME_PREFIX_LEN, HEADER_SIZE};
pub use pipeline::{run, Pipeline, PipelineStats};
pub use pool::{Counters, FragmentPool};
pub use space::{Fs2Probe, SpaceProbe};
pub use writer::OutputWriter;
