//! Wires the stages together for one file.
//!
//! ```text
//!   reader (calling thread)          writer thread
//!        |                                ^
//!        v                                |
//!   [ fragment pool: P slots ] ---> drained in block order
//!        ^      |
//!        |      v
//!   N workers (dedicated rayon pool) via the dispatcher
//! ```
//!
//! Every stage is joined before a run returns, whether it succeeded or not.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use indicatif::ProgressBar;
use log::info;

use crate::codec::BlockCodec;
use crate::config::{fragment_capacity, Mode, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::format::{read_header, write_header, FileHeader, FrameReader, HEADER_SIZE};
use crate::pool::FragmentPool;
use crate::reader::{BlockSource, Reader};
use crate::space::{ensure_free_space, Fs2Probe, SpaceProbe};
use crate::worker::Worker;
use crate::writer::{OutputWriter, Writer, WriterOutcome};

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub blocks: u64,
    /// Input bytes consumed, header included.
    pub bytes_in: u64,
    /// Output bytes produced, header included.
    pub bytes_out: u64,
    pub pool_size: usize,
    /// Most fragments holding data at once; never above `pool_size`.
    pub peak_loaded_fragments: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    codec: Option<Arc<dyn BlockCodec>>,
    space: Box<dyn SpaceProbe>,
    progress: Option<ProgressBar>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            codec: None,
            space: Box::new(Fs2Probe),
            progress: None,
        }
    }

    /// Uses `codec` instead of building one from the configuration (when
    /// compressing) or from the header (when decompressing).
    pub fn with_codec(mut self, codec: Arc<dyn BlockCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_space_probe<P: SpaceProbe + 'static>(mut self, probe: P) -> Self {
        self.space = Box::new(probe);
        self
    }

    /// Advances `progress` by input bytes as blocks reach the output.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn compress_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input: P,
        output: Q,
    ) -> Result<PipelineStats> {
        self.config.validate()?;
        let input = File::open(input.as_ref())?;
        let input_len = input.metadata()?.len();
        let header = self.compress_header(input_len)?;
        ensure_free_space(self.space.as_ref(), output.as_ref(), header.max_raw_len())?;

        let output = File::create(output.as_ref())?;
        let (stats, _) = self.compress_with_header(header, input, input_len, output)?;
        Ok(stats)
    }

    pub fn decompress_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input: P,
        output: Q,
    ) -> Result<PipelineStats> {
        self.config.validate()?;
        let mut input = File::open(input.as_ref())?;
        let header = read_header(&mut input)?;
        ensure_free_space(self.space.as_ref(), output.as_ref(), header.max_raw_len())?;

        let output = File::create(output.as_ref())?;
        let (stats, _) = self.decompress_with_header(header, input, output)?;
        Ok(stats)
    }

    /// Compresses exactly `input_len` bytes of `input` into `output`.
    /// Returns the output stream once everything is flushed.
    pub fn compress_stream<R: Read, W: Write + Send>(
        &self,
        input: R,
        input_len: u64,
        output: W,
    ) -> Result<(PipelineStats, W)> {
        self.config.validate()?;
        let header = self.compress_header(input_len)?;
        self.compress_with_header(header, input, input_len, output)
    }

    pub fn decompress_stream<R: Read, W: Write + Send>(
        &self,
        mut input: R,
        output: W,
    ) -> Result<(PipelineStats, W)> {
        self.config.validate()?;
        let header = read_header(&mut input)?;
        self.decompress_with_header(header, input, output)
    }

    fn compress_header(&self, input_len: u64) -> Result<FileHeader> {
        let kind = match &self.codec {
            Some(codec) => codec.kind(),
            None => self.config.codec,
        };
        FileHeader::for_input(input_len, self.config.block_size, kind)
    }

    fn compress_with_header<R: Read, W: Write + Send>(
        &self,
        header: FileHeader,
        input: R,
        input_len: u64,
        output: W,
    ) -> Result<(PipelineStats, W)> {
        let codec = match &self.codec {
            Some(codec) => Arc::clone(codec),
            None => self.config.codec.build(self.config.level),
        };
        let mut out = OutputWriter::new(output);
        write_header(&mut out, &header)?;

        let source = BlockSource::Raw {
            input,
            block_size: header.block_size as usize,
            remaining: input_len,
        };
        self.run(Mode::Compress, &header, codec.as_ref(), source, out)
    }

    fn decompress_with_header<R: Read, W: Write + Send>(
        &self,
        header: FileHeader,
        input: R,
        output: W,
    ) -> Result<(PipelineStats, W)> {
        let codec = match &self.codec {
            Some(codec) => Arc::clone(codec),
            None => header.codec.build(self.config.level),
        };
        let source = BlockSource::Framed(FrameReader::new(input, self.config.read_buffer_size));
        let (mut stats, output) =
            self.run(Mode::Decompress, &header, codec.as_ref(), source, OutputWriter::new(output))?;
        stats.bytes_in += HEADER_SIZE as u64;
        Ok((stats, output))
    }

    fn run<R: Read, W: Write + Send>(
        &self,
        mode: Mode,
        header: &FileHeader,
        codec: &dyn BlockCodec,
        source: BlockSource<R>,
        out: OutputWriter<W>,
    ) -> Result<(PipelineStats, W)> {
        let total_blocks = header.block_count as u64;
        let block_size = header.block_size as usize;
        // Short files get no more fragments or workers than they have blocks.
        let clamp = |n: usize| n.min(usize::try_from(total_blocks).unwrap_or(usize::MAX)).max(1);
        let workers = clamp(self.config.workers);
        let capacity = fragment_capacity(block_size, codec.max_compressed_len(block_size));
        let pool = FragmentPool::new(clamp(self.config.pool_size()), capacity, total_blocks);

        info!(
            "{} {} blocks of {} bytes with {} ({} workers, {} fragments of {} bytes)",
            match mode {
                Mode::Compress => "compressing",
                Mode::Decompress => "decompressing",
            },
            total_blocks,
            block_size,
            codec.kind(),
            workers,
            pool.len(),
            capacity
        );

        // Dedicated pool: every worker parks on the dispatcher while idle,
        // which must not starve the caller's global rayon pool.
        let worker_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("fragment-worker-{i}"))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("cannot start workers: {e}")))?;

        let pool_ref = &pool;
        let progress = self.progress.clone();
        let (bytes_read, writer_joined, workers_joined) = thread::scope(|s| {
            let writer = s.spawn(move || {
                match Writer::new(pool_ref, out, mode, progress).run() {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        pool_ref.abort(e);
                        None
                    }
                }
            });

            let transformers = s.spawn(move || {
                worker_pool.scope(|ws| {
                    for _ in 0..workers {
                        ws.spawn(move |_| {
                            Worker::new(pool_ref, codec, mode, block_size, total_blocks).run()
                        });
                    }
                })
            });

            let bytes_read = match Reader::new(pool_ref, source, total_blocks).run() {
                Ok(n) => Some(n),
                Err(e) => {
                    pool_ref.abort(e);
                    None
                }
            };

            (bytes_read, writer.join(), transformers.join())
        });

        if let Some(failure) = pool.take_failure() {
            return Err(failure);
        }
        let outcome: WriterOutcome<W> = writer_joined
            .map_err(|_| PipelineError::WorkerPanicked("writer"))?
            .ok_or(PipelineError::Aborted)?;
        workers_joined.map_err(|_| PipelineError::WorkerPanicked("worker"))?;
        let bytes_read = bytes_read.ok_or(PipelineError::Aborted)?;

        let counters = pool.counters();
        debug_assert_eq!(counters.write_count, total_blocks);
        let stats = PipelineStats {
            blocks: counters.write_count,
            bytes_in: bytes_read,
            bytes_out: outcome.bytes_written,
            pool_size: pool.len(),
            peak_loaded_fragments: pool.peak_loaded(),
        };
        info!(
            "done: {} blocks, {} bytes in, {} bytes out",
            stats.blocks, stats.bytes_in, stats.bytes_out
        );
        Ok((stats, outcome.output))
    }
}

/// Runs one file through a pipeline with the default configuration.
pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(
    mode: Mode,
    input: P,
    output: Q,
) -> Result<PipelineStats> {
    let pipeline = Pipeline::new(PipelineConfig::default());
    match mode {
        Mode::Compress => pipeline.compress_file(input, output),
        Mode::Decompress => pipeline.decompress_file(input, output),
    }
}
