//! Output side of the pipeline.
//!
//! [`OutputWriter`] wraps the destination stream and knows how a block is
//! laid out on disk for each direction. The writer stage drains the ring
//! strictly in block order, so output order never depends on which worker
//! finished first.

use std::io::{self, BufWriter, Write};

use indicatif::ProgressBar;

use crate::config::Mode;
use crate::error::Result;
use crate::format::{encode_frame_prefix, FRAME_PREFIX_LEN, HEADER_SIZE};
use crate::pool::{AbortOnPanic, FragmentPool};

/// Buffered output stream that counts what it writes.
///
/// # Examples
///
/// ```
/// use parallel_fragments::{Mode, OutputWriter};
///
/// let mut out = OutputWriter::new(Vec::new());
/// out.write_block(Mode::Compress, b"abc").unwrap();
/// let bytes = out.finish().unwrap();
/// assert_eq!(bytes, [3, 0, 0, 0, b'a', b'b', b'c']);
/// ```
pub struct OutputWriter<W: Write> {
    inner: BufWriter<W>,
    bytes_written: u64,
}

impl<W: Write> OutputWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: BufWriter::with_capacity(1024 * 1024, writer),
            bytes_written: 0,
        }
    }

    /// Writes one block: a length-prefixed frame when compressing, the raw
    /// bytes when decompressing.
    pub fn write_block(&mut self, mode: Mode, payload: &[u8]) -> io::Result<()> {
        if mode == Mode::Compress {
            self.inner.write_all(&encode_frame_prefix(payload.len()))?;
            self.bytes_written += FRAME_PREFIX_LEN as u64;
        }
        self.inner.write_all(payload)?;
        self.bytes_written += payload.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flushes buffered data and hands back the underlying stream.
    pub fn finish(self) -> io::Result<W> {
        self.inner.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write> Write for OutputWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub(crate) struct WriterOutcome<W> {
    pub(crate) output: W,
    pub(crate) bytes_written: u64,
}

pub(crate) struct Writer<'a, W: Write> {
    pool: &'a FragmentPool,
    out: OutputWriter<W>,
    mode: Mode,
    progress: Option<ProgressBar>,
}

impl<'a, W: Write> Writer<'a, W> {
    pub(crate) fn new(
        pool: &'a FragmentPool,
        out: OutputWriter<W>,
        mode: Mode,
        progress: Option<ProgressBar>,
    ) -> Self {
        Self {
            pool,
            out,
            mode,
            progress,
        }
    }

    /// Drains every block in order, then flushes the output.
    pub(crate) fn run(mut self) -> Result<WriterOutcome<W>> {
        let pool = self.pool;
        let _guard = AbortOnPanic::new(pool, "writer");

        // The header was consumed before any block; count it so a finished
        // run reports the whole input.
        if let (Some(progress), Mode::Decompress) = (&self.progress, self.mode) {
            progress.inc(HEADER_SIZE as u64);
        }

        while let Some(drain) = pool.wait_processed()? {
            {
                let buffer = pool.buffer(drain.slot);
                self.out
                    .write_block(self.mode, &buffer[..drain.actual_bytes])?;
            }
            pool.release_after_write(drain.slot);

            if let Some(progress) = &self.progress {
                let consumed = match self.mode {
                    Mode::Compress => drain.original_size,
                    Mode::Decompress => FRAME_PREFIX_LEN + drain.original_size,
                };
                progress.inc(consumed as u64);
            }
        }

        let bytes_written = self.out.bytes_written();
        let output = self.out.finish()?;
        Ok(WriterOutcome {
            output,
            bytes_written,
        })
    }
}
