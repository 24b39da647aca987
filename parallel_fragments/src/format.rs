//! On-disk framing: the file header and length-prefixed block frames.
//!
//! ```text
//! header (12 bytes, little-endian)
//!   block_count: i32   number of frames that follow, always >= 1
//!   block_size:  u32   nominal raw bytes per block
//!   codec_id:    u16   see CodecKind::id
//!   reserved:    u16   zero
//! body
//!   block_count x ( length: i32 | payload[length] )
//! ```
//!
//! Raw (uncompressed) files carry no framing at all: blocks are implicit
//! `block_size` slices and the last one is whatever remains.

use std::io::{self, Read, Write};

use crate::codec::CodecKind;
use crate::config::MAX_BLOCK_SIZE;
use crate::error::{PipelineError, Result};

/// Size of the serialized [`FileHeader`].
pub const HEADER_SIZE: usize = 12;

/// Size of the length prefix in front of every compressed block.
pub const FRAME_PREFIX_LEN: usize = 4;

/// Decoded file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub block_count: u32,
    pub block_size: u32,
    pub codec: CodecKind,
}

impl FileHeader {
    /// Header for compressing `input_len` bytes.
    ///
    /// An empty input still produces one (empty) block so that a block count
    /// of zero can keep meaning corruption.
    pub fn for_input(input_len: u64, block_size: usize, codec: CodecKind) -> Result<Self> {
        if block_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "block size must be at least 1 byte".into(),
            ));
        }
        let block_count = input_len.div_ceil(block_size as u64).max(1);
        if block_count > i32::MAX as u64 {
            return Err(PipelineError::InvalidConfig(format!(
                "{input_len} bytes need {block_count} blocks of {block_size} bytes, more than a header can hold"
            )));
        }
        Ok(Self {
            block_count: block_count as u32,
            block_size: u32::try_from(block_size).map_err(|_| {
                PipelineError::InvalidConfig(format!("block size {block_size} does not fit in u32"))
            })?,
            codec,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&(self.block_count as i32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.block_size.to_le_bytes());
        buf[8..10].copy_from_slice(&self.codec.id().to_le_bytes());
        // reserved[2] stays zero
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let block_count = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let block_size = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let codec_id = u16::from_le_bytes([buf[8], buf[9]]);
        let reserved = u16::from_le_bytes([buf[10], buf[11]]);

        if block_count < 1 {
            return Err(PipelineError::CorruptHeader(format!(
                "block count {block_count} is not positive"
            )));
        }
        if block_size == 0 || block_size as usize > MAX_BLOCK_SIZE {
            return Err(PipelineError::CorruptHeader(format!(
                "block size {block_size} is out of range"
            )));
        }
        let codec = CodecKind::from_id(codec_id).ok_or_else(|| {
            PipelineError::CorruptHeader(format!("unknown codec id {codec_id}"))
        })?;
        if reserved != 0 {
            return Err(PipelineError::CorruptHeader(
                "reserved header bytes are not zero".into(),
            ));
        }

        Ok(Self {
            block_count: block_count as u32,
            block_size,
            codec,
        })
    }

    /// Raw bytes the decompressed file can occupy at most.
    pub fn max_raw_len(&self) -> u64 {
        self.block_count as u64 * self.block_size as u64
    }
}

pub fn write_header<W: Write>(writer: &mut W, header: &FileHeader) -> io::Result<()> {
    writer.write_all(&header.to_bytes())
}

pub fn read_header<R: Read>(reader: &mut R) -> Result<FileHeader> {
    let mut buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            PipelineError::CorruptHeader(format!("input is shorter than the {HEADER_SIZE}-byte header"))
        }
        _ => PipelineError::Io(e),
    })?;
    FileHeader::from_bytes(&buf)
}

pub fn encode_frame_prefix(len: usize) -> [u8; FRAME_PREFIX_LEN] {
    (len as i32).to_le_bytes()
}

/// Pulls length-prefixed frames out of a compressed stream.
///
/// The input is consumed in fixed-size physical reads. Whatever a read
/// leaves unconsumed (part of a length prefix, part of a payload) stays in
/// the carry-over window and is picked up by the next call, so frames can
/// straddle read boundaries at any byte.
pub struct FrameReader<R> {
    inner: R,
    chunk: Box<[u8]>,
    pos: usize,
    filled: usize,
    frames_read: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, read_buffer_size: usize) -> Self {
        Self {
            inner,
            chunk: vec![0u8; read_buffer_size.max(1)].into_boxed_slice(),
            pos: 0,
            filled: 0,
            frames_read: 0,
        }
    }

    /// Bytes read from the stream but not yet handed out.
    pub fn carry_over(&self) -> &[u8] {
        &self.chunk[self.pos..self.filled]
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Reads the next frame's payload into the front of `dst` and returns
    /// its length.
    pub fn read_block_frame(&mut self, dst: &mut [u8]) -> Result<usize> {
        let block = self.frames_read;
        let corrupt = |reason: String| PipelineError::CorruptFrame { block, reason };

        let mut prefix = [0u8; FRAME_PREFIX_LEN];
        match self.copy_exact(&mut prefix)? {
            0 => return Err(corrupt("stream ended before the frame".into())),
            FRAME_PREFIX_LEN => {}
            n => return Err(corrupt(format!("stream ended inside the length prefix after {n} bytes"))),
        }

        let declared = i32::from_le_bytes(prefix);
        if declared < 0 {
            return Err(corrupt(format!("negative frame length {declared}")));
        }
        let len = declared as usize;
        if len > dst.len() {
            return Err(corrupt(format!(
                "frame length {len} exceeds fragment capacity {}",
                dst.len()
            )));
        }

        let copied = self.copy_exact(&mut dst[..len])?;
        if copied < len {
            return Err(corrupt(format!(
                "stream ended mid-frame: {copied} of {len} payload bytes"
            )));
        }
        self.frames_read += 1;
        Ok(len)
    }

    /// True when the stream has bytes beyond the frames consumed so far.
    pub fn has_trailing_data(&mut self) -> io::Result<bool> {
        if self.pos < self.filled {
            return Ok(true);
        }
        self.refill()
    }

    /// Copies from the carry-over window, refilling it from the stream as
    /// needed. Returns how many bytes were copied before end of stream.
    fn copy_exact(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let mut copied = 0;
        while copied < dst.len() {
            if self.pos == self.filled && !self.refill()? {
                break;
            }
            let n = (self.filled - self.pos).min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
            self.pos += n;
            copied += n;
        }
        Ok(copied)
    }

    fn refill(&mut self) -> io::Result<bool> {
        loop {
            match self.inner.read(&mut self.chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.pos = 0;
                    self.filled = n;
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
