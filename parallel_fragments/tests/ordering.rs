//! Completion order versus output order, and failures raised mid-run.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parallel_fragments::{
    BlockCodec, CodecKind, Pipeline, PipelineConfig, PipelineError, TransformError, ZstdCodec,
};

const BLOCK: usize = 1024;
const BLOCKS: u64 = 12;

fn config() -> PipelineConfig {
    PipelineConfig {
        block_size: BLOCK,
        workers: 4,
        pool_coefficient: 2,
        codec: CodecKind::Zstd,
        level: 1,
        read_buffer_size: 4096,
    }
}

/// Each block starts with its index as a little-endian u64.
fn numbered_blocks(count: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(count as usize * BLOCK);
    for index in 0..count {
        let mut block = vec![(index % 251) as u8; BLOCK];
        block[..8].copy_from_slice(&index.to_le_bytes());
        data.extend_from_slice(&block);
    }
    data
}

fn block_index(src: &[u8]) -> u64 {
    u64::from_le_bytes(src[..8].try_into().unwrap())
}

/// Zstd that sleeps longer on earlier blocks, so they finish last, and
/// records the order in which blocks complete.
struct ReverseDelayCodec {
    inner: ZstdCodec,
    done: Sender<u64>,
}

impl BlockCodec for ReverseDelayCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Zstd
    }

    fn max_compressed_len(&self, raw_len: usize) -> usize {
        self.inner.max_compressed_len(raw_len)
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
        let index = block_index(src);
        thread::sleep(Duration::from_millis((BLOCKS - index) * 10));
        let written = self.inner.compress(src, dst)?;
        self.done.send(index).unwrap();
        Ok(written)
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
        self.inner.decompress(src, dst)
    }
}

/// Fails on one chosen block.
struct FailingCodec {
    inner: ZstdCodec,
    fail_at: u64,
    panic: bool,
}

impl BlockCodec for FailingCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Zstd
    }

    fn max_compressed_len(&self, raw_len: usize) -> usize {
        self.inner.max_compressed_len(raw_len)
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
        if block_index(src) == self.fail_at {
            if self.panic {
                panic!("codec blew up on block {}", self.fail_at);
            }
            return Err(TransformError::Codec("injected".into()));
        }
        self.inner.compress(src, dst)
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
        self.inner.decompress(src, dst)
    }
}

/// Accepts `limit` bytes, then fails every write.
#[derive(Debug)]
struct ShortWriter {
    written: usize,
    limit: usize,
}

impl Write for ShortWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn drain(rx: &Receiver<u64>) -> Vec<u64> {
    rx.try_iter().collect()
}

#[test]
fn test_output_is_in_block_order_when_completion_is_not() {
    let (tx, rx) = unbounded();
    let codec = Arc::new(ReverseDelayCodec {
        inner: ZstdCodec::new(1),
        done: tx,
    });
    let pipeline = Pipeline::new(config()).with_codec(codec);
    let data = numbered_blocks(BLOCKS);

    let (stats, compressed) = pipeline
        .compress_stream(&data[..], data.len() as u64, Vec::new())
        .unwrap();
    assert_eq!(stats.blocks, BLOCKS);

    let completed = drain(&rx);
    assert_eq!(completed.len(), BLOCKS as usize);
    let mut sorted = completed.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..BLOCKS).collect::<Vec<_>>());
    assert_ne!(completed, sorted, "workers should finish out of order");

    let plain = Pipeline::new(config());
    let (_, restored) = plain
        .decompress_stream(&compressed[..], Vec::new())
        .unwrap();
    assert_eq!(restored, data);
}

#[test]
fn test_transform_error_stops_run_with_block_index() {
    let codec = Arc::new(FailingCodec {
        inner: ZstdCodec::new(1),
        fail_at: 5,
        panic: false,
    });
    let pipeline = Pipeline::new(config()).with_codec(codec);
    let data = numbered_blocks(40);

    let err = pipeline
        .compress_stream(&data[..], data.len() as u64, Vec::new())
        .unwrap_err();
    match err {
        PipelineError::Transform { block, source } => {
            assert_eq!(block, 5);
            assert!(matches!(source, TransformError::Codec(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_worker_panic_is_reported() {
    let codec = Arc::new(FailingCodec {
        inner: ZstdCodec::new(1),
        fail_at: 3,
        panic: true,
    });
    let pipeline = Pipeline::new(config()).with_codec(codec);
    let data = numbered_blocks(20);

    let err = pipeline
        .compress_stream(&data[..], data.len() as u64, Vec::new())
        .unwrap_err();
    assert!(
        matches!(err, PipelineError::WorkerPanicked(_)),
        "unexpected error: {err}"
    );
}

#[test]
fn test_write_failure_stops_run() {
    let pipeline = Pipeline::new(config());
    let data = numbered_blocks(200);
    // Room for the header and little else; the output buffer flushes on finish at the latest.
    let out = ShortWriter {
        written: 0,
        limit: 64,
    };

    let err = pipeline
        .compress_stream(&data[..], data.len() as u64, out)
        .unwrap_err();
    assert!(matches!(err, PipelineError::Io(_)), "unexpected error: {err}");
}

#[test]
fn test_short_input_stops_run() {
    let pipeline = Pipeline::new(config());
    let data = numbered_blocks(4);
    // Claims more bytes than the stream holds.
    let err = pipeline
        .compress_stream(&data[..], data.len() as u64 + 10 * BLOCK as u64, Vec::new())
        .unwrap_err();
    assert!(matches!(err, PipelineError::Io(_)), "unexpected error: {err}");
}
