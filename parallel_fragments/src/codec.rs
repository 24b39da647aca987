//! Block transform primitives.
//!
//! A codec turns one independent block into another and reports exactly how
//! many bytes it produced. The pipeline never looks at buffer contents to
//! work out a length, so the count a codec returns is the only thing that
//! decides what ends up on disk.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bzip2::{Action, Compress, Compression, Decompress, Status};

use crate::error::TransformError;

/// Codec identifiers as persisted in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Zstd,
    Bzip2,
}

impl CodecKind {
    pub fn id(self) -> u16 {
        match self {
            CodecKind::Zstd => 1,
            CodecKind::Bzip2 => 2,
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            1 => Some(CodecKind::Zstd),
            2 => Some(CodecKind::Bzip2),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecKind::Zstd => "zstd",
            CodecKind::Bzip2 => "bzip2",
        }
    }

    /// Instantiates the codec at the given level.
    pub fn build(self, level: i32) -> Arc<dyn BlockCodec> {
        match self {
            CodecKind::Zstd => Arc::new(ZstdCodec::new(level)),
            CodecKind::Bzip2 => Arc::new(Bzip2Codec::new(level)),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zstd" => Ok(CodecKind::Zstd),
            "bzip2" | "bz2" => Ok(CodecKind::Bzip2),
            other => Err(format!("unknown codec '{other}' (expected zstd or bzip2)")),
        }
    }
}

/// A block transform that writes into a caller-owned buffer.
///
/// Implementations must be stateless across calls: every block is
/// compressed and decompressed independently, possibly on different threads.
pub trait BlockCodec: Send + Sync {
    fn kind(&self) -> CodecKind;

    /// Worst-case compressed size for `raw_len` input bytes.
    fn max_compressed_len(&self, raw_len: usize) -> usize;

    /// Compresses `src` into `dst`, returning the exact number of bytes written.
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError>;

    /// Decompresses `src` into `dst`, returning the exact number of bytes
    /// written. Output that would not fit in `dst` is an error.
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError>;
}

/// zstd through the bulk API, one context per call.
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl BlockCodec for ZstdCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Zstd
    }

    fn max_compressed_len(&self, raw_len: usize) -> usize {
        zstd::zstd_safe::compress_bound(raw_len)
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
        zstd::bulk::compress_to_buffer(src, dst, self.level)
            .map_err(|e| TransformError::Codec(e.to_string()))
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
        zstd::bulk::decompress_to_buffer(src, dst)
            .map_err(|e| TransformError::Malformed(e.to_string()))
    }
}

/// bzip2 through the low-level stream API so output lands directly in the
/// fragment buffer.
pub struct Bzip2Codec {
    level: u32,
}

/// bzip2's recommended default work factor.
const BZIP2_WORK_FACTOR: u32 = 30;

impl Bzip2Codec {
    pub fn new(level: i32) -> Self {
        Self {
            level: level.clamp(1, 9) as u32,
        }
    }
}

impl BlockCodec for Bzip2Codec {
    fn kind(&self) -> CodecKind {
        CodecKind::Bzip2
    }

    fn max_compressed_len(&self, raw_len: usize) -> usize {
        // Bound documented by libbzip2 for BZ2_bzBuffToBuffCompress.
        raw_len + raw_len / 100 + 600
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
        let mut stream = Compress::new(Compression::new(self.level), BZIP2_WORK_FACTOR);
        loop {
            let consumed = stream.total_in() as usize;
            let produced = stream.total_out() as usize;
            let status = stream
                .compress(&src[consumed..], &mut dst[produced..], Action::Finish)
                .map_err(|e| TransformError::Codec(e.to_string()))?;
            if matches!(status, Status::StreamEnd) {
                return Ok(stream.total_out() as usize);
            }
            if stream.total_out() as usize == produced && stream.total_in() as usize == consumed {
                return Err(TransformError::OutputOverflow {
                    capacity: dst.len(),
                });
            }
        }
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, TransformError> {
        let mut stream = Decompress::new(false);
        loop {
            let consumed = stream.total_in() as usize;
            let produced = stream.total_out() as usize;
            let status = stream
                .decompress(&src[consumed..], &mut dst[produced..])
                .map_err(|e| TransformError::Malformed(e.to_string()))?;
            if matches!(status, Status::StreamEnd) {
                if (stream.total_in() as usize) < src.len() {
                    return Err(TransformError::Malformed(format!(
                        "{} trailing bytes after bzip2 stream",
                        src.len() - stream.total_in() as usize
                    )));
                }
                return Ok(stream.total_out() as usize);
            }
            if stream.total_out() as usize == produced && stream.total_in() as usize == consumed {
                return Err(if produced == dst.len() {
                    TransformError::OutputOverflow {
                        capacity: dst.len(),
                    }
                } else {
                    TransformError::Malformed("truncated bzip2 stream".into())
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"fragment pool ".iter().cycle().take(10_000).copied().collect()
    }

    fn round_trip(codec: &dyn BlockCodec, data: &[u8]) -> Vec<u8> {
        let mut compressed = vec![0u8; codec.max_compressed_len(data.len())];
        let n = codec.compress(data, &mut compressed).unwrap();
        let mut out = vec![0u8; data.len() + 64];
        let m = codec.decompress(&compressed[..n], &mut out).unwrap();
        out.truncate(m);
        out
    }

    #[test]
    fn test_zstd_round_trip_reports_exact_length() {
        let codec = ZstdCodec::new(3);
        let data = sample();
        assert_eq!(round_trip(&codec, &data), data);
    }

    #[test]
    fn test_bzip2_round_trip_reports_exact_length() {
        let codec = Bzip2Codec::new(9);
        let data = sample();
        assert_eq!(round_trip(&codec, &data), data);
    }

    #[test]
    fn test_empty_block_round_trip() {
        for kind in [CodecKind::Zstd, CodecKind::Bzip2] {
            let codec = kind.build(3);
            assert!(round_trip(codec.as_ref(), &[]).is_empty());
        }
    }

    #[test]
    fn test_compressed_length_excludes_trailing_zeros() {
        // Data that ends in a long zero run must not be cut short.
        let mut data = sample();
        data.extend(std::iter::repeat(0u8).take(4096));
        let codec = ZstdCodec::new(1);
        assert_eq!(round_trip(&codec, &data), data);
    }

    #[test]
    fn test_zstd_rejects_garbage() {
        let codec = ZstdCodec::new(3);
        let mut out = vec![0u8; 1024];
        let err = codec.decompress(b"definitely not zstd", &mut out);
        assert!(matches!(err, Err(TransformError::Malformed(_))));
    }

    #[test]
    fn test_bzip2_rejects_garbage() {
        let codec = Bzip2Codec::new(6);
        let mut out = vec![0u8; 1024];
        assert!(codec.decompress(b"BZh9 but then nonsense", &mut out).is_err());
    }

    #[test]
    fn test_trailing_bytes_after_stream_are_rejected() {
        for codec in [
            Box::new(ZstdCodec::new(3)) as Box<dyn BlockCodec>,
            Box::new(Bzip2Codec::new(6)),
        ] {
            let mut frame = vec![0u8; codec.max_compressed_len(11)];
            let n = codec.compress(b"hello world", &mut frame).unwrap();
            let mut payload = frame[..n].to_vec();
            payload.extend_from_slice(b"JUNKJUNK");

            let mut out = vec![0u8; 1024];
            assert_eq!(codec.decompress(&frame[..n], &mut out).unwrap(), 11);
            let err = codec.decompress(&payload, &mut out);
            assert!(
                matches!(err, Err(TransformError::Malformed(_))),
                "{} accepted trailing bytes: {err:?}",
                codec.kind()
            );
        }
    }

    #[test]
    fn test_decompress_into_small_buffer_fails() {
        let codec = ZstdCodec::new(3);
        let data = sample();
        let mut compressed = vec![0u8; codec.max_compressed_len(data.len())];
        let n = codec.compress(&data, &mut compressed).unwrap();
        let mut out = vec![0u8; data.len() / 2];
        assert!(codec.decompress(&compressed[..n], &mut out).is_err());
    }

    #[test]
    fn test_codec_ids_are_stable() {
        for kind in [CodecKind::Zstd, CodecKind::Bzip2] {
            assert_eq!(CodecKind::from_id(kind.id()), Some(kind));
            assert_eq!(kind.name().parse::<CodecKind>().unwrap(), kind);
        }
        assert_eq!(CodecKind::from_id(0), None);
        assert!("gzip".parse::<CodecKind>().is_err());
    }
}
