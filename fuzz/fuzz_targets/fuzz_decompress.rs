#![no_main]

use libfuzzer_sys::fuzz_target;
use parallel_fragments::{Pipeline, PipelineConfig};

fuzz_target!(|data: &[u8]| {
    if data.len() > 1_000_000 {
        return;
    }
    // The ring never outgrows the block count, but many blocks of up to
    // 256 MiB would still exceed libFuzzer's default rss limit.
    if data.len() >= 8 {
        let block_size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if block_size > 1 << 20 {
            return;
        }
    }

    let pipeline = Pipeline::new(PipelineConfig {
        workers: 2,
        pool_coefficient: 2,
        read_buffer_size: 4096,
        ..PipelineConfig::default()
    });
    // Must return, with output or an error, and never hang or panic.
    let _ = pipeline.decompress_stream(data, Vec::new());
});
