//! Whole-file digests for checking that a round trip reproduced its input.
//! Not used by the pipeline itself.

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::MmapOptions;
use xxhash_rust::xxh3::xxh3_64;

/// xxh3-64 of a file's contents, read through a memory map.
pub fn hash_file<P: AsRef<Path>>(path: P) -> io::Result<u64> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(xxh3_64(&[]));
    }
    // The map is only read, and only for the duration of this call.
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    Ok(xxh3_64(&mmap))
}

pub fn hash_bytes(data: &[u8]) -> u64 {
    xxh3_64(data)
}
