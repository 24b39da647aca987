#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parallel_fragments::FrameReader;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    data: Vec<u8>,
    read_buffer_size: u16,
    capacity: u16,
}

fuzz_target!(|input: FuzzInput| {
    if input.data.len() > 1_000_000 {
        return;
    }

    let mut frames = FrameReader::new(&input.data[..], input.read_buffer_size as usize);
    let mut dst = vec![0u8; input.capacity as usize];
    let mut consumed = 0;

    // Every frame either comes out whole or is reported as corrupt.
    while let Ok(len) = frames.read_block_frame(&mut dst) {
        assert!(len <= dst.len());
        consumed += 4 + len;
        assert!(consumed <= input.data.len());
    }
});
