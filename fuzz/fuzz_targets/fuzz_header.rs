#![no_main]

use libfuzzer_sys::fuzz_target;
use parallel_fragments::{read_header, FileHeader};

fuzz_target!(|data: &[u8]| {
    let mut input = data;
    if let Ok(header) = read_header(&mut input) {
        // Anything accepted must re-encode to the same bytes.
        assert!(header.block_count >= 1);
        assert_eq!(&header.to_bytes()[..], &data[..12]);
        assert_eq!(FileHeader::from_bytes(&header.to_bytes()).unwrap(), header);
    }
});
