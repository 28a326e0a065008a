#![no_main]

use craft_protocol::config::MAX_FRAME_LEN;
use craft_protocol::utils::compression::{compress, decompress};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Raw decompression of arbitrary bytes must never panic and must
    // respect the size cap.
    if let Ok(out) = decompress(data, MAX_FRAME_LEN) {
        assert!(out.len() <= MAX_FRAME_LEN);
    }

    // Small cap: hostile output sizes are rejected, not allocated.
    let _ = decompress(data, 1024);

    // Round-trip through a real compression pass.
    if data.len() <= MAX_FRAME_LEN {
        if let Ok(compressed) = compress(data) {
            let roundtrip = decompress(&compressed, MAX_FRAME_LEN).unwrap();
            assert_eq!(roundtrip, data);
        }
    }
});
