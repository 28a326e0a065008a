#![no_main]

use craft_protocol::core::varint::{read_varint, varint_len, write_varint};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic.
    let mut slice = data;
    if let Ok((value, consumed)) = read_varint(&mut slice) {
        assert!(consumed >= 1 && consumed <= 5);

        // The decoded value must survive a minimal re-encode/decode cycle.
        let mut reencoded = Vec::new();
        write_varint(&mut reencoded, value);
        assert_eq!(reencoded.len(), varint_len(value));

        let mut reencoded_slice = &reencoded[..];
        let (roundtrip, _) = read_varint(&mut reencoded_slice).unwrap();
        assert_eq!(roundtrip, value);
    }
});
