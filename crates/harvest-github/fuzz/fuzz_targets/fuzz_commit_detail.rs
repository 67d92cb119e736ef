#![no_main]

use harvest_github::enrich::decode_file_counts;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(counts) = decode_file_counts(body) {
        // Every counted file came from one entry of the body
        assert!(counts.total() as usize <= body.len());
    }
});
