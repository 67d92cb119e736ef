#![no_main]

use harvest_github::client::extract_data;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(body) = serde_json::from_slice::<serde_json::Value>(data) {
        if let Ok(extracted) = extract_data(body) {
            assert!(extracted.is_object());
        }
    }
});
