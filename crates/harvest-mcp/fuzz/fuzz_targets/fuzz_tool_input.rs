#![no_main]

use harvest_mcp::handlers::{HarvestInput, validate_user};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = serde_json::from_slice::<HarvestInput>(data) {
        if let Ok(user) = validate_user(input.user.as_deref()) {
            assert!(!user.is_empty());
            assert!(!user.contains('/'));
        }
    }
});
