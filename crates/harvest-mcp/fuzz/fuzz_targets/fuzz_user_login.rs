#![no_main]

use arbitrary::Arbitrary;
use harvest_mcp::handlers::validate_user;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct LoginInput {
    present: bool,
    login: String,
}

fuzz_target!(|input: LoginInput| {
    let user = input.present.then_some(input.login.as_str());
    match validate_user(user) {
        Ok(valid) => {
            assert_eq!(valid, valid.trim());
            assert!(!valid.chars().any(char::is_whitespace));
        }
        Err(err) => assert!(err.is_client_error()),
    }
});
