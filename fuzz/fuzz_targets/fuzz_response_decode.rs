//! Fuzz target: response envelope decoding
//!
//! Feeds arbitrary bytes to the response parser and the generic object
//! parser, asserting that malformed input is rejected cleanly and that a
//! parsed response always classifies into one of the known outcomes.
//!
//! cargo fuzz run fuzz_response_decode

#![no_main]

use libfuzzer_sys::fuzz_target;

use fidolink::bus::envelope::{ResponseMessage, ResponseOutcome, parse_object};

fuzz_target!(|data: &[u8]| {
    if let Ok(response) = ResponseMessage::parse(data) {
        // Any parsed response classifies without panicking.
        match response.outcome() {
            ResponseOutcome::Success | ResponseOutcome::InProgress => {}
            ResponseOutcome::Failure(message) => {
                // Failure always carries some human-readable message.
                assert!(!message.is_empty());
            }
        }
        let _ = response.command_name();
    }

    // The object parser only ever yields JSON objects.
    if let Ok(map) = parse_object(data) {
        let _ = map.len();
    }
});
