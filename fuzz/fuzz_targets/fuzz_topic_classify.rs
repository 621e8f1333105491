//! Fuzz target: `TopicScheme::classify`
//!
//! Drives arbitrary topic strings through the classifier and asserts that
//! it never panics and that any extracted device segment round-trips into
//! a well-formed command topic.
//!
//! cargo fuzz run fuzz_topic_classify

#![no_main]

use libfuzzer_sys::fuzz_target;

use fidolink::bus::topic::{TopicKind, TopicScheme};

fuzz_target!(|data: &[u8]| {
    let Ok(topic) = std::str::from_utf8(data) else {
        return;
    };

    let scheme = TopicScheme::new("fido/dispensers");
    match scheme.classify(topic) {
        Some(TopicKind::Status(id) | TopicKind::Data(id) | TopicKind::Response(id)) => {
            // Device segments must be a single non-empty path segment.
            assert!(!id.is_empty());
            assert!(!id.contains('/'));
            // And they must round-trip into this scheme's command topic.
            let commands = scheme.commands(&id);
            assert!(commands.starts_with("fido/dispensers/"));
            assert!(commands.ends_with("/commands"));
        }
        Some(TopicKind::Discovery) | None => {}
    }
});
