//! Fuzzing target for the strict digest parser

#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_core::Digest;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(digest) = s.parse::<Digest>() {
            // anything that parses must round-trip exactly
            let rendered = digest.to_string();
            let reparsed: Digest = rendered.parse().expect("canonical form must parse");
            assert_eq!(reparsed, digest);
        }
    }
});
