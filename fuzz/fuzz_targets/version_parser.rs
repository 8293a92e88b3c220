//! Fuzzing target for the version-vector parser

#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_core::Version;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(version) = s.parse::<Version>() {
            let rendered = version.to_string();
            let reparsed: Version = rendered.parse().expect("canonical form must parse");
            assert_eq!(reparsed, version);
            // comparison must at least be reflexive on whatever parsed
            assert_eq!(version.cmp(&reparsed), std::cmp::Ordering::Equal);
            let _ = version.pretty();
        }
    }
});
