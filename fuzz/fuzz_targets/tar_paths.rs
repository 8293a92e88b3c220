//! Fuzzing target for path normalization and whiteout recognition

#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_tarfs::{path, whiteout};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let normalized = path::normalize(s);
        // normalized paths are root-relative and free of traversal
        assert!(!normalized.starts_with('/'));
        assert!(normalized.split('/').all(|c| c != ".." && c != "." && !c.is_empty())
            || normalized.is_empty());
        // normalization is idempotent
        assert_eq!(path::normalize(&normalized), normalized);

        if whiteout::is_whiteout(&normalized) {
            // every whiteout names a target inside the archive
            let target = whiteout::target(&normalized).expect("whiteout without target");
            assert!(!target.starts_with('/'));
        }
    }
});
