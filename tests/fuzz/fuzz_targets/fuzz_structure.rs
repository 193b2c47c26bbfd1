#![no_main]
use std::collections::BTreeSet;

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let analyzer = covboost::structure::StructuralAnalyzer::new();
        let lines: BTreeSet<u32> = (1..=s.lines().count() as u32).collect();
        let _ = analyzer.analyze_file(s, &lines);
    }
});
