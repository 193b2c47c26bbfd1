#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Malformed reports must come back as errors, never panics.
    let _ = covboost::ingest::parse_report(data);
});
