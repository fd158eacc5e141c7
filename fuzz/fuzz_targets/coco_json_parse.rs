//! Fuzz target for COCO instances JSON parsing.
//!
//! Run with:
//!   cargo +nightly fuzz run coco_json_parse

#![no_main]

use libfuzzer_sys::fuzz_target;
use dsconv::ir::io_coco_json::from_coco_slice;

fuzz_target!(|data: &[u8]| {
    // 10MB is generous for one instances file.
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    // Errors are expected; only panics and hangs matter.
    let _ = from_coco_slice(data);
});
