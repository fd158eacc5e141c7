//! Fuzz target for a single YOLO label line.

#![no_main]

use libfuzzer_sys::fuzz_target;
use dsconv::ir::io_yolo::fuzz_parse_label_line;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    if line.len() > 64 * 1024 {
        return;
    }

    let _ = fuzz_parse_label_line(line);
});
