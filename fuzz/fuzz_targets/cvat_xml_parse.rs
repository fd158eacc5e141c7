//! Fuzz target for CVAT `annotations.xml` parsing.
//!
//! Covers meta/project and meta/task handling, subset resolution and the
//! box/polygon/tag element parsers.

#![no_main]

use libfuzzer_sys::fuzz_target;
use dsconv::ir::io_cvat_xml::from_cvat_xml_slice;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }
    let _ = from_cvat_xml_slice(data);
});
