//! Source map emission (source map v3).
//!
//! Maps byte offsets in the emitted binary back to source file and line.
//! The binary module is one "generated line", so the mappings string is a
//! single semicolon-free group of comma-separated segments, each a base64
//! VLQ run of four fields: generated column (the byte offset), source index,
//! source line and source column, all relative to the previous segment.

use crate::compiler::codegen::binary_writer::SourceMapping;
use serde_json::json;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Encode one signed value as base64 VLQ: the sign moves into the lowest
/// bit, then 5-bit digits with a continuation flag.
fn encode_vlq(out: &mut String, value: i64) {
    let mut encoded = if value < 0 {
        (((-value) as u64) << 1) | 1
    } else {
        (value as u64) << 1
    };
    loop {
        let mut digit = (encoded & 0x1F) as usize;
        encoded >>= 5;
        if encoded != 0 {
            digit |= 0x20;
        }
        out.push(BASE64[digit] as char);
        if encoded == 0 {
            break;
        }
    }
}

/// Render the map for one module. The mappings must already be in code-offset
/// order, which is how the binary writer collects them.
pub fn write_source_map(mappings: &[SourceMapping]) -> String {
    let mut sources: Vec<&str> = Vec::new();
    for mapping in mappings {
        if !sources.contains(&mapping.source_file.as_str()) {
            sources.push(&mapping.source_file);
        }
    }

    let mut encoded = String::new();
    let mut last_offset = 0i64;
    let mut last_source = 0i64;
    let mut last_line = 0i64;
    for (index, mapping) in mappings.iter().enumerate() {
        if index > 0 {
            encoded.push(',');
        }
        let source = sources
            .iter()
            .position(|s| *s == mapping.source_file)
            .unwrap_or(0) as i64;
        // Source lines are 0-based in the mapping grammar
        let line = i64::from(mapping.source_line.saturating_sub(1));
        let offset = i64::from(mapping.wasm_offset);

        encode_vlq(&mut encoded, offset - last_offset);
        encode_vlq(&mut encoded, source - last_source);
        encode_vlq(&mut encoded, line - last_line);
        encode_vlq(&mut encoded, 0);

        last_offset = offset;
        last_source = source;
        last_line = line;
    }

    let map = json!({
        "version": 3,
        "sources": sources,
        "names": [],
        "mappings": encoded,
    });
    map.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlq(value: i64) -> String {
        let mut out = String::new();
        encode_vlq(&mut out, value);
        out
    }

    #[test]
    fn known_vlq_encodings() {
        assert_eq!(vlq(0), "A");
        assert_eq!(vlq(1), "C");
        assert_eq!(vlq(-1), "D");
        assert_eq!(vlq(15), "e");
        assert_eq!(vlq(16), "gB");
        assert_eq!(vlq(511), "+f");
        assert_eq!(vlq(512), "ggB");
    }

    #[test]
    fn segments_are_offset_deltas() {
        let mappings = vec![
            SourceMapping {
                wasm_offset: 16,
                source_line: 1,
                source_file: "Adder.java".to_owned(),
            },
            SourceMapping {
                wasm_offset: 20,
                source_line: 3,
                source_file: "Adder.java".to_owned(),
            },
        ];
        let map = write_source_map(&mappings);
        let parsed: serde_json::Value = serde_json::from_str(&map).unwrap();
        assert_eq!(parsed["version"], 3);
        assert_eq!(parsed["sources"][0], "Adder.java");
        // offset 16, source 0, line 0, col 0 -> "gBAAA"
        // delta 4, source 0, line +2, col 0 -> "IAEA"
        assert_eq!(parsed["mappings"], "gBAAA,IAEA");
    }

    #[test]
    fn multiple_sources_are_indexed_in_first_appearance_order() {
        let mappings = vec![
            SourceMapping {
                wasm_offset: 0,
                source_line: 1,
                source_file: "A.java".to_owned(),
            },
            SourceMapping {
                wasm_offset: 4,
                source_line: 1,
                source_file: "B.java".to_owned(),
            },
            SourceMapping {
                wasm_offset: 8,
                source_line: 2,
                source_file: "A.java".to_owned(),
            },
        ];
        let map = write_source_map(&mappings);
        let parsed: serde_json::Value = serde_json::from_str(&map).unwrap();
        assert_eq!(parsed["sources"][0], "A.java");
        assert_eq!(parsed["sources"][1], "B.java");
        let text = parsed["mappings"].as_str().unwrap();
        assert_eq!(text.split(',').count(), 3);
    }
}
