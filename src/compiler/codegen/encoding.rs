//! Little-endian and LEB128 output primitives.
//!
//! [`BinaryWriter`] is the single in-memory stream type behind every binary
//! section of the module: the section buffers, the per-function code streams
//! and the final file image all write through it. Integers use LEB128
//! (unsigned `varuint32`, signed 64-bit capable `varint`), multi-byte scalars
//! are little-endian, and strings are UTF-8 with a LEB128 byte-length prefix.

use crate::compiler::compiler_errors::WasmError;
use crate::return_file_error;
use std::io::Write;
use std::path::Path;

/// A growable little-endian output stream.
#[derive(Debug, Default, Clone)]
pub struct BinaryWriter {
    data: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        BinaryWriter { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        BinaryWriter {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Current byte length of the stream. The binary module writer uses this
    /// to record where each function's code begins for the source map.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Drop all content but keep the allocation. Section buffers are reset
    /// between emissions rather than reallocated.
    pub fn reset(&mut self) {
        self.data.clear();
    }

    pub fn write_byte(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append another stream's content to this one.
    pub fn write_stream(&mut self, other: &BinaryWriter) {
        self.data.extend_from_slice(&other.data);
    }

    pub fn write_i32_le(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64_le(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32_le(&mut self, value: f32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f64_le(&mut self, value: f64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Unsigned LEB128. The unsigned parameter type is what rules out the
    /// negative inputs the wire format cannot carry.
    pub fn write_varuint(&mut self, mut value: u32) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.data.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    /// Signed LEB128, 64-bit capable. Terminates when the remaining value is
    /// 0 with the sign bit of the last byte clear, or -1 with it set.
    pub fn write_varint(&mut self, mut value: i64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            let sign_clear = byte & 0x40 == 0;
            if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
                self.data.push(byte);
                break;
            }
            self.data.push(byte | 0x80);
        }
    }

    /// UTF-8 string with a LEB128 byte-length prefix. No BOM.
    pub fn write_string(&mut self, value: &str) {
        self.write_varuint(value.len() as u32);
        self.data.extend_from_slice(value.as_bytes());
    }

    pub fn save_to(&self, path: &Path) -> Result<(), WasmError> {
        let mut file = match std::fs::File::create(path) {
            Ok(file) => file,
            Err(e) => return_file_error!("could not create {}: {}", path.display(), e),
        };
        if let Err(e) = file.write_all(&self.data) {
            return_file_error!("could not write {}: {}", path.display(), e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_varuint(bytes: &[u8]) -> (u32, usize) {
        let mut result: u32 = 0;
        let mut shift = 0;
        for (i, byte) in bytes.iter().enumerate() {
            result |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return (result, i + 1);
            }
            shift += 7;
        }
        panic!("unterminated varuint");
    }

    fn decode_varint(bytes: &[u8]) -> (i64, usize) {
        let mut result: i64 = 0;
        let mut shift = 0;
        for (i, byte) in bytes.iter().enumerate() {
            result |= i64::from(byte & 0x7F) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return (result, i + 1);
            }
        }
        panic!("unterminated varint");
    }

    #[test]
    fn varuint_single_byte_boundary() {
        let mut w = BinaryWriter::new();
        w.write_varuint(127);
        assert_eq!(w.as_slice(), &[0x7F]);

        w.reset();
        w.write_varuint(128);
        assert_eq!(w.as_slice(), &[0x80, 0x01]);
    }

    #[test]
    fn varint_known_encodings() {
        let mut w = BinaryWriter::new();
        w.write_varint(-1);
        assert_eq!(w.as_slice(), &[0x7F]);

        w.reset();
        w.write_varint(63);
        assert_eq!(w.as_slice(), &[0x3F]);

        w.reset();
        w.write_varint(64);
        assert_eq!(w.as_slice(), &[0xC0, 0x00]);

        w.reset();
        w.write_varint(-64);
        assert_eq!(w.as_slice(), &[0x40]);

        w.reset();
        w.write_varint(-65);
        assert_eq!(w.as_slice(), &[0xBF, 0x7F]);
    }

    #[test]
    fn little_endian_scalars() {
        let mut w = BinaryWriter::new();
        w.write_i32_le(0x0403_0201);
        assert_eq!(w.as_slice(), &[0x01, 0x02, 0x03, 0x04]);

        w.reset();
        w.write_f64_le(1.0);
        assert_eq!(w.as_slice(), &1.0f64.to_le_bytes());
    }

    #[test]
    fn string_is_length_prefixed_utf8() {
        let mut w = BinaryWriter::new();
        w.write_string("memory");
        assert_eq!(w.as_slice()[0], 6);
        assert_eq!(&w.as_slice()[1..], b"memory");
    }

    #[test]
    fn stream_into_stream() {
        let mut inner = BinaryWriter::new();
        inner.write_byte(0xAA);
        let mut outer = BinaryWriter::new();
        outer.write_byte(0x01);
        outer.write_stream(&inner);
        assert_eq!(outer.as_slice(), &[0x01, 0xAA]);
        assert_eq!(inner.len(), 1);
    }

    proptest! {
        #[test]
        fn varuint_round_trips(value in any::<u32>()) {
            let mut w = BinaryWriter::new();
            w.write_varuint(value);
            let (decoded, used) = decode_varuint(w.as_slice());
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(used, w.len());
        }

        #[test]
        fn varint_round_trips(value in any::<i64>()) {
            let mut w = BinaryWriter::new();
            w.write_varint(value);
            let (decoded, used) = decode_varint(w.as_slice());
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(used, w.len());
        }
    }
}
