//! Cursor over a method's raw bytecode.
//!
//! Big-endian multi-byte reads, as the class-file format stores them, plus
//! the 4-byte alignment rule the switch payloads need.

use crate::compiler::compiler_errors::WasmError;
use crate::return_input_error;

pub struct BytecodeReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BytecodeReader { data, pos: 0 }
    }

    /// Offset of the next byte to be read.
    pub fn pos(&self) -> u32 {
        self.pos as u32
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_u8(&mut self) -> Result<u8, WasmError> {
        match self.data.get(self.pos) {
            Some(&byte) => {
                self.pos += 1;
                Ok(byte)
            }
            None => return_input_error!("bytecode truncated at offset {}", self.pos),
        }
    }

    pub fn read_i8(&mut self) -> Result<i8, WasmError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, WasmError> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub fn read_i16(&mut self) -> Result<i16, WasmError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, WasmError> {
        let b0 = self.read_u8()?;
        let b1 = self.read_u8()?;
        let b2 = self.read_u8()?;
        let b3 = self.read_u8()?;
        Ok(i32::from_be_bytes([b0, b1, b2, b3]))
    }

    /// Skip to the next 4-byte boundary relative to the start of the code.
    /// The switch opcodes pad their payload this way.
    pub fn align_to_4(&mut self) {
        while self.pos % 4 != 0 {
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_big_endian() {
        let mut reader = BytecodeReader::new(&[0x12, 0x34, 0xFF, 0xFE, 0xDC, 0xBA]);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_i32().unwrap(), i32::from_be_bytes([0xFF, 0xFE, 0xDC, 0xBA]));
        assert!(reader.is_at_end());
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn alignment_rounds_up_to_four() {
        let mut reader = BytecodeReader::new(&[0; 8]);
        reader.read_u8().unwrap();
        reader.align_to_4();
        assert_eq!(reader.pos(), 4);
        reader.align_to_4();
        assert_eq!(reader.pos(), 4);
    }
}
