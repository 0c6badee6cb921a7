//! Instruction encoding and host-side decoding.
//!
//! The controller decodes the instruction region one byte per cycle; this
//! module decodes the same bytes in one pass for disassembly and for
//! checking images. Both sides take operand lengths from
//! [`IsaConfig::operand_len`].

use super::{IsaConfig, Opcode};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Errors from host-side instruction decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough bytes left for the operand block.
    #[error("incomplete instruction at PC 0x{pc:06X}: need {needed} bytes, have {have}")]
    Incomplete {
        /// Byte address of the opcode.
        pc: u32,
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        have: usize,
    },

    /// Opcode byte outside the recognized set.
    #[error("unknown opcode 0x{opcode:02X} at PC 0x{pc:06X}")]
    UnknownOpcode {
        /// The opcode byte.
        opcode: u8,
        /// Byte address where it was found.
        pc: u32,
    },
}

/// Operand staging fields, filled at fixed offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Operands {
    /// Address operand (line address, or run length for `Run`).
    pub address: u32,
    /// Port buffer id (load/store only).
    pub port_buffer: u8,
    /// Line count (load/store only).
    pub num_lines: u8,
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Operation tag.
    pub opcode: Opcode,
    /// Operand fields (zero where the opcode has none).
    pub operands: Operands,
}

impl Instruction {
    /// Instruction without operands.
    pub fn new(opcode: Opcode) -> Self {
        Self { opcode, operands: Operands::default() }
    }

    /// Instruction with an address operand.
    pub fn with_address(opcode: Opcode, address: u32) -> Self {
        Self {
            opcode,
            operands: Operands { address, ..Operands::default() },
        }
    }

    /// Encoded size in bytes.
    pub fn size(&self, isa: &IsaConfig) -> usize {
        isa.instruction_len(self.opcode)
    }

    /// Append the encoding of this instruction to `out`.
    ///
    /// The address must already fit the operand width.
    pub fn encode_into(&self, isa: &IsaConfig, out: &mut Vec<u8>) {
        out.push(self.opcode.byte());
        if isa.operand_len(self.opcode) == 0 {
            return;
        }
        let address = self.operands.address & isa.max_operand_value();
        let le = u64::from(address).to_le_bytes();
        out.extend_from_slice(&le[..isa.address_bytes.min(le.len())]);
        if self.opcode.has_port_operands() {
            out.push(self.operands.port_buffer);
            out.push(self.operands.num_lines);
        }
    }

    /// Encode to a fresh byte vector.
    pub fn encode(&self, isa: &IsaConfig) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size(isa));
        self.encode_into(isa, &mut out);
        out
    }

    /// Decode one instruction from `bytes`, which start at byte address `pc`.
    pub fn decode(bytes: &[u8], pc: u32, isa: &IsaConfig) -> Result<Self, DecodeError> {
        let first = *bytes.first().ok_or(DecodeError::Incomplete {
            pc,
            needed: 1,
            have: 0,
        })?;
        let opcode = Opcode::from_byte(first).ok_or(DecodeError::UnknownOpcode { opcode: first, pc })?;

        let needed = isa.instruction_len(opcode);
        if bytes.len() < needed {
            return Err(DecodeError::Incomplete { pc, needed, have: bytes.len() });
        }

        let mut inst = Instruction::new(opcode);
        if needed == 1 {
            return Ok(inst);
        }

        let incomplete = |_| DecodeError::Incomplete { pc, needed, have: bytes.len() };
        let mut cursor = Cursor::new(&bytes[1..needed]);
        inst.operands.address = cursor
            .read_uint::<LittleEndian>(isa.address_bytes)
            .map_err(incomplete)? as u32;
        if opcode.has_port_operands() {
            inst.operands.port_buffer = cursor.read_u8().map_err(incomplete)?;
            inst.operands.num_lines = cursor.read_u8().map_err(incomplete)?;
        }
        Ok(inst)
    }

    /// Human-readable disassembly.
    pub fn disassemble(&self) -> String {
        let ops = &self.operands;
        match self.opcode {
            Opcode::Reset => "reset".to_string(),
            Opcode::ConfigureStates | Opcode::ConfigureWeights | Opcode::Debug => {
                format!("{} @0x{:06X}", self.opcode.mnemonic(), ops.address)
            }
            Opcode::LoadFeatures | Opcode::StoreFeatures => format!(
                "{} port={} lines={} @0x{:06X}",
                self.opcode.mnemonic(),
                ops.port_buffer,
                ops.num_lines,
                ops.address
            ),
            Opcode::Run => format!("run len={}", ops.address),
        }
    }
}

/// How a parsed instruction stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// An explicit `Reset` opcode.
    Reset {
        /// Its byte address.
        pc: u32,
    },
    /// A byte outside the opcode set (the zero padding included).
    Unknown {
        /// The byte.
        opcode: u8,
        /// Its byte address.
        pc: u32,
    },
    /// Ran off the end of the region.
    EndOfRegion,
}

/// Instructions decoded from an instruction region.
#[derive(Debug, Clone)]
pub struct InstructionStream {
    instructions: Vec<(u32, Instruction)>,
    terminator: Terminator,
}

impl InstructionStream {
    /// Walk `region` from PC 0 the way the controller does, stopping at the
    /// first `Reset` or unrecognized byte.
    pub fn parse(region: &[u8], isa: &IsaConfig) -> Result<Self, DecodeError> {
        let mut instructions = Vec::new();
        let mut pc = 0usize;

        let terminator = loop {
            if pc >= region.len() {
                break Terminator::EndOfRegion;
            }
            match Instruction::decode(&region[pc..], pc as u32, isa) {
                Ok(inst) if inst.opcode == Opcode::Reset => {
                    instructions.push((pc as u32, inst));
                    break Terminator::Reset { pc: pc as u32 };
                }
                Ok(inst) => {
                    log::debug!("PC 0x{:06X}: {}", pc, inst.disassemble());
                    instructions.push((pc as u32, inst));
                    pc += inst.size(isa);
                }
                Err(DecodeError::UnknownOpcode { opcode, pc }) => {
                    break Terminator::Unknown { opcode, pc };
                }
                Err(e) => return Err(e),
            }
        };

        Ok(Self { instructions, terminator })
    }

    /// Decoded instructions with their byte addresses.
    pub fn instructions(&self) -> &[(u32, Instruction)] {
        &self.instructions
    }

    /// How the stream ended.
    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    /// Number of instructions (the terminating `Reset` included).
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_address_little_endian() {
        let isa = IsaConfig::reference();
        let bytes = Instruction::with_address(Opcode::ConfigureStates, 128).encode(&isa);
        assert_eq!(bytes, vec![0x02, 0x80, 0x00, 0x00]);

        let bytes = Instruction::with_address(Opcode::Debug, 0x12_3456).encode(&isa);
        assert_eq!(bytes, vec![0x07, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_encode_port_operands() {
        let isa = IsaConfig::reference();
        let inst = Instruction {
            opcode: Opcode::LoadFeatures,
            operands: Operands { address: 0x0102, port_buffer: 9, num_lines: 4 },
        };
        assert_eq!(inst.encode(&isa), vec![0x04, 0x02, 0x01, 0x00, 9, 4]);
        assert_eq!(Instruction::decode(&inst.encode(&isa), 0, &isa), Ok(inst));
    }

    #[test]
    fn test_decode_unknown() {
        let isa = IsaConfig::reference();
        assert_eq!(
            Instruction::decode(&[0x00, 1, 2, 3], 12, &isa),
            Err(DecodeError::UnknownOpcode { opcode: 0, pc: 12 })
        );
    }

    #[test]
    fn test_decode_incomplete() {
        let isa = IsaConfig::reference();
        assert_eq!(
            Instruction::decode(&[0x03, 0x80], 0, &isa),
            Err(DecodeError::Incomplete { pc: 0, needed: 4, have: 2 })
        );
        assert!(matches!(
            Instruction::decode(&[], 0, &isa),
            Err(DecodeError::Incomplete { .. })
        ));
    }

    #[test]
    fn test_parse_stream() {
        let isa = IsaConfig::reference();
        let region = [
            0x02, 0x80, 0x00, 0x00, // cfg.states @128
            0x06, 0x10, 0x00, 0x00, // run len=16
            0x01, // reset
            0x00, 0x00, 0x00,
        ];
        let stream = InstructionStream::parse(&region, &isa).unwrap();
        assert_eq!(stream.len(), 3);
        assert_eq!(stream.instructions()[1].0, 4);
        assert_eq!(stream.instructions()[1].1.disassemble(), "run len=16");
        assert_eq!(stream.terminator(), Terminator::Reset { pc: 8 });
    }

    #[test]
    fn test_parse_stops_at_padding() {
        let isa = IsaConfig::reference();
        let region = [0x03, 0x90, 0x00, 0x00, 0x00, 0x00];
        let stream = InstructionStream::parse(&region, &isa).unwrap();
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.terminator(), Terminator::Unknown { opcode: 0, pc: 4 });
    }
}
