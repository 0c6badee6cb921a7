//! Host-side assembler: operation list to Program Image.
//!
//! The image is two fixed-size regions over line-addressed memory:
//!
//! ```text
//! line 0                       line 128                      line 256
//! ┌────────────────────────────┬─────────────────────────────┐
//! │ instruction region         │ configuration region        │
//! │ [op][addr LE]... [Reset] 0…│ states+0 | 000+weights+0 |0…│
//! └────────────────────────────┴─────────────────────────────┘
//! ```
//!
//! Configuration instructions point at their payload by line address. The
//! write offset starts at the first configuration line and advances by the
//! payload's line count, so every payload starts on a line boundary.
//!
//! # Example
//!
//! ```
//! use maeri_emu::assembler::assemble;
//! use maeri_emu::isa::{IsaConfig, Operation};
//!
//! let isa = IsaConfig::default();
//! let image = assemble(&[Operation::ConfigureStates(vec![1; 63])], &isa).unwrap();
//! assert_eq!(image.len(), 1024);
//! assert_eq!(&image.bytes()[0..4], &[2, 128, 0, 0]);
//! ```

pub mod image;
pub mod program;

pub use image::{ImageError, ProgramImage};
pub use program::{OpEntry, ProgramFile};

use crate::isa::{weight_to_byte, Instruction, IsaConfig, IsaError, Opcode, Operands, Operation};
use thiserror::Error;

/// Errors raised while building an image. All of them abort before any
/// device interaction.
#[derive(Debug, Error)]
pub enum AssembleError {
    /// The build-time shape is not supported.
    #[error("invalid ISA configuration: {0}")]
    Isa(#[from] IsaError),

    /// A state vector does not cover every node.
    #[error("operation {index}: expected {expected} state codes, got {found}")]
    StateCountMismatch {
        /// Operation index.
        index: usize,
        /// Node count.
        expected: usize,
        /// Codes supplied.
        found: usize,
    },

    /// A weight vector does not cover every multiplier.
    #[error("operation {index}: expected {expected} weights, got {found}")]
    WeightCountMismatch {
        /// Operation index.
        index: usize,
        /// Multiplier count.
        expected: usize,
        /// Weights supplied.
        found: usize,
    },

    /// A weight does not fit a signed byte.
    #[error("weight {index} = {value} is outside [-128, 127]")]
    WeightOutOfRange {
        /// Position in the weight vector.
        index: usize,
        /// Offending value.
        value: i32,
    },

    /// An operand does not fit the address field.
    #[error("operation {index}: operand {value:#X} does not fit in {bytes} bytes")]
    OperandOutOfRange {
        /// Operation index.
        index: usize,
        /// Offending value.
        value: u64,
        /// Field width in bytes.
        bytes: usize,
    },

    /// The instruction stream is longer than its region.
    #[error("instruction region overflow: {needed} bytes needed, {capacity} available")]
    InstructionRegionOverflow {
        /// Bytes needed.
        needed: usize,
        /// Region size in bytes.
        capacity: usize,
    },

    /// The payloads are longer than the configuration region.
    #[error("configuration region overflow: {needed} bytes needed, {capacity} available")]
    ConfigRegionOverflow {
        /// Bytes needed.
        needed: usize,
        /// Region size in bytes.
        capacity: usize,
    },

    /// A program file could not be read or parsed.
    #[error("program file: {0}")]
    Program(String),
}

/// Assemble `ops` into a Program Image.
///
/// This is the reference for what the controller must reproduce: it is
/// total and side-effect free for valid input.
pub fn assemble(ops: &[Operation], isa: &IsaConfig) -> Result<ProgramImage, AssembleError> {
    isa.validate()?;

    let line = isa.bytes_in_line;
    let instr_capacity = isa.instruction_lines * line;
    let config_capacity = isa.config_lines * line;

    let mut instr_mem: Vec<u8> = Vec::with_capacity(instr_capacity);
    let mut config_mem: Vec<u8> = Vec::with_capacity(config_capacity);
    let mut config_offset = isa.config_base_line() as u64;

    for (index, op) in ops.iter().enumerate() {
        let inst = match op {
            Operation::Reset => Instruction::new(Opcode::Reset),

            Operation::ConfigureStates(states) => {
                if states.len() != isa.num_nodes() {
                    return Err(AssembleError::StateCountMismatch {
                        index,
                        expected: isa.num_nodes(),
                        found: states.len(),
                    });
                }
                let mut payload = states.clone();
                payload.push(0);
                emit_payload(isa, index, &mut config_mem, &mut config_offset, payload)?
                    .into_instruction(Opcode::ConfigureStates)
            }

            Operation::ConfigureWeights(weights) => {
                if weights.len() != isa.num_mults() {
                    return Err(AssembleError::WeightCountMismatch {
                        index,
                        expected: isa.num_mults(),
                        found: weights.len(),
                    });
                }
                let mut payload = vec![0u8; isa.weight_pad()];
                payload.extend(weights.iter().map(|&w| weight_to_byte(w)));
                payload.push(0);
                emit_payload(isa, index, &mut config_mem, &mut config_offset, payload)?
                    .into_instruction(Opcode::ConfigureWeights)
            }

            Operation::LoadFeatures { port_buffer, num_lines, address }
            | Operation::StoreFeatures { port_buffer, num_lines, address } => {
                check_operand(isa, index, u64::from(*address))?;
                Instruction {
                    opcode: op.opcode(),
                    operands: Operands {
                        address: *address,
                        port_buffer: *port_buffer,
                        num_lines: *num_lines,
                    },
                }
            }

            Operation::Run { length } => {
                check_operand(isa, index, u64::from(*length))?;
                Instruction::with_address(Opcode::Run, *length)
            }

            Operation::Debug { address } => {
                check_operand(isa, index, u64::from(*address))?;
                Instruction::with_address(Opcode::Debug, *address)
            }
        };

        log::debug!("assemble [{}] 0x{:04X}: {}", index, instr_mem.len(), inst.disassemble());
        inst.encode_into(isa, &mut instr_mem);
    }

    instr_mem.push(Opcode::Reset.byte());

    if instr_mem.len() > instr_capacity {
        return Err(AssembleError::InstructionRegionOverflow {
            needed: instr_mem.len(),
            capacity: instr_capacity,
        });
    }
    if config_mem.len() > config_capacity {
        return Err(AssembleError::ConfigRegionOverflow {
            needed: config_mem.len(),
            capacity: config_capacity,
        });
    }

    log::info!(
        "assembled {} operations: {} instruction bytes, {} configuration bytes",
        ops.len(),
        instr_mem.len(),
        config_mem.len()
    );

    instr_mem.resize(instr_capacity, 0);
    config_mem.resize(config_capacity, 0);

    let mut combined = instr_mem;
    combined.extend_from_slice(&config_mem);
    Ok(ProgramImage::from_parts(*isa, combined))
}

/// Line address a payload was placed at.
struct PayloadSlot(u32);

impl PayloadSlot {
    fn into_instruction(self, opcode: Opcode) -> Instruction {
        Instruction::with_address(opcode, self.0)
    }
}

/// Append a payload to the configuration region, padded to whole lines,
/// and advance the write offset by its slot size. A slot is the payload's
/// own line count, so consecutive payloads pack with no gap.
fn emit_payload(
    isa: &IsaConfig,
    index: usize,
    config_mem: &mut Vec<u8>,
    config_offset: &mut u64,
    mut payload: Vec<u8>,
) -> Result<PayloadSlot, AssembleError> {
    check_operand(isa, index, *config_offset)?;
    let slot = PayloadSlot(*config_offset as u32);

    let lines = isa.lines_for(payload.len());
    payload.resize(lines * isa.bytes_in_line, 0);
    config_mem.extend_from_slice(&payload);
    *config_offset += lines as u64;

    Ok(slot)
}

fn check_operand(isa: &IsaConfig, index: usize, value: u64) -> Result<(), AssembleError> {
    if value > u64::from(isa.max_operand_value()) {
        return Err(AssembleError::OperandOutOfRange {
            index,
            value,
            bytes: isa.address_bytes,
        });
    }
    Ok(())
}
