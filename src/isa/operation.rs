//! Host-side operation values fed to the assembler.

use super::{IsaConfig, Opcode};
use crate::assembler::AssembleError;

/// One operation of a compiled program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Stop execution and return to idle.
    Reset,
    /// One state code per node, in node order.
    ConfigureStates(Vec<u8>),
    /// One weight per multiplier node, in node order.
    ConfigureWeights(Vec<i8>),
    /// Load feature lines from memory into an injection port buffer.
    LoadFeatures {
        /// Port buffer id.
        port_buffer: u8,
        /// Number of lines to move.
        num_lines: u8,
        /// Source line address.
        address: u32,
    },
    /// Store feature lines from a collection port buffer to memory.
    StoreFeatures {
        /// Port buffer id.
        port_buffer: u8,
        /// Number of lines to move.
        num_lines: u8,
        /// Destination line address.
        address: u32,
    },
    /// Run the dataflow core for `length` cycles.
    Run {
        /// Execution length.
        length: u32,
    },
    /// Snapshot node registers to memory starting at `address`.
    Debug {
        /// Destination line address.
        address: u32,
    },
}

impl Operation {
    /// Build a weight configuration from wide integers, rejecting any value
    /// outside the signed 8-bit range.
    pub fn configure_weights_checked(weights: &[i32]) -> Result<Self, AssembleError> {
        let mut out = Vec::with_capacity(weights.len());
        for (index, &value) in weights.iter().enumerate() {
            let w = i8::try_from(value)
                .map_err(|_| AssembleError::WeightOutOfRange { index, value })?;
            out.push(w);
        }
        Ok(Operation::ConfigureWeights(out))
    }

    /// Opcode this operation assembles to.
    pub fn opcode(&self) -> Opcode {
        match self {
            Operation::Reset => Opcode::Reset,
            Operation::ConfigureStates(_) => Opcode::ConfigureStates,
            Operation::ConfigureWeights(_) => Opcode::ConfigureWeights,
            Operation::LoadFeatures { .. } => Opcode::LoadFeatures,
            Operation::StoreFeatures { .. } => Opcode::StoreFeatures,
            Operation::Run { .. } => Opcode::Run,
            Operation::Debug { .. } => Opcode::Debug,
        }
    }

    /// Bytes this operation occupies in the instruction region.
    pub fn instruction_len(&self, isa: &IsaConfig) -> usize {
        isa.instruction_len(self.opcode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_weights_accept_full_range() {
        let op = Operation::configure_weights_checked(&[-128, -1, 0, 127]).unwrap();
        assert_eq!(op, Operation::ConfigureWeights(vec![-128, -1, 0, 127]));
    }

    #[test]
    fn test_checked_weights_reject_out_of_range() {
        let err = Operation::configure_weights_checked(&[0, 5, 128]).unwrap_err();
        assert!(matches!(
            err,
            AssembleError::WeightOutOfRange { index: 2, value: 128 }
        ));

        let err = Operation::configure_weights_checked(&[-129]).unwrap_err();
        assert!(matches!(
            err,
            AssembleError::WeightOutOfRange { index: 0, value: -129 }
        ));
    }

    #[test]
    fn test_opcode_mapping() {
        assert_eq!(Operation::Reset.opcode(), Opcode::Reset);
        assert_eq!(Operation::Run { length: 4 }.opcode(), Opcode::Run);
        assert_eq!(Operation::Debug { address: 0 }.opcode(), Opcode::Debug);
        let isa = IsaConfig::reference();
        let load = Operation::LoadFeatures { port_buffer: 1, num_lines: 2, address: 3 };
        assert_eq!(load.instruction_len(&isa), 6);
    }
}
