//! TOML program files.
//!
//! A program file lists operations in order, one `[[ops]]` table each:
//!
//! ```toml
//! [[ops]]
//! op = "configure_states"
//! states = [2, 0, 1]      # one code per node
//!
//! [[ops]]
//! op = "configure_weights"
//! weights = [-5, 12]      # one per multiplier, each in [-128, 127]
//!
//! [[ops]]
//! op = "configure_weights_fixed"
//! values = [0.5, -0.25]   # reals in [-1, 1], quantized to 8 bits
//!
//! [[ops]]
//! op = "load_features"
//! port_buffer = 0
//! num_lines = 4
//! address = 384
//!
//! [[ops]]
//! op = "run"
//! length = 16
//!
//! [[ops]]
//! op = "debug"
//! address = 400
//! ```

use super::AssembleError;
use crate::isa::{quantize_weights, Operation};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One `[[ops]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpEntry {
    /// Explicit reset.
    Reset,
    /// State codes, one per node.
    ConfigureStates {
        /// Codes in node order.
        states: Vec<u8>,
    },
    /// Integer weights, range-checked.
    ConfigureWeights {
        /// Weights in multiplier order.
        weights: Vec<i32>,
    },
    /// Real weights, quantized to signed 8-bit fixed point.
    ConfigureWeightsFixed {
        /// Values in multiplier order.
        values: Vec<f64>,
    },
    /// Load features into a port buffer.
    LoadFeatures {
        /// Port buffer id.
        port_buffer: u8,
        /// Line count.
        num_lines: u8,
        /// Line address.
        address: u32,
    },
    /// Store features from a port buffer.
    StoreFeatures {
        /// Port buffer id.
        port_buffer: u8,
        /// Line count.
        num_lines: u8,
        /// Line address.
        address: u32,
    },
    /// Run the dataflow core.
    Run {
        /// Execution length.
        length: u32,
    },
    /// Snapshot node registers.
    Debug {
        /// Line address.
        address: u32,
    },
}

impl OpEntry {
    /// Convert to an assembler operation.
    pub fn to_operation(&self) -> Result<Operation, AssembleError> {
        Ok(match self {
            OpEntry::Reset => Operation::Reset,
            OpEntry::ConfigureStates { states } => Operation::ConfigureStates(states.clone()),
            OpEntry::ConfigureWeights { weights } => Operation::configure_weights_checked(weights)?,
            OpEntry::ConfigureWeightsFixed { values } => {
                Operation::ConfigureWeights(quantize_weights(values))
            }
            OpEntry::LoadFeatures { port_buffer, num_lines, address } => Operation::LoadFeatures {
                port_buffer: *port_buffer,
                num_lines: *num_lines,
                address: *address,
            },
            OpEntry::StoreFeatures { port_buffer, num_lines, address } => Operation::StoreFeatures {
                port_buffer: *port_buffer,
                num_lines: *num_lines,
                address: *address,
            },
            OpEntry::Run { length } => Operation::Run { length: *length },
            OpEntry::Debug { address } => Operation::Debug { address: *address },
        })
    }
}

/// A parsed program file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramFile {
    /// Operations in program order.
    pub ops: Vec<OpEntry>,
}

impl ProgramFile {
    /// Parse a program from TOML text.
    pub fn parse(text: &str) -> Result<Self, AssembleError> {
        toml::from_str(text).map_err(|e| AssembleError::Program(e.to_string()))
    }

    /// Read and parse a program file.
    pub fn load(path: &Path) -> Result<Self, AssembleError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AssembleError::Program(format!("{}: {}", path.display(), e)))?;
        let program = Self::parse(&text)?;
        log::info!("Loaded {} operations from {}", program.ops.len(), path.display());
        Ok(program)
    }

    /// Convert every entry to an operation.
    pub fn operations(&self) -> Result<Vec<Operation>, AssembleError> {
        self.ops.iter().map(OpEntry::to_operation).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program() {
        let text = r#"
[[ops]]
op = "configure_states"
states = [2, 0, 1]

[[ops]]
op = "configure_weights"
weights = [-5, 12]

[[ops]]
op = "store_features"
port_buffer = 1
num_lines = 2
address = 300

[[ops]]
op = "run"
length = 9

[[ops]]
op = "reset"
"#;
        let program = ProgramFile::parse(text).unwrap();
        let ops = program.operations().unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::ConfigureStates(vec![2, 0, 1]),
                Operation::ConfigureWeights(vec![-5, 12]),
                Operation::StoreFeatures { port_buffer: 1, num_lines: 2, address: 300 },
                Operation::Run { length: 9 },
                Operation::Reset,
            ]
        );
    }

    #[test]
    fn test_fixed_weights_are_quantized() {
        let text = r#"
[[ops]]
op = "configure_weights_fixed"
values = [0.5, -1.0, 1.0]
"#;
        let ops = ProgramFile::parse(text).unwrap().operations().unwrap();
        assert_eq!(ops, vec![Operation::ConfigureWeights(vec![64, -128, 127])]);
    }

    #[test]
    fn test_out_of_range_weight_rejected() {
        let text = r#"
[[ops]]
op = "configure_weights"
weights = [1, 200]
"#;
        let err = ProgramFile::parse(text).unwrap().operations().unwrap_err();
        assert!(matches!(err, AssembleError::WeightOutOfRange { index: 1, value: 200 }));
    }

    #[test]
    fn test_unknown_op_rejected() {
        let text = r#"
[[ops]]
op = "halt"
"#;
        assert!(matches!(ProgramFile::parse(text), Err(AssembleError::Program(_))));
    }
}
