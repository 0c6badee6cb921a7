//! Instruction set and build-time shape of the control core.
//!
//! The ISA is a small closed set of opcodes, each with a fixed operand
//! arity that depends only on the opcode and the configured address width.
//! The assembler and the device-side controller both derive every length
//! and iteration count from [`IsaConfig`], so they agree bit-for-bit.
//!
//! # Encoding
//!
//! ```text
//! Reset                      [01]
//! ConfigureStates   addr     [02][a0 a1 a2]
//! ConfigureWeights  addr     [03][a0 a1 a2]
//! LoadFeatures      addr,p,n [04][a0 a1 a2][p][n]
//! StoreFeatures     addr,p,n [05][a0 a1 a2][p][n]
//! Run               length   [06][l0 l1 l2]
//! Debug             addr     [07][a0 a1 a2]
//! ```
//!
//! Addresses are line addresses, little-endian. Any other opcode byte
//! (including the zero padding after the program) is unrecognized.
//!
//! # Node Index Space
//!
//! ```text
//!  0 ............ num_adders-1 | num_adders ........ num_nodes-1
//!  adders (internal tree nodes) | multipliers (leaves)
//! ```
//!
//! # Example
//!
//! ```
//! use maeri_emu::isa::{IsaConfig, Opcode};
//!
//! let isa = IsaConfig::default();
//! assert_eq!(isa.num_nodes(), 63);
//! assert_eq!(isa.operand_len(Opcode::ConfigureStates), 3);
//! assert_eq!(isa.state_line_reads(), 16);
//! ```

pub mod operation;
pub mod encoding;
pub mod casts;

pub use operation::Operation;
pub use encoding::{DecodeError, Instruction, InstructionStream, Operands};
pub use casts::{fixed_to_float, float_to_fixed, quantize_weights};

use thiserror::Error;

/// Address operand width the encoding supports.
pub const SUPPORTED_ADDRESS_BYTES: usize = 3;

/// Node count of the single supported tree shape.
pub const SUPPORTED_NUM_NODES: usize = 63;

/// Operation tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Terminate the program and return to idle.
    Reset = 1,
    /// Stream one state code to every node.
    ConfigureStates = 2,
    /// Stream one weight to every multiplier node.
    ConfigureWeights = 3,
    /// Load feature lines into a port buffer.
    LoadFeatures = 4,
    /// Store feature lines from a port buffer.
    StoreFeatures = 5,
    /// Run the dataflow core.
    Run = 6,
    /// Write the node registers back to memory.
    Debug = 7,
}

impl Opcode {
    /// All opcodes, in numeric order.
    pub const ALL: [Opcode; 7] = [
        Opcode::Reset,
        Opcode::ConfigureStates,
        Opcode::ConfigureWeights,
        Opcode::LoadFeatures,
        Opcode::StoreFeatures,
        Opcode::Run,
        Opcode::Debug,
    ];

    /// Decode an opcode byte. Returns `None` for unrecognized values.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Opcode::Reset),
            2 => Some(Opcode::ConfigureStates),
            3 => Some(Opcode::ConfigureWeights),
            4 => Some(Opcode::LoadFeatures),
            5 => Some(Opcode::StoreFeatures),
            6 => Some(Opcode::Run),
            7 => Some(Opcode::Debug),
            _ => None,
        }
    }

    /// The encoded byte.
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Assembly mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Reset => "reset",
            Opcode::ConfigureStates => "cfg.states",
            Opcode::ConfigureWeights => "cfg.weights",
            Opcode::LoadFeatures => "ld.features",
            Opcode::StoreFeatures => "st.features",
            Opcode::Run => "run",
            Opcode::Debug => "debug",
        }
    }

    /// Whether the operand block carries port-buffer id and line count.
    pub fn has_port_operands(self) -> bool {
        matches!(self, Opcode::LoadFeatures | Opcode::StoreFeatures)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Build-time configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IsaError {
    /// Address operand width differs from the supported encoding.
    #[error("unsupported address width: {found} bytes (only {expected}-byte addresses are supported)")]
    UnsupportedAddressWidth {
        /// Configured width.
        found: usize,
        /// Supported width.
        expected: usize,
    },

    /// Tree does not have the supported node count.
    #[error("unsupported tree: {found} nodes (only trees of {expected} nodes are supported)")]
    UnsupportedTreeSize {
        /// Configured node count.
        found: usize,
        /// Supported node count.
        expected: usize,
    },

    /// Byte-select arithmetic needs a power-of-two line width.
    #[error("bytes per line must be a non-zero power of two, got {0}")]
    LineWidthNotPowerOfTwo(usize),

    /// A region has no lines.
    #[error("{region} region must have at least one line")]
    EmptyRegion {
        /// Region name.
        region: &'static str,
    },
}

/// Build-time shape shared by assembler and controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsaConfig {
    /// Width of the address operand in bytes.
    pub address_bytes: usize,
    /// Depth of the binary reduction tree (root at depth 0).
    pub depth: u32,
    /// Bytes per memory line (also the number of configuration ports).
    pub bytes_in_line: usize,
    /// Lines in the instruction region.
    pub instruction_lines: usize,
    /// Lines in the configuration region.
    pub config_lines: usize,
}

impl Default for IsaConfig {
    fn default() -> Self {
        Self::reference()
    }
}

impl IsaConfig {
    /// Reference configuration: 3-byte addresses, depth-5 tree (63 nodes),
    /// 4-byte lines, two 128-line regions.
    pub const fn reference() -> Self {
        Self {
            address_bytes: 3,
            depth: 5,
            bytes_in_line: 4,
            instruction_lines: 128,
            config_lines: 128,
        }
    }

    /// Check the configuration once, before any image is built or any
    /// device is constructed.
    pub fn validate(&self) -> Result<(), IsaError> {
        if self.address_bytes != SUPPORTED_ADDRESS_BYTES {
            return Err(IsaError::UnsupportedAddressWidth {
                found: self.address_bytes,
                expected: SUPPORTED_ADDRESS_BYTES,
            });
        }
        if self.depth > 16 || self.num_nodes() != SUPPORTED_NUM_NODES {
            return Err(IsaError::UnsupportedTreeSize {
                found: if self.depth > 16 { usize::MAX } else { self.num_nodes() },
                expected: SUPPORTED_NUM_NODES,
            });
        }
        if self.bytes_in_line == 0 || !self.bytes_in_line.is_power_of_two() {
            return Err(IsaError::LineWidthNotPowerOfTwo(self.bytes_in_line));
        }
        if self.instruction_lines == 0 {
            return Err(IsaError::EmptyRegion { region: "instruction" });
        }
        if self.config_lines == 0 {
            return Err(IsaError::EmptyRegion { region: "configuration" });
        }
        Ok(())
    }

    /// Total nodes: `2^(depth+1) - 1`.
    pub fn num_nodes(&self) -> usize {
        (1usize << (self.depth + 1)) - 1
    }

    /// Adder (internal) nodes: `2^depth - 1`.
    pub fn num_adders(&self) -> usize {
        (1usize << self.depth) - 1
    }

    /// Multiplier (leaf) nodes: `2^depth`.
    pub fn num_mults(&self) -> usize {
        1usize << self.depth
    }

    /// Width of the byte-select field of a byte address.
    pub fn byte_select_bits(&self) -> u32 {
        self.bytes_in_line.trailing_zeros()
    }

    /// Largest value the address operand can carry.
    pub fn max_operand_value(&self) -> u32 {
        ((1u64 << (8 * self.address_bytes as u64)) - 1) as u32
    }

    /// Operand bytes following `opcode`.
    pub fn operand_len(&self, opcode: Opcode) -> usize {
        match opcode {
            Opcode::Reset => 0,
            Opcode::ConfigureStates | Opcode::ConfigureWeights | Opcode::Run | Opcode::Debug => {
                self.address_bytes
            }
            Opcode::LoadFeatures | Opcode::StoreFeatures => self.address_bytes + 2,
        }
    }

    /// Encoded length of an instruction including its opcode byte.
    pub fn instruction_len(&self, opcode: Opcode) -> usize {
        1 + self.operand_len(opcode)
    }

    /// Line reads needed to stream a state code to every node.
    pub fn state_line_reads(&self) -> usize {
        self.num_nodes().div_ceil(self.bytes_in_line)
    }

    /// Leading zero bytes of a weight payload. They align the payload so
    /// that line `k` lane `i` always addresses node `weight_node_base + k*L + i`.
    pub fn weight_pad(&self) -> usize {
        self.num_adders() % self.bytes_in_line
    }

    /// Node address of lane 0 on the first line of a weight transfer.
    pub fn weight_node_base(&self) -> usize {
        self.num_adders() - self.weight_pad()
    }

    /// Line reads needed to stream a weight to every multiplier.
    pub fn weight_line_reads(&self) -> usize {
        (self.weight_pad() + self.num_mults()).div_ceil(self.bytes_in_line)
    }

    /// Bytes of a state payload: one code per node plus a trailing zero.
    pub fn state_payload_len(&self) -> usize {
        self.num_nodes() + 1
    }

    /// Bytes of a weight payload: pad, one byte per multiplier, trailing zero.
    pub fn weight_payload_len(&self) -> usize {
        self.weight_pad() + self.num_mults() + 1
    }

    /// Lines occupied by `bytes` bytes.
    pub fn lines_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.bytes_in_line)
    }

    /// Lines written by one `Debug` snapshot.
    pub fn debug_lines(&self) -> usize {
        self.state_line_reads() + self.weight_line_reads()
    }

    /// First line of the configuration region.
    pub fn config_base_line(&self) -> usize {
        self.instruction_lines
    }

    /// Total image size in bytes.
    pub fn image_len(&self) -> usize {
        (self.instruction_lines + self.config_lines) * self.bytes_in_line
    }

    /// Whether `node` is a multiplier.
    pub fn is_mult(&self, node: usize) -> bool {
        node >= self.num_adders() && node < self.num_nodes()
    }
}

/// Encode a signed weight as its two's-complement byte.
#[inline]
pub fn weight_to_byte(weight: i8) -> u8 {
    weight as u8
}

/// Decode a stored weight byte back to its signed value.
#[inline]
pub fn byte_to_weight(byte: u8) -> i8 {
    byte as i8
}

/// Heap-order index arithmetic over the flat node table.
///
/// Node 0 is the root adder; node `i` has children `2i+1` and `2i+2`.
/// The last `num_mults` ids are the multiplier leaves, matching the
/// adder/multiplier partition of the node index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeIndex {
    num_nodes: usize,
}

impl TreeIndex {
    /// Index helper for the tree described by `isa`.
    pub fn new(isa: &IsaConfig) -> Self {
        Self { num_nodes: isa.num_nodes() }
    }

    /// Parent id, `None` for the root.
    pub fn parent(&self, node: usize) -> Option<usize> {
        if node == 0 || node >= self.num_nodes {
            None
        } else {
            Some((node - 1) / 2)
        }
    }

    /// Left child id, `None` for leaves.
    pub fn left(&self, node: usize) -> Option<usize> {
        let child = 2 * node + 1;
        (child < self.num_nodes).then_some(child)
    }

    /// Right child id, `None` for leaves.
    pub fn right(&self, node: usize) -> Option<usize> {
        let child = 2 * node + 2;
        (child < self.num_nodes).then_some(child)
    }

    /// Depth of `node` (root is 0).
    pub fn level(&self, node: usize) -> u32 {
        usize::BITS - 1 - (node + 1).leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_byte() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_byte(op.byte()), Some(op));
        }
        assert_eq!(Opcode::from_byte(0), None);
        assert_eq!(Opcode::from_byte(8), None);
        assert_eq!(Opcode::from_byte(0xFF), None);
    }

    #[test]
    fn test_opcode_values() {
        assert_eq!(Opcode::Reset.byte(), 1);
        assert_eq!(Opcode::ConfigureStates.byte(), 2);
        assert_eq!(Opcode::ConfigureWeights.byte(), 3);
        assert_eq!(Opcode::LoadFeatures.byte(), 4);
        assert_eq!(Opcode::StoreFeatures.byte(), 5);
        assert_eq!(Opcode::Run.byte(), 6);
        assert_eq!(Opcode::Debug.byte(), 7);
    }

    #[test]
    fn test_reference_shape() {
        let isa = IsaConfig::reference();
        assert!(isa.validate().is_ok());
        assert_eq!(isa.num_nodes(), 63);
        assert_eq!(isa.num_adders(), 31);
        assert_eq!(isa.num_mults(), 32);
        assert_eq!(isa.byte_select_bits(), 2);
        assert_eq!(isa.image_len(), 1024);
        assert_eq!(isa.max_operand_value(), 0xFF_FFFF);
    }

    #[test]
    fn test_operand_len_is_total() {
        let isa = IsaConfig::reference();
        assert_eq!(isa.operand_len(Opcode::Reset), 0);
        assert_eq!(isa.operand_len(Opcode::ConfigureStates), 3);
        assert_eq!(isa.operand_len(Opcode::ConfigureWeights), 3);
        assert_eq!(isa.operand_len(Opcode::LoadFeatures), 5);
        assert_eq!(isa.operand_len(Opcode::StoreFeatures), 5);
        assert_eq!(isa.operand_len(Opcode::Run), 3);
        assert_eq!(isa.operand_len(Opcode::Debug), 3);
        assert_eq!(isa.instruction_len(Opcode::ConfigureStates), 4);
    }

    #[test]
    fn test_iteration_counts() {
        let isa = IsaConfig::reference();
        // ceil(63 / 4)
        assert_eq!(isa.state_line_reads(), 16);
        // 31 % 4 = 3 pad bytes; ceil((3 + 32) / 4)
        assert_eq!(isa.weight_pad(), 3);
        assert_eq!(isa.weight_node_base(), 28);
        assert_eq!(isa.weight_line_reads(), 9);
        assert_eq!(isa.state_payload_len(), 64);
        assert_eq!(isa.weight_payload_len(), 36);
        assert_eq!(isa.debug_lines(), 25);
    }

    #[test]
    fn test_validate_rejects_address_width() {
        let isa = IsaConfig { address_bytes: 2, ..IsaConfig::reference() };
        assert_eq!(
            isa.validate(),
            Err(IsaError::UnsupportedAddressWidth { found: 2, expected: 3 })
        );
    }

    #[test]
    fn test_validate_rejects_tree_size() {
        let isa = IsaConfig { depth: 4, ..IsaConfig::reference() };
        assert_eq!(
            isa.validate(),
            Err(IsaError::UnsupportedTreeSize { found: 31, expected: 63 })
        );
    }

    #[test]
    fn test_validate_rejects_line_width() {
        let isa = IsaConfig { bytes_in_line: 3, ..IsaConfig::reference() };
        assert_eq!(isa.validate(), Err(IsaError::LineWidthNotPowerOfTwo(3)));
    }

    #[test]
    fn test_weight_conversion_full_range() {
        assert_eq!(weight_to_byte(-1), 255);
        assert_eq!(byte_to_weight(255), -1);
        assert_eq!(weight_to_byte(-128), 128);
        assert_eq!(weight_to_byte(127), 127);
        for w in i8::MIN..=i8::MAX {
            assert_eq!(byte_to_weight(weight_to_byte(w)), w);
        }
    }

    #[test]
    fn test_tree_index() {
        let isa = IsaConfig::reference();
        let tree = TreeIndex::new(&isa);
        assert_eq!(tree.parent(0), None);
        assert_eq!(tree.parent(1), Some(0));
        assert_eq!(tree.parent(2), Some(0));
        assert_eq!(tree.left(0), Some(1));
        assert_eq!(tree.right(30), Some(62));
        // First multiplier is a leaf
        assert_eq!(tree.left(31), None);
        assert_eq!(tree.level(0), 0);
        assert_eq!(tree.level(31), 5);
        assert_eq!(tree.level(62), 5);
        assert!(isa.is_mult(31));
        assert!(!isa.is_mult(30));
        assert!(!isa.is_mult(63));
    }
}
