//! Configuration fan-out ports and the node register file behind them.
//!
//! One port per byte lane. In a configuration cycle the controller drives
//! lane `i` with node `node_base + i` and byte `i` of the current line:
//!
//! ```text
//!   line  [ b0 | b1 | b2 | b3 ]
//!           │    │    │    │
//!   port    0    1    2    3     enable, node, data, weight_select
//!           ▼    ▼    ▼    ▼
//!   node   n+0  n+1  n+2  n+3    (n = node_base)
//! ```
//!
//! The bus is combinational: it is cleared at the start of every cycle, so a
//! node register is written at most once per cycle.

use crate::isa::{byte_to_weight, weight_to_byte, IsaConfig};
use smallvec::SmallVec;
use thiserror::Error;

/// Bus consistency errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// An enabled port addresses a node outside the tree.
    #[error("port {lane} addresses node {node}, tree has {num_nodes} nodes")]
    NodeOutOfRange {
        /// Port lane.
        lane: usize,
        /// Node address driven.
        node: u8,
        /// Nodes in the tree.
        num_nodes: usize,
    },

    /// Enabled ports do not cover consecutive node addresses.
    #[error("port {lane} addresses node {found}, expected {expected}")]
    NotContiguous {
        /// Port lane.
        lane: usize,
        /// Node address the previous port implies.
        expected: usize,
        /// Node address driven.
        found: u8,
    },

    /// Enabled ports mix state and weight writes.
    #[error("port {lane} disagrees on weight select")]
    MixedSelect {
        /// Port lane.
        lane: usize,
    },
}

/// One configuration port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigPort {
    /// Write this cycle.
    pub enable: bool,
    /// Target node address.
    pub node: u8,
    /// State code or weight byte.
    pub data: u8,
    /// Set for weight writes, clear for state writes.
    pub weight_select: bool,
}

/// The `L` configuration ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBus {
    ports: SmallVec<[ConfigPort; 8]>,
}

impl ConfigBus {
    /// Bus with `lanes` idle ports.
    pub fn new(lanes: usize) -> Self {
        Self {
            ports: SmallVec::from_elem(ConfigPort::default(), lanes),
        }
    }

    /// Deassert every port.
    pub fn clear(&mut self) {
        self.ports.iter_mut().for_each(|p| *p = ConfigPort::default());
    }

    /// Drive one port for this cycle.
    pub fn drive(&mut self, lane: usize, node: u8, data: u8, weight_select: bool) {
        if let Some(port) = self.ports.get_mut(lane) {
            *port = ConfigPort { enable: true, node, data, weight_select };
        }
    }

    /// All ports, by lane.
    pub fn ports(&self) -> &[ConfigPort] {
        &self.ports
    }

    /// Enabled ports with their lanes.
    pub fn enabled(&self) -> impl Iterator<Item = (usize, &ConfigPort)> {
        self.ports.iter().enumerate().filter(|(_, p)| p.enable)
    }

    /// Number of enabled ports.
    pub fn active_count(&self) -> usize {
        self.enabled().count()
    }

    /// No port enabled.
    pub fn is_idle(&self) -> bool {
        self.active_count() == 0
    }

    /// Check the bus for one cycle: nodes in range, enabled lanes adjacent
    /// with consecutive node addresses, one kind of write.
    pub fn check(&self, num_nodes: usize) -> Result<(), BusError> {
        let mut prev: Option<(usize, &ConfigPort)> = None;
        for (lane, port) in self.enabled() {
            if usize::from(port.node) >= num_nodes {
                return Err(BusError::NodeOutOfRange { lane, node: port.node, num_nodes });
            }
            if let Some((prev_lane, prev_port)) = prev {
                let expected = usize::from(prev_port.node) + (lane - prev_lane);
                if lane != prev_lane + 1 || usize::from(port.node) != expected {
                    return Err(BusError::NotContiguous { lane, expected, found: port.node });
                }
                if port.weight_select != prev_port.weight_select {
                    return Err(BusError::MixedSelect { lane });
                }
            }
            prev = Some((lane, port));
        }
        Ok(())
    }
}

/// Receiver of configuration writes: the reduction tree's node registers.
pub trait ConfigSink {
    /// Latch every enabled port of `bus`.
    fn apply(&mut self, bus: &ConfigBus);

    /// Current state code of every node, in node order.
    fn states(&self) -> &[u8];

    /// Current weight of every multiplier, in node order.
    fn weights(&self) -> &[i8];
}

/// Node registers as flat arrays indexed by node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegisterFile {
    num_adders: usize,
    states: Vec<u8>,
    weights: Vec<i8>,
    writes: u64,
}

impl NodeRegisterFile {
    /// Zeroed registers for the tree described by `isa`.
    pub fn new(isa: &IsaConfig) -> Self {
        Self {
            num_adders: isa.num_adders(),
            states: vec![0; isa.num_nodes()],
            weights: vec![0; isa.num_mults()],
            writes: 0,
        }
    }

    /// State code of `node`.
    pub fn state(&self, node: usize) -> Option<u8> {
        self.states.get(node).copied()
    }

    /// Weight of multiplier `node` (a node id, not a multiplier index).
    pub fn weight(&self, node: usize) -> Option<i8> {
        node.checked_sub(self.num_adders)
            .and_then(|m| self.weights.get(m).copied())
    }

    /// Register writes latched so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }
}

impl ConfigSink for NodeRegisterFile {
    fn apply(&mut self, bus: &ConfigBus) {
        for (lane, port) in bus.enabled() {
            let node = usize::from(port.node);
            if port.weight_select {
                match node.checked_sub(self.num_adders).and_then(|m| self.weights.get_mut(m)) {
                    Some(slot) => *slot = byte_to_weight(port.data),
                    None => {
                        log::warn!("port {}: weight write to non-multiplier node {} ignored", lane, node);
                        continue;
                    }
                }
            } else {
                match self.states.get_mut(node) {
                    Some(slot) => *slot = port.data,
                    None => {
                        log::warn!("port {}: state write to node {} ignored", lane, node);
                        continue;
                    }
                }
            }
            self.writes += 1;
        }
    }

    fn states(&self) -> &[u8] {
        &self.states
    }

    fn weights(&self) -> &[i8] {
        &self.weights
    }
}

/// Node registers laid out as configuration payloads: the state payload
/// followed by the weight payload, each padded to whole lines.
///
/// This is what a `Debug` snapshot writes to memory, so a snapshot taken
/// after configuring from an image matches that image's payload bytes.
pub fn snapshot_payload<S: ConfigSink + ?Sized>(isa: &IsaConfig, sink: &S) -> Vec<u8> {
    let line = isa.bytes_in_line;
    let mut out = Vec::with_capacity(isa.debug_lines() * line);

    out.extend_from_slice(sink.states());
    out.resize(isa.state_line_reads() * line, 0);

    let weights_at = out.len();
    out.resize(weights_at + isa.weight_pad(), 0);
    out.extend(sink.weights().iter().map(|&w| weight_to_byte(w)));
    out.resize(weights_at + isa.weight_line_reads() * line, 0);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_clear() {
        let mut bus = ConfigBus::new(4);
        bus.drive(0, 5, 1, false);
        bus.drive(1, 6, 2, false);
        assert_eq!(bus.active_count(), 2);
        bus.clear();
        assert!(bus.is_idle());
        assert_eq!(bus.ports().len(), 4);
    }

    #[test]
    fn test_check_accepts_partial_lines() {
        let mut bus = ConfigBus::new(4);
        // Last state line: three nodes left
        bus.drive(0, 60, 1, false);
        bus.drive(1, 61, 1, false);
        bus.drive(2, 62, 1, false);
        assert_eq!(bus.check(63), Ok(()));

        // First weight line: only the last lane hits a multiplier
        bus.clear();
        bus.drive(3, 31, 0xFF, true);
        assert_eq!(bus.check(63), Ok(()));
    }

    #[test]
    fn test_check_rejects_bad_bus() {
        let mut bus = ConfigBus::new(4);
        bus.drive(0, 63, 0, false);
        assert!(matches!(bus.check(63), Err(BusError::NodeOutOfRange { lane: 0, .. })));

        bus.clear();
        bus.drive(0, 4, 0, false);
        bus.drive(1, 4, 0, false);
        assert_eq!(
            bus.check(63),
            Err(BusError::NotContiguous { lane: 1, expected: 5, found: 4 })
        );

        bus.clear();
        bus.drive(0, 4, 0, false);
        bus.drive(2, 6, 0, false);
        assert!(matches!(bus.check(63), Err(BusError::NotContiguous { lane: 2, .. })));

        bus.clear();
        bus.drive(0, 40, 0, false);
        bus.drive(1, 41, 0, true);
        assert_eq!(bus.check(63), Err(BusError::MixedSelect { lane: 1 }));
    }

    #[test]
    fn test_register_file_apply() {
        let isa = IsaConfig::reference();
        let mut regs = NodeRegisterFile::new(&isa);

        let mut bus = ConfigBus::new(4);
        bus.drive(0, 0, 2, false);
        bus.drive(1, 1, 3, false);
        regs.apply(&bus);

        bus.clear();
        bus.drive(2, 32, 0xFB, true);
        bus.drive(3, 33, 12, true);
        regs.apply(&bus);

        assert_eq!(regs.state(0), Some(2));
        assert_eq!(regs.state(1), Some(3));
        assert_eq!(regs.weight(32), Some(-5));
        assert_eq!(regs.weight(33), Some(12));
        assert_eq!(regs.weights()[1], -5);
        assert_eq!(regs.writes(), 4);
    }

    #[test]
    fn test_weight_to_adder_ignored() {
        let isa = IsaConfig::reference();
        let mut regs = NodeRegisterFile::new(&isa);
        let mut bus = ConfigBus::new(4);
        bus.drive(0, 30, 9, true);
        regs.apply(&bus);
        assert_eq!(regs.writes(), 0);
        assert_eq!(regs.weight(30), None);
        assert!(regs.weights().iter().all(|&w| w == 0));
    }

    #[test]
    fn test_snapshot_payload_layout() {
        let isa = IsaConfig::reference();
        let mut regs = NodeRegisterFile::new(&isa);
        let mut bus = ConfigBus::new(4);
        bus.drive(0, 62, 7, false);
        regs.apply(&bus);
        bus.clear();
        bus.drive(3, 31, 0x80, true);
        regs.apply(&bus);

        let payload = snapshot_payload(&isa, &regs);
        assert_eq!(payload.len(), 25 * 4);
        assert_eq!(payload[62], 7);
        assert_eq!(payload[63], 0);
        // Weight part starts at byte 64 with three pad bytes
        assert_eq!(&payload[64..67], &[0, 0, 0]);
        assert_eq!(payload[67], 0x80);
    }
}
