//! Fetch-decode-execute automaton of the control core.
//!
//! One call to [`Controller::step`] is one clock cycle. The controller reads
//! the program one byte at a time through the memory adaptor and stalls
//! whenever the adaptor's `byte_ready` is low.
//!
//! ```text
//!            start                 opcode            operands done
//!  ┌───────┐ ─────► ┌─────────┐ ──────────► ┌─────────────┐ ──────────┐
//!  │ Reset │        │ FetchOp │             │ FetchParams │           │
//!  └───────┘ ◄───── └─────────┘             └─────────────┘           │
//!      ▲   Reset /       ▲                                            ▼
//!      │   unknown       │     ┌──────────────────────────────────────────┐
//!      │                 └──── │ ConfigureStates | ConfigureWeights       │
//!      │                 done  │ LoadFeatures | StoreFeatures | Run       │
//!      │                       │ Debug                                    │
//!      │ restart (any state)   └──────────────────────────────────────────┘
//! ```
//!
//! # Configuration transfers
//!
//! Each configuration cycle reads one line at `address + offset` and drives
//! lane `i` with node `node_base + i`. States start at node 0 and take
//! `ceil(num_nodes / L)` lines; weights start at the line boundary below the
//! first multiplier and take `ceil((num_adders % L + num_mults) / L)` lines.
//! Only lanes addressing a node of the target kind are enabled.
//!
//! # Faults
//!
//! An opcode byte outside the ISA sends the automaton back to `Reset` and is
//! recorded as a [`DecodeFault`]. Nothing here panics or returns an error.

use crate::device::{snapshot_payload, ConfigBus, ConfigSink, LineData, LineMemory, MemAdaptor, WriteRequest};
use crate::isa::{Instruction, IsaConfig, Opcode, Operands};

/// Automaton state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ControlState {
    /// Idle, waiting for `start`.
    #[default]
    Reset,
    /// Reading the opcode byte at PC.
    FetchOp,
    /// Reading operand bytes into the staging registers.
    FetchParams,
    /// Streaming state codes onto the fan-out ports.
    ConfigureStates,
    /// Streaming weights onto the fan-out ports.
    ConfigureWeights,
    /// Handing a feature load to the dataflow core.
    LoadFeatures,
    /// Handing a feature store to the dataflow core.
    StoreFeatures,
    /// Handing a run to the dataflow core.
    Run,
    /// Writing the node register snapshot to memory.
    Debug,
}

impl ControlState {
    /// Every state.
    pub const ALL: [ControlState; 9] = [
        ControlState::Reset,
        ControlState::FetchOp,
        ControlState::FetchParams,
        ControlState::ConfigureStates,
        ControlState::ConfigureWeights,
        ControlState::LoadFeatures,
        ControlState::StoreFeatures,
        ControlState::Run,
        ControlState::Debug,
    ];

    /// Status output asserted while in this state.
    pub fn status(self) -> Status {
        match self {
            ControlState::Reset => Status::Idle,
            ControlState::FetchOp | ControlState::FetchParams => Status::Fetching,
            ControlState::ConfigureStates | ControlState::ConfigureWeights => Status::Configuring,
            ControlState::LoadFeatures => Status::Loading,
            ControlState::StoreFeatures => Status::Storing,
            ControlState::Run => Status::Running,
            ControlState::Debug => Status::Debugging,
        }
    }

    fn execute(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Reset => ControlState::Reset,
            Opcode::ConfigureStates => ControlState::ConfigureStates,
            Opcode::ConfigureWeights => ControlState::ConfigureWeights,
            Opcode::LoadFeatures => ControlState::LoadFeatures,
            Opcode::StoreFeatures => ControlState::StoreFeatures,
            Opcode::Run => ControlState::Run,
            Opcode::Debug => ControlState::Debug,
        }
    }
}

/// Control status seen by the rest of the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Waiting for `start`.
    #[default]
    Idle,
    /// Reading an instruction.
    Fetching,
    /// Writing node registers.
    Configuring,
    /// Feature load handed off.
    Loading,
    /// Feature store handed off.
    Storing,
    /// Tree run handed off.
    Running,
    /// Writing the register snapshot.
    Debugging,
}

/// External inputs for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlInputs {
    /// Leave `Reset` and start fetching at PC 0.
    pub start: bool,
    /// Abort whatever is in progress and return to `Reset`.
    pub restart: bool,
}

impl ControlInputs {
    /// Inputs with `start` asserted.
    pub const START: Self = Self { start: true, restart: false };
    /// Inputs with `restart` asserted.
    pub const RESTART: Self = Self { start: false, restart: true };
}

/// Work handed to the dataflow core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// Load feature lines into an injection port buffer.
    Load {
        /// Port buffer id.
        port_buffer: u8,
        /// Line count.
        num_lines: u8,
        /// Source line address.
        address: u32,
    },
    /// Store feature lines from a collection port buffer.
    Store {
        /// Port buffer id.
        port_buffer: u8,
        /// Line count.
        num_lines: u8,
        /// Destination line address.
        address: u32,
    },
    /// Run the tree.
    Run {
        /// Execution length.
        length: u32,
    },
}

/// A finished bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    /// Instruction that drove it.
    pub opcode: Opcode,
    /// First line read or written.
    pub start_line: u32,
    /// Lines moved.
    pub lines: usize,
}

/// Unrecognized opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeFault {
    /// The byte.
    pub opcode: u8,
    /// Byte address it was fetched from.
    pub pc: u32,
}

impl std::fmt::Display for DecodeFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown opcode 0x{:02X} at PC 0x{:06X}", self.opcode, self.pc)
    }
}

/// Outputs of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutputs {
    /// State the cycle was spent in.
    pub state: ControlState,
    /// Status asserted during the cycle.
    pub status: Status,
    /// Dataflow work issued this cycle.
    pub handoff: Option<Handoff>,
    /// Transfer finished this cycle.
    pub completed: Option<TransferSummary>,
    /// Decode fault raised this cycle.
    pub fault: Option<DecodeFault>,
}

/// Architectural registers, all zero after reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    /// Byte address of the next instruction byte.
    pub pc: u32,
    /// Opcode being executed.
    pub opcode: Option<Opcode>,
    /// Operand staging.
    pub operands: Operands,
    /// Operand bytes still to fetch.
    pub params_left: usize,
    /// Index of the next operand byte.
    pub param_index: usize,
    /// Lines transferred so far.
    pub offset: u32,
    /// Node address driven on lane 0.
    pub node_base: usize,
}

/// The control automaton.
#[derive(Debug, Clone)]
pub struct Controller {
    isa: IsaConfig,
    state: ControlState,
    regs: Registers,
    bus: ConfigBus,
    snapshot: Vec<u8>,
    fault: Option<DecodeFault>,
    cycles: u64,
    instructions: u64,
}

impl Controller {
    /// Controller for a validated `isa`, in `Reset`.
    pub fn new(isa: IsaConfig) -> Self {
        Self {
            isa,
            state: ControlState::Reset,
            regs: Registers::default(),
            bus: ConfigBus::new(isa.bytes_in_line),
            snapshot: Vec::new(),
            fault: None,
            cycles: 0,
            instructions: 0,
        }
    }

    /// Evaluate one clock cycle.
    ///
    /// The adaptor is clocked exactly once per call. The caller advances
    /// the memory clock afterwards.
    pub fn step<M, S>(
        &mut self,
        inputs: ControlInputs,
        adaptor: &mut MemAdaptor,
        memory: &mut M,
        nodes: &mut S,
    ) -> StepOutputs
    where
        M: LineMemory + ?Sized,
        S: ConfigSink + ?Sized,
    {
        self.cycles += 1;
        self.bus.clear();

        if inputs.restart {
            log::debug!("restart in {:?} at PC 0x{:06X}", self.state, self.regs.pc);
            self.clear_registers();
            self.fault = None;
            self.state = ControlState::Reset;
            adaptor.reset();
            memory.reset_ports();
            return StepOutputs::default();
        }

        let state = self.state;
        let mut out = StepOutputs {
            state,
            status: state.status(),
            ..StepOutputs::default()
        };

        match state {
            ControlState::Reset => {
                adaptor.cycle(None, memory);
                if inputs.start {
                    log::debug!("start");
                    self.fault = None;
                    self.state = ControlState::FetchOp;
                }
            }
            ControlState::FetchOp => self.fetch_op(adaptor, memory, &mut out),
            ControlState::FetchParams => self.fetch_params(adaptor, memory, &*nodes),
            ControlState::ConfigureStates | ControlState::ConfigureWeights => {
                self.configure(adaptor, memory, nodes, &mut out)
            }
            ControlState::LoadFeatures | ControlState::StoreFeatures | ControlState::Run => {
                adaptor.cycle(None, memory);
                out.handoff = self.handoff();
                if let Some(handoff) = out.handoff {
                    log::debug!("handoff {:?}", handoff);
                }
                self.state = ControlState::FetchOp;
            }
            ControlState::Debug => {
                adaptor.cycle(None, memory);
                self.write_snapshot(adaptor, memory, &mut out);
            }
        }

        out
    }

    fn fetch_op<M: LineMemory + ?Sized>(&mut self, adaptor: &mut MemAdaptor, memory: &mut M, out: &mut StepOutputs) {
        let pc = self.regs.pc;
        let Some(byte) = adaptor.cycle(Some(pc), memory).byte else {
            return;
        };

        match Opcode::from_byte(byte) {
            Some(Opcode::Reset) => {
                self.instructions += 1;
                log::info!("reset at PC 0x{:06X} after {} instructions", pc, self.instructions);
                self.clear_registers();
                self.state = ControlState::Reset;
            }
            Some(opcode) => {
                self.regs.opcode = Some(opcode);
                self.regs.operands = Operands::default();
                self.regs.params_left = self.isa.operand_len(opcode);
                self.regs.param_index = 0;
                self.regs.pc = pc + 1;
                self.state = ControlState::FetchParams;
            }
            None => {
                let fault = DecodeFault { opcode: byte, pc };
                log::warn!("{}, returning to reset", fault);
                self.fault = Some(fault);
                out.fault = Some(fault);
                self.clear_registers();
                self.state = ControlState::Reset;
            }
        }
    }

    fn fetch_params<M, S>(&mut self, adaptor: &mut MemAdaptor, memory: &mut M, nodes: &S)
    where
        M: LineMemory + ?Sized,
        S: ConfigSink + ?Sized,
    {
        if self.regs.params_left == 0 {
            adaptor.cycle(None, memory);
            self.dispatch(nodes);
            return;
        }

        let Some(byte) = adaptor.cycle(Some(self.regs.pc), memory).byte else {
            return;
        };

        // Address little-endian, then port buffer, then line count
        let index = self.regs.param_index;
        let address_bytes = self.isa.address_bytes;
        let operands = &mut self.regs.operands;
        if index < address_bytes {
            operands.address |= u32::from(byte) << (8 * index);
        } else if index == address_bytes {
            operands.port_buffer = byte;
        } else {
            operands.num_lines = byte;
        }

        self.regs.param_index += 1;
        self.regs.params_left -= 1;
        self.regs.pc += 1;
    }

    fn dispatch<S: ConfigSink + ?Sized>(&mut self, nodes: &S) {
        let Some(opcode) = self.regs.opcode else {
            self.state = ControlState::FetchOp;
            return;
        };

        self.instructions += 1;
        log::debug!(
            "PC 0x{:06X}: {}",
            self.regs.pc - self.isa.instruction_len(opcode) as u32,
            Instruction { opcode, operands: self.regs.operands }.disassemble()
        );

        self.regs.offset = 0;
        self.regs.node_base = self.node_base_for(opcode);
        if opcode == Opcode::Debug {
            self.snapshot = snapshot_payload(&self.isa, nodes);
        }
        self.state = ControlState::execute(opcode);
    }

    fn node_base_for(&self, opcode: Opcode) -> usize {
        match opcode {
            Opcode::ConfigureWeights => self.isa.weight_node_base(),
            _ => 0,
        }
    }

    fn configure<M, S>(&mut self, adaptor: &mut MemAdaptor, memory: &mut M, nodes: &mut S, out: &mut StepOutputs)
    where
        M: LineMemory + ?Sized,
        S: ConfigSink + ?Sized,
    {
        let weights = self.state == ControlState::ConfigureWeights;
        let (opcode, iterations) = if weights {
            (Opcode::ConfigureWeights, self.isa.weight_line_reads())
        } else {
            (Opcode::ConfigureStates, self.isa.state_line_reads())
        };

        if self.regs.offset as usize == iterations {
            adaptor.cycle(None, memory);
            let summary = TransferSummary {
                opcode,
                start_line: self.regs.operands.address,
                lines: iterations,
            };
            log::debug!("{} done: {} lines from 0x{:06X}", opcode, iterations, summary.start_line);
            out.completed = Some(summary);
            self.regs.offset = 0;
            self.regs.node_base = self.node_base_for(opcode);
            self.state = ControlState::FetchOp;
            return;
        }

        let line_addr = self.regs.operands.address + self.regs.offset;
        let request = line_addr << self.isa.byte_select_bits();
        if adaptor.cycle(Some(request), memory).byte.is_none() {
            return;
        }

        for (lane, &data) in adaptor.line().iter().enumerate() {
            let node = self.regs.node_base + lane;
            let in_range = if weights {
                self.isa.is_mult(node)
            } else {
                node < self.isa.num_nodes()
            };
            if in_range {
                self.bus.drive(lane, node as u8, data, weights);
            }
        }
        if let Err(e) = self.bus.check(self.isa.num_nodes()) {
            log::error!("config bus at line 0x{:06X}: {}", line_addr, e);
        }
        nodes.apply(&self.bus);

        self.regs.offset += 1;
        self.regs.node_base += self.isa.bytes_in_line;
    }

    fn handoff(&self) -> Option<Handoff> {
        let ops = self.regs.operands;
        match self.state {
            ControlState::LoadFeatures => Some(Handoff::Load {
                port_buffer: ops.port_buffer,
                num_lines: ops.num_lines,
                address: ops.address,
            }),
            ControlState::StoreFeatures => Some(Handoff::Store {
                port_buffer: ops.port_buffer,
                num_lines: ops.num_lines,
                address: ops.address,
            }),
            ControlState::Run => Some(Handoff::Run { length: ops.address }),
            _ => None,
        }
    }

    fn write_snapshot<M: LineMemory + ?Sized>(&mut self, adaptor: &mut MemAdaptor, memory: &mut M, out: &mut StepOutputs) {
        let lines = self.isa.debug_lines();
        if self.regs.offset as usize == lines {
            out.completed = Some(TransferSummary {
                opcode: Opcode::Debug,
                start_line: self.regs.operands.address,
                lines,
            });
            log::debug!("debug snapshot written: {} lines at 0x{:06X}", lines, self.regs.operands.address);
            self.regs.offset = 0;
            self.snapshot.clear();
            self.state = ControlState::FetchOp;
            return;
        }

        let width = self.isa.bytes_in_line;
        let start = self.regs.offset as usize * width;
        let addr = self.regs.operands.address + self.regs.offset;
        let data = self
            .snapshot
            .get(start..start + width)
            .map(LineData::from_slice)
            .unwrap_or_else(|| LineData::from_elem(0, width));

        let resp = memory.write_cycle(&WriteRequest { rq: true, en: true, addr, data });
        if resp.ack {
            adaptor.invalidate(addr);
            self.regs.offset += 1;
        }
    }

    fn clear_registers(&mut self) {
        self.regs = Registers::default();
        self.snapshot.clear();
    }

    /// Current state.
    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Current status output.
    pub fn status(&self) -> Status {
        self.state.status()
    }

    /// Register snapshot.
    pub fn registers(&self) -> Registers {
        self.regs
    }

    /// Decode fault that ended the last run, kept until the next start or
    /// restart.
    pub fn fault(&self) -> Option<DecodeFault> {
        self.fault
    }

    /// Fan-out ports as driven in the last cycle.
    pub fn bus(&self) -> &ConfigBus {
        &self.bus
    }

    /// Cycles stepped.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Instructions executed (terminating `Reset` included).
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// Build-time shape.
    pub fn isa(&self) -> &IsaConfig {
        &self.isa
    }
}
