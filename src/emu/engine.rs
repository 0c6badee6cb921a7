//! Clocked harness around the control core.
//!
//! The engine owns the device memory, the memory adaptor, the controller
//! and the node register file, and advances them together one cycle at a
//! time:
//!
//! - controller step (clocks the adaptor, drives ports and the write port)
//! - memory clock tick
//!
//! # Usage
//!
//! ```
//! use maeri_emu::assembler::assemble;
//! use maeri_emu::device::ConfigSink;
//! use maeri_emu::emu::{DeviceTiming, Engine, StopReason};
//! use maeri_emu::isa::{IsaConfig, Operation};
//!
//! let isa = IsaConfig::default();
//! let image = assemble(&[Operation::ConfigureStates(vec![3; 63])], &isa).unwrap();
//!
//! let mut engine = Engine::new(isa, DeviceTiming::default()).unwrap();
//! engine.load_image(&image).unwrap();
//! let outcome = engine.run(10_000);
//! assert_eq!(outcome.reason, StopReason::Completed);
//! assert!(engine.nodes().states().iter().all(|&s| s == 3));
//! ```

use super::controller::{
    ControlInputs, ControlState, Controller, DecodeFault, Handoff, Status, StepOutputs, TransferSummary,
};
use crate::assembler::ProgramImage;
use crate::device::{
    AdaptorStats, ConfigSink, LineMemory, MemAdaptor, Memory, MemoryStats, MemoryTiming, NodeRegisterFile,
};
use crate::isa::{IsaConfig, IsaError};
use thiserror::Error;

/// Memory timing and size of the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTiming {
    /// Cycles from accepted read to valid data.
    pub read_latency: u32,
    /// Cycles memory holds `rdy` low on each new request.
    pub stall_cycles: u32,
    /// Lines of device memory.
    pub memory_lines: usize,
}

impl Default for DeviceTiming {
    fn default() -> Self {
        Self {
            read_latency: 1,
            stall_cycles: 0,
            memory_lines: 1024,
        }
    }
}

impl DeviceTiming {
    fn memory_timing(&self) -> MemoryTiming {
        MemoryTiming {
            read_latency: self.read_latency,
            stall_cycles: self.stall_cycles,
        }
    }
}

/// Engine construction and loading errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The build-time shape is not supported.
    #[error("invalid ISA configuration: {0}")]
    Isa(#[from] IsaError),

    /// Device memory cannot hold a program image.
    #[error("device memory has {lines} lines, a program image needs {needed}")]
    MemoryTooSmall {
        /// Configured lines.
        lines: usize,
        /// Lines of one image.
        needed: usize,
    },

    /// The image was assembled for a different shape.
    #[error("image was built for {image:?}, engine is configured for {engine:?}")]
    IsaMismatch {
        /// Image configuration.
        image: IsaConfig,
        /// Engine configuration.
        engine: IsaConfig,
    },
}

/// Why [`Engine::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Reached the terminating `Reset`.
    Completed,
    /// Returned to reset on an unknown opcode.
    Fault(DecodeFault),
    /// Hit the cycle limit while still executing.
    CycleLimit,
}

/// Result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Cycles stepped by this run.
    pub cycles: u64,
    /// Why it stopped.
    pub reason: StopReason,
}

/// The control core with its memory and node registers.
pub struct Engine {
    isa: IsaConfig,
    timing: DeviceTiming,
    memory: Memory,
    adaptor: MemAdaptor,
    controller: Controller,
    nodes: NodeRegisterFile,
    pending: ControlInputs,
    handoffs: Vec<Handoff>,
    transfers: Vec<TransferSummary>,
    total_cycles: u64,
}

impl Engine {
    /// Build an engine. The ISA configuration is validated here, once.
    pub fn new(isa: IsaConfig, timing: DeviceTiming) -> Result<Self, EngineError> {
        isa.validate()?;
        let needed = isa.instruction_lines + isa.config_lines;
        if timing.memory_lines < needed {
            return Err(EngineError::MemoryTooSmall {
                lines: timing.memory_lines,
                needed,
            });
        }

        log::debug!(
            "engine: {} nodes, {} byte lines, {} memory lines, latency {}, stall {}",
            isa.num_nodes(),
            isa.bytes_in_line,
            timing.memory_lines,
            timing.read_latency,
            timing.stall_cycles
        );

        Ok(Self {
            isa,
            timing,
            memory: Memory::new(timing.memory_lines, isa.bytes_in_line, timing.memory_timing()),
            adaptor: MemAdaptor::new(isa.bytes_in_line),
            controller: Controller::new(isa),
            nodes: NodeRegisterFile::new(&isa),
            pending: ControlInputs::default(),
            handoffs: Vec::new(),
            transfers: Vec::new(),
            total_cycles: 0,
        })
    }

    /// Write a program image to memory at line 0.
    pub fn load_image(&mut self, image: &ProgramImage) -> Result<(), EngineError> {
        if image.isa() != &self.isa {
            return Err(EngineError::IsaMismatch {
                image: *image.isa(),
                engine: self.isa,
            });
        }
        self.memory.load_bytes(0, image.bytes());
        self.adaptor.reset();
        log::info!("Loaded {} byte image ({} lines)", image.len(), image.num_lines());
        Ok(())
    }

    /// Assert `start` on the next cycle.
    pub fn start(&mut self) {
        self.pending.start = true;
    }

    /// Assert `restart` on the next cycle.
    pub fn restart(&mut self) {
        self.pending.restart = true;
    }

    /// Advance one cycle. Returns the status asserted during it.
    pub fn step(&mut self) -> Status {
        self.clock().status
    }

    fn clock(&mut self) -> StepOutputs {
        let inputs = std::mem::take(&mut self.pending);
        let out = self
            .controller
            .step(inputs, &mut self.adaptor, &mut self.memory, &mut self.nodes);
        self.memory.tick();
        self.total_cycles += 1;

        if let Some(handoff) = out.handoff {
            self.handoffs.push(handoff);
        }
        if let Some(transfer) = out.completed {
            self.transfers.push(transfer);
        }
        out
    }

    /// Start the program and step until the controller is back in
    /// `Reset`, or for at most `max_cycles` cycles.
    pub fn run(&mut self, max_cycles: u64) -> RunOutcome {
        let start = self.total_cycles;
        if self.controller.state() == ControlState::Reset {
            self.start();
        }

        while self.total_cycles - start < max_cycles {
            let out = self.clock();
            if self.controller.state() == ControlState::Reset {
                let reason = match out.fault {
                    Some(fault) => StopReason::Fault(fault),
                    None => StopReason::Completed,
                };
                let cycles = self.total_cycles - start;
                log::info!("run stopped after {} cycles: {:?}", cycles, reason);
                return RunOutcome { cycles, reason };
            }
        }

        log::warn!("cycle limit {} reached in {:?}", max_cycles, self.controller.state());
        RunOutcome {
            cycles: self.total_cycles - start,
            reason: StopReason::CycleLimit,
        }
    }

    /// Status of the controller.
    pub fn status(&self) -> Status {
        self.controller.status()
    }

    /// The controller.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Node registers.
    pub fn nodes(&self) -> &NodeRegisterFile {
        &self.nodes
    }

    /// Device memory.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Dataflow work handed off so far.
    pub fn handoffs(&self) -> &[Handoff] {
        &self.handoffs
    }

    /// Bulk transfers finished so far.
    pub fn transfers(&self) -> &[TransferSummary] {
        &self.transfers
    }

    /// Cycles stepped since construction.
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Adaptor counters.
    pub fn adaptor_stats(&self) -> AdaptorStats {
        self.adaptor.stats()
    }

    /// Memory counters.
    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    /// Device timing.
    pub fn timing(&self) -> DeviceTiming {
        self.timing
    }

    /// Print engine status.
    pub fn print_status(&self) {
        let regs = self.controller.registers();
        let mem = self.memory.stats();
        let adaptor = self.adaptor.stats();

        println!("Engine Status: {:?} ({:?})", self.status(), self.controller.state());
        println!("Total Cycles: {}", self.total_cycles);
        println!("Instructions: {}", self.controller.instructions());
        println!("PC: 0x{:06X}", regs.pc);
        if let Some(fault) = self.controller.fault() {
            println!("Fault: {}", fault);
        }
        println!();
        println!("Memory: {} line reads, {} line writes, {} stall cycles",
            mem.line_reads, mem.line_writes, mem.stall_cycles);
        println!("Adaptor: {} hits, {} fetches", adaptor.hits, adaptor.fetches);

        if !self.transfers.is_empty() {
            println!();
            println!("Transfers:");
            for t in &self.transfers {
                println!("  {:12} {:3} lines @0x{:06X}", t.opcode.mnemonic(), t.lines, t.start_line);
            }
        }
        if !self.handoffs.is_empty() {
            println!();
            println!("Handoffs:");
            for h in &self.handoffs {
                println!("  {:?}", h);
            }
        }
    }

    /// Print every node register, eight per row.
    pub fn print_nodes(&self) {
        println!("Node states:");
        for (row, chunk) in self.nodes.states().chunks(8).enumerate() {
            print!("  {:3}:", row * 8);
            for s in chunk {
                print!(" {:3}", s);
            }
            println!();
        }
        println!("Multiplier weights (from node {}):", self.isa.num_adders());
        for (row, chunk) in self.nodes.weights().chunks(8).enumerate() {
            print!("  {:3}:", self.isa.num_adders() + row * 8);
            for w in chunk {
                print!(" {:4}", w);
            }
            println!();
        }
    }
}
