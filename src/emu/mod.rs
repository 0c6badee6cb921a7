//! Cycle-level emulation of the control core.
//!
//! This module provides:
//! - The fetch-decode-execute automaton ([`Controller`])
//! - A clocked engine that wires it to memory, adaptor and node registers
//!
//! # Architecture
//!
//! Everything advances on one global clock. Per cycle the controller is
//! evaluated first (it clocks the adaptor and may use the write port), then
//! the memory clock ticks. Execution is strictly sequential in PC order.
//!
//! # Example
//!
//! ```
//! use maeri_emu::assembler::assemble;
//! use maeri_emu::emu::{DeviceTiming, Engine, Handoff};
//! use maeri_emu::isa::{IsaConfig, Operation};
//!
//! let isa = IsaConfig::default();
//! let image = assemble(&[Operation::Run { length: 8 }], &isa).unwrap();
//!
//! let mut engine = Engine::new(isa, DeviceTiming::default()).unwrap();
//! engine.load_image(&image).unwrap();
//! engine.run(1_000);
//! assert_eq!(engine.handoffs(), &[Handoff::Run { length: 8 }]);
//! ```

pub mod controller;
pub mod engine;

pub use controller::{
    ControlInputs, ControlState, Controller, DecodeFault, Handoff, Registers, Status, StepOutputs,
    TransferSummary,
};
pub use engine::{DeviceTiming, Engine, EngineError, RunOutcome, StopReason};
