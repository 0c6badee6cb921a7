//! maeri-emu library
//!
//! Control core of a tree-structured dataflow accelerator: instruction set,
//! host-side assembler, and a cycle-level model of the device automaton.

pub mod isa;
pub mod assembler;
pub mod device;
pub mod emu;
pub mod config;
