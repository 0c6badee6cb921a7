//! Device-side models around the control core.
//!
//! This module provides:
//! - Line-addressed backing memory with read/write handshake ports
//! - The byte-granular memory adaptor the controller reads through
//! - Configuration fan-out ports and the node register file they feed
//!
//! # Datapath
//!
//! ```text
//!              byte addr               line addr
//!  ┌──────────┐ ───────► ┌──────────┐ ───────► ┌──────────┐
//!  │controller│          │ adaptor  │  rq/rdy  │  memory  │
//!  │          │ ◄─────── │ (1 line) │ ◄─────── │ (lines)  │
//!  └────┬─────┘ byte,rdy └──────────┘  valid   └────▲─────┘
//!       │                                           │
//!       │  L ports {en, node, data, wsel}           │ write port
//!       ▼                                           │ (debug snapshot)
//!  ┌──────────────────────┐                         │
//!  │ node register file   │ ────────────────────────┘
//!  │ states[63] weights[32]│
//!  └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use maeri_emu::device::{LineMemory, MemAdaptor, Memory, MemoryTiming};
//!
//! let mut mem = Memory::new(16, 4, MemoryTiming::default());
//! mem.load_bytes(0, &[1, 2, 3, 4]);
//! let mut adaptor = MemAdaptor::new(4);
//!
//! // Miss: one cycle to issue, one to receive
//! assert!(!adaptor.cycle(Some(2), &mut mem).byte_ready);
//! mem.tick();
//! assert_eq!(adaptor.cycle(Some(2), &mut mem).byte, Some(3));
//! ```

pub mod memory;
pub mod adaptor;
pub mod config_bus;

pub use memory::{
    LineData, LineMemory, Memory, MemoryStats, MemoryTiming, ReadRequest, ReadResponse,
    WriteRequest, WriteResponse,
};
pub use adaptor::{AdaptorResponse, AdaptorStats, ByteAddress, FetchPhase, MemAdaptor};
pub use config_bus::{snapshot_payload, BusError, ConfigBus, ConfigPort, ConfigSink, NodeRegisterFile};
