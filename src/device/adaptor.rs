//! Byte-granular view of line memory.
//!
//! The controller addresses bytes; memory moves lines. The adaptor splits a
//! byte address into line address and byte select, keeps the last fetched
//! line, and only goes to memory when the requested byte lies in a
//! different line.
//!
//! ```text
//!  byte address:  [ line address .......... | select ]
//!                                             log2(L) bits
//!
//!         request, cached line hit
//!   ┌──────┐ ────────────────────────► byte_ready = 1
//!   │ Idle │
//!   └──┬───┘ miss
//!      ▼
//!   ┌───────┐ rdy  ┌───────┐ valid
//!   │ Issue │ ───► │ Await │ ─────► latch line, back to Idle
//!   └───────┘      └───────┘
//!   byte_ready = 0 while in Issue/Await
//! ```
//!
//! A fetch, once issued, runs to completion even if the request drops.

use super::memory::{LineData, LineMemory, ReadRequest};

/// Split form of a byte address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteAddress {
    /// Line address.
    pub line: u32,
    /// Byte within the line.
    pub select: usize,
}

impl ByteAddress {
    /// Split `addr` for lines of `1 << select_bits` bytes.
    pub fn split(addr: u32, select_bits: u32) -> Self {
        Self {
            line: addr >> select_bits,
            select: (addr & ((1 << select_bits) - 1)) as usize,
        }
    }

    /// Join back into a byte address.
    pub fn join(self, select_bits: u32) -> u32 {
        (self.line << select_bits) | self.select as u32
    }
}

/// Fetch pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPhase {
    /// No fetch outstanding.
    #[default]
    Idle,
    /// Line read requested, waiting for `rdy`.
    Issue {
        /// Line being fetched.
        line: u32,
    },
    /// Line read accepted, waiting for `valid`.
    Await {
        /// Line being fetched.
        line: u32,
    },
}

/// Adaptor outputs for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdaptorResponse {
    /// Low only while a line fetch is outstanding.
    pub byte_ready: bool,
    /// Requested byte, when a request was made and `byte_ready` is high.
    pub byte: Option<u8>,
}

/// Adaptor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptorStats {
    /// Requests served from the cached line.
    pub hits: u64,
    /// Line fetches issued to memory.
    pub fetches: u64,
}

/// Byte-granular read adaptor with a single-line cache.
#[derive(Debug, Clone)]
pub struct MemAdaptor {
    select_bits: u32,
    phase: FetchPhase,
    cached: Option<u32>,
    data: LineData,
    stats: AdaptorStats,
}

impl MemAdaptor {
    /// Adaptor for lines of `bytes_in_line` bytes (a power of two).
    pub fn new(bytes_in_line: usize) -> Self {
        Self {
            select_bits: bytes_in_line.trailing_zeros(),
            phase: FetchPhase::Idle,
            cached: None,
            data: LineData::from_elem(0, bytes_in_line),
            stats: AdaptorStats::default(),
        }
    }

    /// Evaluate one cycle.
    ///
    /// `request` is the byte address the controller wants this cycle, or
    /// `None` when it is not reading.
    pub fn cycle<M: LineMemory + ?Sized>(&mut self, request: Option<u32>, memory: &mut M) -> AdaptorResponse {
        let wanted = request.map(|addr| ByteAddress::split(addr, self.select_bits));

        if self.phase == FetchPhase::Idle {
            let Some(addr) = wanted else {
                return AdaptorResponse { byte_ready: true, byte: None };
            };
            if self.cached == Some(addr.line) {
                self.stats.hits += 1;
                return AdaptorResponse {
                    byte_ready: true,
                    byte: Some(self.data[addr.select]),
                };
            }
            self.phase = FetchPhase::Issue { line: addr.line };
            self.stats.fetches += 1;
        }

        match self.phase {
            FetchPhase::Issue { line } => {
                let resp = memory.read_cycle(ReadRequest { rq: true, addr: line });
                if resp.rdy {
                    self.phase = FetchPhase::Await { line };
                }
                AdaptorResponse { byte_ready: false, byte: None }
            }
            FetchPhase::Await { line } => {
                let resp = memory.read_cycle(ReadRequest { rq: false, addr: line });
                if !resp.valid {
                    return AdaptorResponse { byte_ready: false, byte: None };
                }
                self.data = resp.data;
                self.cached = Some(line);
                self.phase = FetchPhase::Idle;
                log::trace!("adaptor: line 0x{:06X} fetched", line);

                let byte = wanted
                    .filter(|addr| addr.line == line)
                    .map(|addr| self.data[addr.select]);
                AdaptorResponse { byte_ready: true, byte }
            }
            FetchPhase::Idle => unreachable!("idle handled above"),
        }
    }

    /// Bytes of the cached line.
    pub fn line(&self) -> &[u8] {
        &self.data
    }

    /// Line address currently cached.
    pub fn cached_line(&self) -> Option<u32> {
        self.cached
    }

    /// Fetch pipeline phase.
    pub fn phase(&self) -> FetchPhase {
        self.phase
    }

    /// Counters.
    pub fn stats(&self) -> AdaptorStats {
        self.stats
    }

    /// Drop the cached copy of `line` after it was written.
    pub fn invalidate(&mut self, line: u32) {
        if self.cached == Some(line) {
            self.cached = None;
        }
    }

    /// Abort any fetch and drop the cache.
    pub fn reset(&mut self) {
        self.phase = FetchPhase::Idle;
        self.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::memory::{Memory, MemoryTiming};

    fn memory(timing: MemoryTiming) -> Memory {
        let mut mem = Memory::new(8, 4, timing);
        mem.load_bytes(0, &[10, 11, 12, 13, 20, 21, 22, 23]);
        mem
    }

    /// Clock the adaptor until the byte at `addr` is ready.
    fn read_byte(adaptor: &mut MemAdaptor, mem: &mut Memory, addr: u32) -> (u8, u32) {
        for cycles in 1..100 {
            let resp = adaptor.cycle(Some(addr), mem);
            mem.tick();
            if let (true, Some(b)) = (resp.byte_ready, resp.byte) {
                return (b, cycles);
            }
        }
        panic!("byte never became ready");
    }

    #[test]
    fn test_split_join() {
        let a = ByteAddress::split(0x0203, 2);
        assert_eq!(a, ByteAddress { line: 0x80, select: 3 });
        assert_eq!(a.join(2), 0x0203);
    }

    #[test]
    fn test_miss_then_hit() {
        let mut mem = memory(MemoryTiming::default());
        let mut adaptor = MemAdaptor::new(4);

        // Miss: issue cycle, then valid cycle
        let (b, cycles) = read_byte(&mut adaptor, &mut mem, 1);
        assert_eq!(b, 11);
        assert_eq!(cycles, 2);

        // Same line, other bytes: served in one cycle without memory traffic
        for (addr, want) in [(0, 10), (2, 12), (3, 13)] {
            let (b, cycles) = read_byte(&mut adaptor, &mut mem, addr);
            assert_eq!((b, cycles), (want, 1));
        }
        assert_eq!(mem.stats().line_reads, 1);
        assert_eq!(adaptor.stats().hits, 3);

        // Next line misses again
        let (b, _) = read_byte(&mut adaptor, &mut mem, 4);
        assert_eq!(b, 20);
        assert_eq!(mem.stats().line_reads, 2);
        assert_eq!(adaptor.line(), &[20, 21, 22, 23]);
    }

    #[test]
    fn test_byte_ready_low_only_while_fetching() {
        let mut mem = memory(MemoryTiming { read_latency: 2, stall_cycles: 1 });
        let mut adaptor = MemAdaptor::new(4);

        assert!(adaptor.cycle(None, &mut mem).byte_ready);

        let mut ready = Vec::new();
        loop {
            let resp = adaptor.cycle(Some(5), &mut mem);
            mem.tick();
            ready.push(resp.byte_ready);
            if resp.byte.is_some() {
                break;
            }
        }
        // stall, accept, wait, valid
        assert_eq!(ready, vec![false, false, false, true]);
        assert_eq!(adaptor.cached_line(), Some(1));
    }

    #[test]
    fn test_fetch_continues_without_request() {
        let mut mem = memory(MemoryTiming::default());
        let mut adaptor = MemAdaptor::new(4);

        adaptor.cycle(Some(4), &mut mem);
        mem.tick();
        assert_eq!(adaptor.phase(), FetchPhase::Await { line: 1 });

        let resp = adaptor.cycle(None, &mut mem);
        mem.tick();
        assert!(resp.byte_ready);
        assert_eq!(resp.byte, None);
        assert_eq!(adaptor.cached_line(), Some(1));
    }

    #[test]
    fn test_invalidate_forces_refetch() {
        let mut mem = memory(MemoryTiming::default());
        let mut adaptor = MemAdaptor::new(4);

        read_byte(&mut adaptor, &mut mem, 0);
        adaptor.invalidate(1);
        assert_eq!(adaptor.cached_line(), Some(0));
        adaptor.invalidate(0);
        assert_eq!(adaptor.cached_line(), None);

        read_byte(&mut adaptor, &mut mem, 0);
        assert_eq!(mem.stats().line_reads, 2);
    }
}
