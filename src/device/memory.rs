//! Line-addressed backing store with handshake ports.
//!
//! The device memory is word oriented: every access moves one whole line.
//! It exposes one read port and one write port, each with a request/ready
//! handshake. Reads complete `read_latency` cycles after the request is
//! accepted (`valid`); writes are acknowledged in the cycle they are
//! accepted.
//!
//! ```text
//!            cycle:  0     1     2
//! read  rq  ────────███───────────
//!       rdy ────────███───────────      (accepted, address latched)
//!       valid ───────────███──────      (read_latency = 1)
//! ```
//!
//! Backpressure is modelled by holding `rdy` low for `stall_cycles`
//! cycles on every new request.

use smallvec::SmallVec;

/// Bytes of one line, stored inline for lines up to 8 bytes.
pub type LineData = SmallVec<[u8; 8]>;

/// Read port inputs for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadRequest {
    /// Request a line read.
    pub rq: bool,
    /// Line address.
    pub addr: u32,
}

/// Read port outputs for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadResponse {
    /// Request accepted this cycle.
    pub rdy: bool,
    /// Line data available this cycle.
    pub valid: bool,
    /// Line data (meaningful when `valid`).
    pub data: LineData,
}

/// Write port inputs for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteRequest {
    /// Request a write.
    pub rq: bool,
    /// Write enable (a request without enable is a no-op handshake).
    pub en: bool,
    /// Line address.
    pub addr: u32,
    /// Line data.
    pub data: LineData,
}

/// Write port outputs for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResponse {
    /// Request accepted this cycle.
    pub rdy: bool,
    /// Write performed.
    pub ack: bool,
}

/// Access counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Line reads accepted.
    pub line_reads: u64,
    /// Line writes performed.
    pub line_writes: u64,
    /// Cycles a request waited for `rdy`.
    pub stall_cycles: u64,
}

/// Timing of the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTiming {
    /// Cycles from accepted read to valid data (at least 1).
    pub read_latency: u32,
    /// Cycles `rdy` is held low on each new request.
    pub stall_cycles: u32,
}

impl Default for MemoryTiming {
    fn default() -> Self {
        Self { read_latency: 1, stall_cycles: 0 }
    }
}

/// A line memory reachable only through its ports.
///
/// Each `*_cycle` call evaluates one port for the current cycle; `tick`
/// advances the clock once all ports have been evaluated.
pub trait LineMemory {
    /// Bytes per line.
    fn bytes_in_line(&self) -> usize;

    /// Evaluate the read port for this cycle.
    fn read_cycle(&mut self, req: ReadRequest) -> ReadResponse;

    /// Evaluate the write port for this cycle.
    fn write_cycle(&mut self, req: &WriteRequest) -> WriteResponse;

    /// Advance to the next cycle.
    fn tick(&mut self);

    /// Drop any in-flight access and restart the stall counters.
    fn reset_ports(&mut self) {}
}

#[derive(Debug, Clone)]
struct InFlight {
    due: u64,
    data: LineData,
}

/// Simulated device memory.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes_in_line: usize,
    lines: Vec<LineData>,
    timing: MemoryTiming,
    now: u64,
    in_flight: Option<InFlight>,
    read_stall_left: u32,
    write_stall_left: u32,
    stats: MemoryStats,
}

impl Memory {
    /// Create a zeroed memory of `num_lines` lines.
    pub fn new(num_lines: usize, bytes_in_line: usize, timing: MemoryTiming) -> Self {
        let timing = MemoryTiming {
            read_latency: timing.read_latency.max(1),
            ..timing
        };
        Self {
            bytes_in_line,
            lines: vec![LineData::from_elem(0, bytes_in_line); num_lines],
            timing,
            now: 0,
            in_flight: None,
            read_stall_left: timing.stall_cycles,
            write_stall_left: timing.stall_cycles,
            stats: MemoryStats::default(),
        }
    }

    /// Number of lines.
    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    /// Timing parameters.
    pub fn timing(&self) -> MemoryTiming {
        self.timing
    }

    /// Access counters.
    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    /// Current cycle.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Host-side bulk load, bypassing the ports (the transport's job).
    ///
    /// Bytes beyond the end of memory are dropped.
    pub fn load_bytes(&mut self, base_line: usize, bytes: &[u8]) {
        for (i, chunk) in bytes.chunks(self.bytes_in_line).enumerate() {
            let line = base_line + i;
            match self.lines.get_mut(line) {
                Some(slot) => {
                    slot.fill(0);
                    slot[..chunk.len()].copy_from_slice(chunk);
                }
                None => {
                    log::warn!("load past end of memory at line {}, {} lines dropped", line, self.lines.len());
                    break;
                }
            }
        }
    }

    /// Host-side read of `count` lines starting at `base_line`.
    ///
    /// Lines past the end read as zero.
    pub fn dump_bytes(&self, base_line: usize, count: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(count * self.bytes_in_line);
        for line in base_line..base_line + count {
            match self.lines.get(line) {
                Some(data) => out.extend_from_slice(data),
                None => out.extend(std::iter::repeat(0).take(self.bytes_in_line)),
            }
        }
        out
    }

    /// Contents of one line, zero past the end.
    pub fn line(&self, addr: u32) -> LineData {
        self.lines
            .get(addr as usize)
            .cloned()
            .unwrap_or_else(|| LineData::from_elem(0, self.bytes_in_line))
    }
}

impl LineMemory for Memory {
    fn bytes_in_line(&self) -> usize {
        self.bytes_in_line
    }

    fn read_cycle(&mut self, req: ReadRequest) -> ReadResponse {
        let mut resp = ReadResponse::default();
        let now = self.now;

        if let Some(done) = self.in_flight.take_if(|f| f.due <= now) {
            resp.valid = true;
            resp.data = done.data;
        }

        if req.rq && self.in_flight.is_none() {
            if self.read_stall_left > 0 {
                self.read_stall_left -= 1;
                self.stats.stall_cycles += 1;
            } else {
                resp.rdy = true;
                self.in_flight = Some(InFlight {
                    due: now + u64::from(self.timing.read_latency),
                    data: self.line(req.addr),
                });
                self.read_stall_left = self.timing.stall_cycles;
                self.stats.line_reads += 1;
            }
        }

        resp
    }

    fn write_cycle(&mut self, req: &WriteRequest) -> WriteResponse {
        if !req.rq {
            return WriteResponse::default();
        }
        if self.write_stall_left > 0 {
            self.write_stall_left -= 1;
            self.stats.stall_cycles += 1;
            return WriteResponse::default();
        }
        self.write_stall_left = self.timing.stall_cycles;

        if req.en {
            match self.lines.get_mut(req.addr as usize) {
                Some(slot) => {
                    let n = req.data.len().min(slot.len());
                    slot[..n].copy_from_slice(&req.data[..n]);
                    self.stats.line_writes += 1;
                }
                None => {
                    log::warn!("write to unmapped line 0x{:06X} dropped", req.addr);
                }
            }
        }

        WriteResponse { rdy: true, ack: true }
    }

    fn tick(&mut self) {
        self.now += 1;
    }

    fn reset_ports(&mut self) {
        self.in_flight = None;
        self.read_stall_left = self.timing.stall_cycles;
        self.write_stall_left = self.timing.stall_cycles;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Memory {
        let mut mem = Memory::new(16, 4, MemoryTiming::default());
        mem.load_bytes(0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        mem
    }

    #[test]
    fn test_read_valid_one_cycle_after_rdy() {
        let mut mem = memory();

        let resp = mem.read_cycle(ReadRequest { rq: true, addr: 1 });
        assert!(resp.rdy);
        assert!(!resp.valid);
        mem.tick();

        let resp = mem.read_cycle(ReadRequest::default());
        assert!(resp.valid);
        assert_eq!(resp.data.as_slice(), &[5, 6, 7, 8]);
        assert_eq!(mem.stats().line_reads, 1);
    }

    #[test]
    fn test_read_latency() {
        let mut mem = Memory::new(4, 4, MemoryTiming { read_latency: 3, stall_cycles: 0 });
        assert!(mem.read_cycle(ReadRequest { rq: true, addr: 0 }).rdy);
        for _ in 0..2 {
            mem.tick();
            assert!(!mem.read_cycle(ReadRequest::default()).valid);
        }
        mem.tick();
        assert!(mem.read_cycle(ReadRequest::default()).valid);
    }

    #[test]
    fn test_read_backpressure() {
        let mut mem = Memory::new(4, 4, MemoryTiming { read_latency: 1, stall_cycles: 2 });
        let req = ReadRequest { rq: true, addr: 0 };
        assert!(!mem.read_cycle(req).rdy);
        mem.tick();
        assert!(!mem.read_cycle(req).rdy);
        mem.tick();
        assert!(mem.read_cycle(req).rdy);
        assert_eq!(mem.stats().stall_cycles, 2);
    }

    #[test]
    fn test_write_ack() {
        let mut mem = memory();
        let req = WriteRequest {
            rq: true,
            en: true,
            addr: 2,
            data: LineData::from_slice(&[9, 9, 9, 9]),
        };
        let resp = mem.write_cycle(&req);
        assert!(resp.rdy && resp.ack);
        assert_eq!(mem.line(2).as_slice(), &[9, 9, 9, 9]);
        assert_eq!(mem.stats().line_writes, 1);
    }

    #[test]
    fn test_write_without_enable_does_not_store() {
        let mut mem = memory();
        let req = WriteRequest {
            rq: true,
            en: false,
            addr: 0,
            data: LineData::from_slice(&[0, 0, 0, 0]),
        };
        assert!(mem.write_cycle(&req).ack);
        assert_eq!(mem.line(0).as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut mem = memory();
        assert_eq!(mem.line(99).as_slice(), &[0, 0, 0, 0]);
        let req = WriteRequest {
            rq: true,
            en: true,
            addr: 99,
            data: LineData::from_slice(&[1, 1, 1, 1]),
        };
        assert!(mem.write_cycle(&req).ack);
        assert_eq!(mem.stats().line_writes, 0);
        assert_eq!(mem.dump_bytes(15, 2), vec![0; 8]);
    }

    #[test]
    fn test_reset_ports_drops_in_flight_read() {
        let mut mem = memory();
        assert!(mem.read_cycle(ReadRequest { rq: true, addr: 0 }).rdy);
        mem.reset_ports();
        mem.tick();
        assert!(!mem.read_cycle(ReadRequest::default()).valid);
    }
}
