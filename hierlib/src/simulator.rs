//! Trace-driven front end for the cache hierarchy.
//!
//! A trace is a sequence of fixed-width 40-byte records:
//!
//! ```text
//! K PPPPPPPPPPPPPPPP AAAAAAAAAAAAAAAA SSS\n
//! ```
//!
//! where `K` is the access kind (`F`etch, `L`oad, or `S`tore), `P` is the
//! program counter and `A` the effective address (16 hex digits each), and
//! `S` the access size in bytes (3 decimal digits). Records with an unknown
//! kind byte are skipped.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cache::{CacheInterface, CacheModel, CacheStats, MissHandler};
use crate::config::HierarchyConfig;
use crate::hex::HEX_PAIRS;
use crate::memtracer::{AccessType, DcacheSim, IcacheSim, MemTracer};
use crate::processor::ProcessorState;

pub(crate) const RECORD_SIZE: usize = 40;
const KIND_OFFSET: usize = 0;
const PC_OFFSET: usize = 2;
const PC_UPPER: usize = PC_OFFSET + 16;
const ADDR_OFFSET: usize = PC_UPPER + 1;
const ADDR_UPPER: usize = ADDR_OFFSET + 16;
const SIZE_OFFSET: usize = ADDR_UPPER + 1;
const SIZE_UPPER: usize = SIZE_OFFSET + 3;

/// The simulator wires the configured caches into a hierarchy and replays
/// trace records through them.
///
/// It supports calling simulate multiple times, and will update the time
/// taken to simulate and the counters accordingly
pub struct Simulator {
    proc: Rc<ProcessorState>,
    icache: Option<IcacheSim>,
    dcache: Option<DcacheSim>,
    l2: Option<MissHandler>,
    simulation_time: Duration,
}

/// Counter snapshots for every cache in the hierarchy, in I$, D$, L2$
/// order. Can be serialised to the JSON output format.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct HierarchyResult {
    pub caches: Vec<CacheStats>,
}

impl Simulator {
    /// Builds the hierarchy a configuration describes: optional I-cache and
    /// D-cache, both forwarding misses to the optional shared L2.
    ///
    /// # Arguments
    ///
    /// * `config`: A hierarchy configuration, usually resulting from
    ///   parsing JSON
    ///
    /// returns: Result<Simulator, String>
    pub fn new(config: &HierarchyConfig) -> Result<Self, String> {
        let proc = Rc::new(ProcessorState::new());
        let l2 = match &config.l2 {
            Some(geometry) => {
                let mut cache = CacheModel::construct(geometry, "L2$")?;
                cache.set_log(config.log);
                cache.set_proc(proc.clone());
                Some(Rc::new(RefCell::new(cache)))
            }
            None => None,
        };
        let mut icache = config.icache.as_deref().map(IcacheSim::new).transpose()?;
        let mut dcache = config.dcache.as_deref().map(DcacheSim::new).transpose()?;
        if icache.is_none() && dcache.is_none() {
            return Err("a hierarchy needs at least one first-level cache".to_string());
        }
        if let Some(ic) = &mut icache {
            ic.set_log(config.log);
            ic.set_proc(proc.clone());
            if let Some(l2) = &l2 {
                ic.set_miss_handler(l2.clone());
            }
        }
        if let Some(dc) = &mut dcache {
            dc.set_log(config.log);
            dc.set_proc(proc.clone());
            if let Some(l2) = &l2 {
                dc.set_miss_handler(l2.clone());
            }
        }
        Ok(Self {
            proc,
            icache,
            dcache,
            l2,
            simulation_time: Duration::new(0, 0),
        })
    }

    /// Replays a trace through the hierarchy.
    ///
    /// The byte array must consist of whole 40-byte records. For speed the
    /// record fields are not verified here; a trace of dubious provenance
    /// should go through [`crate::io::validate_trace`] first. While this
    /// won't panic on garbage fields, it may produce nonsense results.
    ///
    /// Note that reads from the byte array are *guaranteed to be
    /// sequential*, so when the trace is memory mapped the OS can usefully
    /// be advised of sequential access (see [`crate::io::load_trace`]).
    ///
    /// # Arguments
    ///
    /// * `bytes`: The input byte array
    ///
    /// returns: Result<HierarchyResult, String>
    pub fn simulate(&mut self, bytes: &[u8]) -> Result<HierarchyResult, String> {
        if bytes.len() % RECORD_SIZE != 0 {
            return Err(format!(
                "trace length {} is not a multiple of the {RECORD_SIZE}-byte record size",
                bytes.len()
            ));
        }
        let start = Instant::now();
        for record in bytes.chunks_exact(RECORD_SIZE) {
            let ty = match record[KIND_OFFSET] {
                b'F' => AccessType::Fetch,
                b'L' => AccessType::Load,
                b'S' => AccessType::Store,
                _ => continue,
            };
            let pc = parse_address((&record[PC_OFFSET..PC_UPPER]).try_into().unwrap());
            let addr = parse_address((&record[ADDR_OFFSET..ADDR_UPPER]).try_into().unwrap());
            let size = parse_size((&record[SIZE_OFFSET..SIZE_UPPER]).try_into().unwrap());
            self.proc.set_pc(pc);
            match ty {
                AccessType::Fetch => {
                    if let Some(ic) = &mut self.icache {
                        ic.trace(addr, size as u64, ty);
                    }
                }
                AccessType::Load | AccessType::Store => {
                    if let Some(dc) = &mut self.dcache {
                        dc.trace(addr, size as u64, ty);
                    }
                }
            }
        }
        self.simulation_time += start.elapsed();
        Ok(self.result())
    }

    /// Snapshot of every cache's counters, first level first
    pub fn result(&self) -> HierarchyResult {
        let mut caches = Vec::new();
        if let Some(ic) = &self.icache {
            caches.push(ic.stats());
        }
        if let Some(dc) = &self.dcache {
            caches.push(dc.stats());
        }
        if let Some(l2) = &self.l2 {
            caches.push(l2.borrow().stats());
        }
        HierarchyResult { caches }
    }

    /// Gets the accumulated wall-clock time spent replaying records
    pub fn get_execution_time(&self) -> &Duration {
        &self.simulation_time
    }
}

/// Parses a 64-bit value from a 16 byte hexadecimal field.
///
/// Parsing with the standard library becomes the bottleneck for small cache
/// configurations, so this uses a lookup table over byte *pairs*, generated
/// by the build script. Only a small, largely sequential fraction of the
/// 64 KiB table is ever touched for well-formed input.
///
/// Non-hex bytes are not rejected and read as zero nibbles. Guaranteed not
/// to panic, but garbage in, garbage out; the debug cross-check against the
/// standard library parser only runs on input that parser accepts.
///
/// # Examples
///
/// ```
/// use hierlib::simulator::parse_address;
/// assert_eq!(parse_address(b"000000000000000a"), 10);
/// assert_eq!(parse_address(b"00000000deadbeef"), 0xdead_beef);
/// ```
pub fn parse_address(buf: &[u8; 16]) -> u64 {
    let mut res: u64 = 0;
    let mut i = 0;
    while i < 16 {
        res <<= 8;
        res |= HEX_PAIRS[(buf[i] as usize) << 8 | buf[i + 1] as usize] as u64;
        i += 2;
    }
    debug_assert!(std::str::from_utf8(buf)
        .ok()
        .and_then(|text| u64::from_str_radix(text, 16).ok())
        .map_or(true, |reference| reference == res));
    res
}

/// Parses the 3-digit decimal size field.
///
/// Exists for the same reason as [`parse_address`]; plain multiplication is
/// enough at this width. The digit conversion wraps rather than checks, so
/// a non-digit byte misparses instead of panicking.
///
/// # Examples
///
/// ```
/// use hierlib::simulator::parse_size;
/// assert_eq!(parse_size(b"010"), 10);
/// assert_eq!(parse_size(b"999"), 999);
/// ```
pub fn parse_size(buf: &[u8; 3]) -> u16 {
    let res = buf[2].wrapping_sub(b'0') as u16
        + 10 * buf[1].wrapping_sub(b'0') as u16
        + 100 * buf[0].wrapping_sub(b'0') as u16;
    debug_assert!(std::str::from_utf8(buf)
        .ok()
        .and_then(|text| text.parse::<u16>().ok())
        .map_or(true, |reference| reference == res));
    res
}

/// Appends one trace record to `out`. The inverse of the record parsing in
/// [`Simulator::simulate`]; handy for generating traces in tests and
/// benchmarks.
pub fn write_record(out: &mut Vec<u8>, ty: AccessType, pc: u64, addr: u64, bytes: u16) {
    debug_assert!(bytes <= 999);
    let kind = match ty {
        AccessType::Fetch => 'F',
        AccessType::Load => 'L',
        AccessType::Store => 'S',
    };
    out.extend_from_slice(format!("{kind} {pc:016x} {addr:016x} {bytes:03}\n").as_bytes());
}
