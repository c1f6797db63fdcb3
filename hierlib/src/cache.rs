use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::config::{Geometry, PolicyKind};
use crate::hawkeye::Hawkeye;
use crate::processor::ProcessorState;
use crate::replacement_policies::{
    FullyAssociative, LinearEvict, RandomEvict, ReplacementPolicy,
};

/// Tag-word bit marking a slot as holding a line
pub const VALID: u64 = 1 << 63;
/// Tag-word bit marking a held line as modified since install
pub const DIRTY: u64 = 1 << 62;

/// Next cache in the miss chain. Shared rather than owned because both L1
/// models forward to a single L2; the chain itself is acyclic.
pub type MissHandler = Rc<RefCell<CacheModel>>;

/// A generic trait for the cache models
///
/// Technically not required as we're using static dispatch through
/// [`CacheModel`] to speed things up instead of dyn dispatch, but this gives
/// flexibility for the future with no overhead
pub trait CacheInterface {
    /// Runs one memory access through the model, updating counters, the tag
    /// array, and any policy state, and cascading misses to the miss
    /// handler. Fully synchronous; returns once the whole cascade is done.
    fn access(&mut self, addr: u64, bytes: u64, store: bool);

    /// Attaches the next cache in the chain. Dirty victims are forwarded to
    /// it as stores, refills as reads.
    fn set_miss_handler(&mut self, handler: MissHandler);

    /// When enabled, each miss writes one line to stderr
    fn set_log(&mut self, log: bool);

    /// Hands the model a view of the processor. Only consulted by the
    /// Hawkeye policy, which reads the current pc on every lookup.
    fn set_proc(&mut self, proc: Rc<ProcessorState>);

    /// Snapshot of the performance counters
    fn stats(&self) -> CacheStats;

    /// Writes the fixed-format statistics report, or nothing if the cache
    /// was never accessed
    fn write_report(&self, out: &mut dyn Write) -> io::Result<()>;
}

/// State shared by every cache model: the geometry, the tag array, the
/// performance counters, and the hierarchy hooks.
///
/// One 64-bit word encodes a line: bit 63 VALID, bit 62 DIRTY, and the rest
/// `line_addr >> idx_shift`. Storing the shifted address (rather than the
/// tag field alone) keeps zero as the empty sentinel, so a cleared slot can
/// never match a lookup.
pub struct CacheCore {
    pub(crate) sets: u64,
    pub(crate) ways: u64,
    pub(crate) linesz: u64,
    pub(crate) idx_shift: u32,
    pub(crate) tags: Vec<u64>,
    pub(crate) read_accesses: u64,
    pub(crate) read_misses: u64,
    pub(crate) bytes_read: u64,
    pub(crate) write_accesses: u64,
    pub(crate) write_misses: u64,
    pub(crate) bytes_written: u64,
    pub(crate) writebacks: u64,
    pub(crate) name: String,
    pub(crate) log: bool,
    pub(crate) miss_handler: Option<MissHandler>,
    pub(crate) proc: Option<Rc<ProcessorState>>,
}

impl CacheCore {
    pub(crate) fn new(geometry: &Geometry, name: &str) -> Self {
        Self {
            sets: geometry.sets,
            ways: geometry.ways,
            linesz: geometry.linesz,
            idx_shift: geometry.linesz.trailing_zeros(),
            tags: vec![0; (geometry.sets * geometry.ways) as usize],
            read_accesses: 0,
            read_misses: 0,
            bytes_read: 0,
            write_accesses: 0,
            write_misses: 0,
            bytes_written: 0,
            writebacks: 0,
            name: name.to_string(),
            log: false,
            miss_handler: None,
            proc: None,
        }
    }

    /// Scans the set `addr` maps to for a matching line.
    ///
    /// The comparison value carries VALID and the comparison masks DIRTY, so
    /// empty slots never match and modified lines still do.
    pub(crate) fn check_tag(&mut self, addr: u64) -> Option<&mut u64> {
        let set = ((addr >> self.idx_shift) & (self.sets - 1)) as usize;
        let tag = (addr >> self.idx_shift) | VALID;
        let base = set * self.ways as usize;
        self.tags[base..base + self.ways as usize]
            .iter_mut()
            .find(|slot| tag == **slot & !DIRTY)
    }

    /// Index of the way currently holding `addr`'s line, if resident
    pub(crate) fn find_way(&self, addr: u64) -> Option<usize> {
        let set = ((addr >> self.idx_shift) & (self.sets - 1)) as usize;
        let tag = (addr >> self.idx_shift) | VALID;
        let base = set * self.ways as usize;
        (0..self.ways as usize).find(|&way| tag == self.tags[base + way] & !DIRTY)
    }

    /// Fills the given way of `addr`'s set with `addr`'s line (DIRTY clear)
    /// and returns the previous tag word
    pub(crate) fn install(&mut self, way: usize, addr: u64) -> u64 {
        let set = ((addr >> self.idx_shift) & (self.sets - 1)) as usize;
        let slot = &mut self.tags[set * self.ways as usize + way];
        let victim = *slot;
        *slot = (addr >> self.idx_shift) | VALID;
        victim
    }

    /// Current pc, from the processor handle. Policies that need this must
    /// only be driven through a simulator that attached one.
    pub(crate) fn pc(&self) -> u64 {
        self.proc
            .as_ref()
            .expect("this replacement policy needs a processor handle; call set_proc first")
            .pc()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
            read_accesses: self.read_accesses,
            write_accesses: self.write_accesses,
            read_misses: self.read_misses,
            write_misses: self.write_misses,
            writebacks: self.writebacks,
        }
    }

    fn write_report(&self, out: &mut dyn Write) -> io::Result<()> {
        self.stats().write_report(out)
    }
}

impl Drop for CacheCore {
    fn drop(&mut self) {
        let _ = self.write_report(&mut io::stdout().lock());
    }
}

pub(crate) fn format_miss(name: &str, store: bool, addr: u64) -> String {
    let mode = if store { "write" } else { "read" };
    format!("{name} {mode} miss 0x{addr:x}")
}

/// Counter snapshot for one cache. Serialises to the JSON result format.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CacheStats {
    pub name: String,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_accesses: u64,
    pub write_accesses: u64,
    pub read_misses: u64,
    pub write_misses: u64,
    pub writebacks: u64,
}

impl CacheStats {
    /// Total misses over total accesses, as a percentage. Zero for an
    /// untouched cache.
    pub fn miss_rate(&self) -> f64 {
        let accesses = self.read_accesses + self.write_accesses;
        if accesses == 0 {
            return 0.0;
        }
        100.0 * (self.read_misses + self.write_misses) as f64 / accesses as f64
    }

    /// Writes the eight-line fixed-format report, or nothing if the cache
    /// was never accessed
    pub fn write_report(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.read_accesses + self.write_accesses == 0 {
            return Ok(());
        }
        writeln!(out, "{} Bytes Read:            {}", self.name, self.bytes_read)?;
        writeln!(out, "{} Bytes Written:         {}", self.name, self.bytes_written)?;
        writeln!(out, "{} Read Accesses:         {}", self.name, self.read_accesses)?;
        writeln!(out, "{} Write Accesses:        {}", self.name, self.write_accesses)?;
        writeln!(out, "{} Read Misses:           {}", self.name, self.read_misses)?;
        writeln!(out, "{} Write Misses:          {}", self.name, self.write_misses)?;
        writeln!(out, "{} Writebacks:            {}", self.name, self.writebacks)?;
        writeln!(out, "{} Miss Rate:             {:.3}%", self.name, self.miss_rate())
    }
}

/// A cache model parameterised by a replacement policy
///
/// The policy supplies `check_tag` and `victimize`; the counters, the
/// hit/miss decision, and the dirty-writeback and refill cascade are this
/// shared skeleton. Monomorphisation keeps the policy calls direct, which
/// matters because every trace record funnels through `access`.
pub struct CacheSim<P: ReplacementPolicy> {
    core: CacheCore,
    policy: P,
}

impl<P: ReplacementPolicy> CacheSim<P> {
    pub fn new(geometry: &Geometry, name: &str, policy: P) -> Self {
        Self {
            core: CacheCore::new(geometry, name),
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }
}

impl<P: ReplacementPolicy> CacheInterface for CacheSim<P> {
    fn access(&mut self, addr: u64, bytes: u64, store: bool) {
        if store {
            self.core.write_accesses += 1;
            self.core.bytes_written += bytes;
        } else {
            self.core.read_accesses += 1;
            self.core.bytes_read += bytes;
        }

        if let Some(hit) = self.policy.check_tag(&mut self.core, addr) {
            if store {
                *hit |= DIRTY;
            }
            return;
        }

        if store {
            self.core.write_misses += 1;
        } else {
            self.core.read_misses += 1;
        }
        if self.core.log {
            eprintln!("{}", format_miss(&self.core.name, store, addr));
        }

        let victim = self.policy.victimize(&mut self.core, addr);

        if victim & (VALID | DIRTY) == (VALID | DIRTY) {
            let dirty_addr = (victim & !(VALID | DIRTY)) << self.core.idx_shift;
            if let Some(handler) = &self.core.miss_handler {
                handler.borrow_mut().access(dirty_addr, self.core.linesz, true);
            }
            self.core.writebacks += 1;
        }

        if let Some(handler) = &self.core.miss_handler {
            handler
                .borrow_mut()
                .access(addr & !(self.core.linesz - 1), self.core.linesz, false);
        }

        // Mark the freshly installed line by looking it up again; for
        // policies with lookup-time bookkeeping the second pass counts as
        // another observation of the line
        if store {
            if let Some(slot) = self.policy.check_tag(&mut self.core, addr) {
                *slot |= DIRTY;
            }
        }
    }

    fn set_miss_handler(&mut self, handler: MissHandler) {
        self.core.miss_handler = Some(handler);
    }

    fn set_log(&mut self, log: bool) {
        self.core.log = log;
    }

    fn set_proc(&mut self, proc: Rc<ProcessorState>) {
        self.core.proc = Some(proc);
    }

    fn stats(&self) -> CacheStats {
        self.core.stats()
    }

    fn write_report(&self, out: &mut dyn Write) -> io::Result<()> {
        self.core.write_report(out)
    }
}

/// Enum over the four provided cache models
///
/// Using trait objects here would be less boilerplate, but the per-record
/// dereference is opaque to the compiler; branching on concrete types keeps
/// the policy calls inlinable
pub enum CacheModel {
    Random(CacheSim<RandomEvict>),
    Linear(CacheSim<LinearEvict>),
    FullyAssociative(CacheSim<FullyAssociative>),
    Hawkeye(CacheSim<Hawkeye>),
}

impl CacheModel {
    /// Builds a cache from a `sets:ways:linesz[:policy]` configuration
    /// string. A malformed string yields the usage message as the error.
    pub fn construct(config: &str, name: &str) -> Result<Self, String> {
        let geometry: Geometry = config.parse()?;
        Ok(Self::from_geometry(&geometry, name))
    }

    /// Model selection: an explicit policy token wins; otherwise single-set
    /// caches with more than four ways get the map-based fully-associative
    /// model (empirical threshold), and everything else random replacement.
    pub fn from_geometry(geometry: &Geometry, name: &str) -> Self {
        match geometry.policy {
            PolicyKind::Linear => {
                CacheSim::new(geometry, name, LinearEvict::new(geometry.sets)).into()
            }
            PolicyKind::Hawkeye => {
                CacheSim::new(geometry, name, Hawkeye::new(geometry.sets, geometry.ways)).into()
            }
            PolicyKind::Default if geometry.ways > 4 && geometry.sets == 1 => {
                CacheSim::new(geometry, name, FullyAssociative::new()).into()
            }
            PolicyKind::Default => CacheSim::new(geometry, name, RandomEvict::new()).into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CacheModel::Random(c) => c.name(),
            CacheModel::Linear(c) => c.name(),
            CacheModel::FullyAssociative(c) => c.name(),
            CacheModel::Hawkeye(c) => c.name(),
        }
    }
}

impl From<CacheSim<RandomEvict>> for CacheModel {
    fn from(value: CacheSim<RandomEvict>) -> Self {
        Self::Random(value)
    }
}

impl From<CacheSim<LinearEvict>> for CacheModel {
    fn from(value: CacheSim<LinearEvict>) -> Self {
        Self::Linear(value)
    }
}

impl From<CacheSim<FullyAssociative>> for CacheModel {
    fn from(value: CacheSim<FullyAssociative>) -> Self {
        Self::FullyAssociative(value)
    }
}

impl From<CacheSim<Hawkeye>> for CacheModel {
    fn from(value: CacheSim<Hawkeye>) -> Self {
        Self::Hawkeye(value)
    }
}

impl CacheInterface for CacheModel {
    fn access(&mut self, addr: u64, bytes: u64, store: bool) {
        match self {
            CacheModel::Random(c) => c.access(addr, bytes, store),
            CacheModel::Linear(c) => c.access(addr, bytes, store),
            CacheModel::FullyAssociative(c) => c.access(addr, bytes, store),
            CacheModel::Hawkeye(c) => c.access(addr, bytes, store),
        }
    }

    fn set_miss_handler(&mut self, handler: MissHandler) {
        match self {
            CacheModel::Random(c) => c.set_miss_handler(handler),
            CacheModel::Linear(c) => c.set_miss_handler(handler),
            CacheModel::FullyAssociative(c) => c.set_miss_handler(handler),
            CacheModel::Hawkeye(c) => c.set_miss_handler(handler),
        }
    }

    fn set_log(&mut self, log: bool) {
        match self {
            CacheModel::Random(c) => c.set_log(log),
            CacheModel::Linear(c) => c.set_log(log),
            CacheModel::FullyAssociative(c) => c.set_log(log),
            CacheModel::Hawkeye(c) => c.set_log(log),
        }
    }

    fn set_proc(&mut self, proc: Rc<ProcessorState>) {
        match self {
            CacheModel::Random(c) => c.set_proc(proc),
            CacheModel::Linear(c) => c.set_proc(proc),
            CacheModel::FullyAssociative(c) => c.set_proc(proc),
            CacheModel::Hawkeye(c) => c.set_proc(proc),
        }
    }

    fn stats(&self) -> CacheStats {
        match self {
            CacheModel::Random(c) => c.stats(),
            CacheModel::Linear(c) => c.stats(),
            CacheModel::FullyAssociative(c) => c.stats(),
            CacheModel::Hawkeye(c) => c.stats(),
        }
    }

    fn write_report(&self, out: &mut dyn Write) -> io::Result<()> {
        match self {
            CacheModel::Random(c) => c.write_report(out),
            CacheModel::Linear(c) => c.write_report(out),
            CacheModel::FullyAssociative(c) => c.write_report(out),
            CacheModel::Hawkeye(c) => c.write_report(out),
        }
    }
}
