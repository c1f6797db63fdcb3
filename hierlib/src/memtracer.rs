use std::rc::Rc;

use crate::cache::{CacheInterface, CacheModel, CacheStats, MissHandler};
use crate::processor::ProcessorState;

/// Classification of a traced memory access
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessType {
    Fetch,
    Load,
    Store,
}

/// Interface the instruction-set simulator drives: it classifies each access
/// and offers it to every tracer, which filters by type
pub trait MemTracer {
    /// Whether this tracer wants accesses of `ty` in the given address range
    fn interested_in_range(&self, begin: u64, end: u64, ty: AccessType) -> bool;

    /// Feeds one access to the tracer
    fn trace(&mut self, addr: u64, bytes: u64, ty: AccessType);
}

/// Instruction-cache tracer: models fetches, ignores data traffic
pub struct IcacheSim {
    cache: CacheModel,
}

impl IcacheSim {
    pub fn new(config: &str) -> Result<Self, String> {
        Ok(Self {
            cache: CacheModel::construct(config, "I$")?,
        })
    }

    pub fn set_miss_handler(&mut self, handler: MissHandler) {
        self.cache.set_miss_handler(handler);
    }

    pub fn set_log(&mut self, log: bool) {
        self.cache.set_log(log);
    }

    pub fn set_proc(&mut self, proc: Rc<ProcessorState>) {
        self.cache.set_proc(proc);
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl MemTracer for IcacheSim {
    fn interested_in_range(&self, _begin: u64, _end: u64, ty: AccessType) -> bool {
        ty == AccessType::Fetch
    }

    fn trace(&mut self, addr: u64, bytes: u64, ty: AccessType) {
        if ty == AccessType::Fetch {
            self.cache.access(addr, bytes, false);
        }
    }
}

/// Data-cache tracer: models loads and stores, ignores fetches
pub struct DcacheSim {
    cache: CacheModel,
}

impl DcacheSim {
    pub fn new(config: &str) -> Result<Self, String> {
        Ok(Self {
            cache: CacheModel::construct(config, "D$")?,
        })
    }

    pub fn set_miss_handler(&mut self, handler: MissHandler) {
        self.cache.set_miss_handler(handler);
    }

    pub fn set_log(&mut self, log: bool) {
        self.cache.set_log(log);
    }

    pub fn set_proc(&mut self, proc: Rc<ProcessorState>) {
        self.cache.set_proc(proc);
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl MemTracer for DcacheSim {
    fn interested_in_range(&self, _begin: u64, _end: u64, ty: AccessType) -> bool {
        ty == AccessType::Load || ty == AccessType::Store
    }

    fn trace(&mut self, addr: u64, bytes: u64, ty: AccessType) {
        if ty == AccessType::Load || ty == AccessType::Store {
            self.cache.access(addr, bytes, ty == AccessType::Store);
        }
    }
}
