use std::cell::Cell;

/// The slice of processor state the cache models are allowed to see: the
/// program counter of the access currently being traced.
///
/// The simulator updates the value from each trace record while the caches
/// hold a shared handle, hence the interior mutability. Only the Hawkeye
/// policy ever reads it.
#[derive(Debug, Default)]
pub struct ProcessorState {
    pc: Cell<u64>,
}

impl ProcessorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pc(&self, pc: u64) {
        self.pc.set(pc);
    }

    pub fn pc(&self) -> u64 {
        self.pc.get()
    }
}
