//! Hawkeye replacement: a sampler reconstructs what Belady's optimal policy
//! would have done over a sliding window of recent accesses, the outcome
//! trains a pc-indexed predictor, and the predictor steers RRIP-style
//! victim selection in the real tag array.

use std::collections::BTreeMap;

use crate::cache::{CacheCore, VALID};
use crate::replacement_policies::ReplacementPolicy;

/// Length of the occupancy vector; one slot per time quantum in the window
const OPTGEN_VECTOR_SIZE: u64 = 128;
/// Per-set timer modulus. A multiple of the vector size, so the wrap
/// adjustment in the elapsed-time computation stays exact.
const TIMER_SIZE: u64 = 1024;
/// Lines at this RRPV are cache-averse and evicted first
const MAX_RRPV: u32 = 7;

/// Predictor table entries (2^11)
pub(crate) const SHCT_SIZE: u64 = 1 << 11;
const COUNTER_MAX: u8 = 7;
const COUNTER_INIT: u8 = (COUNTER_MAX + 1) / 2;

/// Reflected CRC-32 over the low word, the predictor's pc hash
pub(crate) fn crc_hash(value: u64) -> u64 {
    const POLYNOMIAL: u64 = 0xEDB8_8320;
    let mut hash = value;
    for _ in 0..32 {
        hash = if hash & 1 == 1 {
            (hash >> 1) ^ POLYNOMIAL
        } else {
            hash >> 1
        };
    }
    hash
}

/// Occupancy-vector reconstruction of Belady's optimal decision for one set.
///
/// Each slot counts how many live usage intervals span that quantum. A line
/// would have been kept by the optimal policy iff every slot between its
/// last use and now is still under capacity.
pub struct OptGen {
    occupancy: Vec<u32>,
    capacity: u64,
    accesses: u64,
    opt_hits: u64,
    opt_misses: u64,
}

impl OptGen {
    pub fn new(capacity: u64) -> Self {
        Self {
            occupancy: vec![0; OPTGEN_VECTOR_SIZE as usize],
            capacity,
            accesses: 0,
            opt_hits: 0,
            opt_misses: 0,
        }
    }

    /// Records a demand access at `quantum`, opening a new usage interval
    pub fn add_access(&mut self, quantum: u64) {
        self.accesses += 1;
        self.occupancy[(quantum % OPTGEN_VECTOR_SIZE) as usize] = 0;
    }

    /// Whether the optimal policy would have kept a line last referenced at
    /// `last_quanta` until `curr_quanta`. On yes, the interval is committed
    /// into the occupancy vector.
    pub fn should_cache(&mut self, curr_quanta: u64, last_quanta: u64) -> bool {
        let mut fits = true;
        let mut i = last_quanta;
        while i != curr_quanta {
            if self.occupancy[i as usize] as u64 >= self.capacity {
                fits = false;
                break;
            }
            i = (i + 1) % OPTGEN_VECTOR_SIZE;
        }
        if fits {
            self.opt_hits += 1;
            let mut i = last_quanta;
            while i != curr_quanta {
                self.occupancy[i as usize] += 1;
                i = (i + 1) % OPTGEN_VECTOR_SIZE;
            }
        } else {
            self.opt_misses += 1;
        }
        fits
    }

    pub fn accesses(&self) -> u64 {
        self.accesses
    }

    /// Accesses the optimal policy would have hit on
    pub fn opt_hits(&self) -> u64 {
        self.opt_hits
    }

    pub fn opt_misses(&self) -> u64 {
        self.opt_misses
    }
}

/// Table of 3-bit saturating counters keyed by hashed pc.
///
/// Counters start at the midpoint, so an unseen pc predicts cache-friendly.
pub struct PcPredictor {
    table: Vec<u8>,
}

impl PcPredictor {
    pub fn new() -> Self {
        Self {
            table: vec![COUNTER_INIT; SHCT_SIZE as usize],
        }
    }

    fn signature(pc: u64) -> usize {
        (crc_hash(pc) % SHCT_SIZE) as usize
    }

    pub fn increment(&mut self, pc: u64) {
        let counter = &mut self.table[Self::signature(pc)];
        if *counter < COUNTER_MAX {
            *counter += 1;
        }
    }

    pub fn decrement(&mut self, pc: u64) {
        let counter = &mut self.table[Self::signature(pc)];
        if *counter > 0 {
            *counter -= 1;
        }
    }

    /// True when the pc's loads have been worth caching
    pub fn get_prediction(&self, pc: u64) -> bool {
        self.table[Self::signature(pc)] >= (COUNTER_MAX + 1) / 2
    }
}

impl Default for PcPredictor {
    fn default() -> Self {
        Self::new()
    }
}

/// One sampled line: when it was last referenced, by which pc, what the
/// predictor said, and its position in the sampler's LRU order
struct SamplerEntry {
    last_quanta: u64,
    pc: u64,
    prediction: bool,
    lru: u64,
}

/// The Hawkeye policy state: RRPV and installing-pc per real line, plus a
/// per-set sampler, timer, and OPTgen instance feeding one shared predictor
pub struct Hawkeye {
    rrpv: Vec<u32>,
    signatures: Vec<u64>,
    optgen: Vec<OptGen>,
    timers: Vec<u64>,
    predictor: PcPredictor,
    samplers: Vec<BTreeMap<u64, SamplerEntry>>,
}

impl Hawkeye {
    pub fn new(sets: u64, ways: u64) -> Self {
        Self {
            rrpv: vec![MAX_RRPV; (sets * ways) as usize],
            signatures: vec![0; (sets * ways) as usize],
            // OPTgen models a cache two ways short of the real associativity;
            // the subtraction wraps for degenerate single-way configurations,
            // which disables the capacity check entirely
            optgen: (0..sets).map(|_| OptGen::new(ways.wrapping_sub(2))).collect(),
            timers: vec![0; sets as usize],
            predictor: PcPredictor::new(),
            samplers: (0..sets).map(|_| BTreeMap::new()).collect(),
        }
    }

    pub fn predictor(&self) -> &PcPredictor {
        &self.predictor
    }

    pub fn optgen(&self, set: usize) -> &OptGen {
        &self.optgen[set]
    }

    /// The prediction recorded for a sampled line, keyed the way the sampler
    /// keys lines (`(addr >> idx_shift) | VALID`). None if the line has
    /// fallen out of the sampler.
    pub fn sampled_prediction(&self, set: usize, sampler_tag: u64) -> Option<bool> {
        self.samplers[set].get(&sampler_tag).map(|entry| entry.prediction)
    }

    /// Ages every sampler entry that sat below the promoted entry's old
    /// LRU position
    fn age_below(&mut self, set: usize, old_lru: u64) {
        for entry in self.samplers[set].values_mut() {
            if entry.lru < old_lru {
                entry.lru += 1;
            }
        }
    }

    /// Drops the least recently referenced sampled line
    fn evict_sampler_lru(&mut self, set: usize, ways: u64) {
        let lru_tag = self.samplers[set]
            .iter()
            .find(|(_, entry)| entry.lru == ways - 1)
            .map(|(tag, _)| *tag);
        if let Some(tag) = lru_tag {
            self.samplers[set].remove(&tag);
        }
    }
}

impl ReplacementPolicy for Hawkeye {
    /// Every lookup doubles as a sampler update: replay the line's usage
    /// interval through OPTgen, train the predictor on the outcome, restamp
    /// the sampler entry, and refresh the resident line's RRPV from the
    /// current prediction.
    fn check_tag<'a>(&'a mut self, core: &'a mut CacheCore, addr: u64) -> Option<&'a mut u64> {
        let set = ((addr >> core.idx_shift) & (core.sets - 1)) as usize;
        let ways = core.ways;
        let pc = core.pc();

        let curr_quanta = self.timers[set] % OPTGEN_VECTOR_SIZE;
        let sampler_tag = (addr >> core.idx_shift) | VALID;

        if let Some(entry) = self.samplers[set].get(&sampler_tag) {
            // Seen before: judge the interval since its last use
            let (entry_quanta, entry_pc, entry_lru) = (entry.last_quanta, entry.pc, entry.lru);
            let mut curr_timer = self.timers[set];
            if curr_timer < entry_quanta {
                curr_timer += TIMER_SIZE;
            }
            let wrapped = curr_timer - entry_quanta > OPTGEN_VECTOR_SIZE;
            let last_quanta = entry_quanta % OPTGEN_VECTOR_SIZE;
            if !wrapped && self.optgen[set].should_cache(curr_quanta, last_quanta) {
                self.predictor.increment(entry_pc);
            } else {
                self.predictor.decrement(entry_pc);
            }
            self.optgen[set].add_access(curr_quanta);
            self.age_below(set, entry_lru);
        } else {
            // First sighting; make room in the sampler if it is at capacity
            if self.samplers[set].len() as u64 == ways {
                self.evict_sampler_lru(set, ways);
            }
            self.samplers[set].insert(
                sampler_tag,
                SamplerEntry {
                    last_quanta: curr_quanta,
                    pc: 0,
                    prediction: false,
                    lru: 0,
                },
            );
            self.optgen[set].add_access(curr_quanta);
            self.age_below(set, ways - 1);
        }

        let new_prediction = self.predictor.get_prediction(pc);
        let entry = self.samplers[set].get_mut(&sampler_tag).unwrap();
        entry.last_quanta = self.timers[set];
        entry.pc = pc;
        entry.prediction = new_prediction;
        entry.lru = 0;
        self.timers[set] = (self.timers[set] + 1) % TIMER_SIZE;

        // If the line is resident, restamp it with the fresh prediction
        if let Some(way) = core.find_way(addr) {
            let slot = set * ways as usize + way;
            self.signatures[slot] = pc;
            self.rrpv[slot] = if new_prediction { 0 } else { MAX_RRPV };
        }

        core.check_tag(addr)
    }

    fn victimize(&mut self, core: &mut CacheCore, addr: u64) -> u64 {
        let set = ((addr >> core.idx_shift) & (core.sets - 1)) as usize;
        let ways = core.ways as usize;
        let base = set * ways;

        // A cache-averse line goes first, lowest way wins; nothing to
        // retrain on this path
        for way in 0..ways {
            if self.rrpv[base + way] == MAX_RRPV {
                return core.install(way, addr);
            }
        }

        // No cache-averse line: evict the oldest cache-friendly one
        let mut max_rrpv = 0;
        let mut lru_victim = 0;
        for way in 0..ways {
            if self.rrpv[base + way] >= max_rrpv {
                max_rrpv = self.rrpv[base + way];
                lru_victim = way;
            }
        }

        let victim = core.install(lru_victim, addr);

        let pc = core.pc();
        let new_prediction = self.predictor.get_prediction(pc);
        let old_signature = self.signatures[base + lru_victim];
        self.signatures[base + lru_victim] = pc;

        if !new_prediction {
            self.rrpv[base + lru_victim] = MAX_RRPV;
        } else {
            self.rrpv[base + lru_victim] = 0;
            let saturated = (0..ways).any(|way| self.rrpv[base + way] == MAX_RRPV - 1);
            if !saturated {
                // Age the cache-friendly lines
                for way in 0..ways {
                    if self.rrpv[base + way] < MAX_RRPV - 1 {
                        self.rrpv[base + way] += 1;
                    }
                }
            }
            self.rrpv[base + lru_victim] = 0;
        }

        // Evicting a line the predictor liked is evidence against the pc
        // that installed it
        self.predictor.decrement(old_signature);

        victim
    }
}
