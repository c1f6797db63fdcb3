use std::str::FromStr;

use serde::Deserialize;

/// The usage message produced for any malformed geometry string. The CLI
/// prints this to stderr and exits with status 1.
pub const USAGE: &str = "\
Cache configurations must be of the form
  sets:ways:linesz[:policy]
where sets, ways, and linesz are positive integers, with
sets and linesz both powers of two and linesz at least 8.";

/// Replacement policy selected by the optional fourth geometry field.
///
/// Unrecognised tokens fall back to `Default`, which picks the
/// fully-associative model for single-set caches with more than four ways
/// and the random-replacement model otherwise.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PolicyKind {
    Default,
    Linear,
    Hawkeye,
}

/// Parsed form of a `sets:ways:linesz[:policy]` configuration string
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub sets: u64,
    pub ways: u64,
    pub linesz: u64,
    pub policy: PolicyKind,
}

impl FromStr for Geometry {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut fields = input.splitn(4, ':');
        let sets = parse_field(fields.next())?;
        let ways = parse_field(fields.next())?;
        let linesz = parse_field(fields.next())?;
        let policy = match fields.next() {
            Some("linear") => PolicyKind::Linear,
            Some("hawkeye") => PolicyKind::Hawkeye,
            // Unknown policy tokens are ignored rather than rejected
            _ => PolicyKind::Default,
        };
        if sets == 0 || !sets.is_power_of_two() {
            return Err(USAGE.to_string());
        }
        if linesz < 8 || !linesz.is_power_of_two() {
            return Err(USAGE.to_string());
        }
        if ways == 0 {
            return Err(USAGE.to_string());
        }
        Ok(Self {
            sets,
            ways,
            linesz,
            policy,
        })
    }
}

fn parse_field(field: Option<&str>) -> Result<u64, String> {
    field
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| USAGE.to_string())
}

/// A cache hierarchy configuration, usually resulting from parsing JSON.
///
/// Each entry is a geometry string in the `sets:ways:linesz[:policy]`
/// grammar. The instruction and data caches both forward their misses to
/// the L2 when one is configured.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct HierarchyConfig {
    pub icache: Option<String>,
    pub dcache: Option<String>,
    pub l2: Option<String>,
    #[serde(default)]
    pub log: bool,
}
