use std::fs::File;
use std::ops::Deref;

use regex::Regex;

use crate::simulator::RECORD_SIZE;

/// Loads a trace file as one contiguous byte slice.
///
/// On unix the file is memory mapped and the OS advised that reads will be
/// sequential, which measurably helps for multi-hundred-megabyte traces; on
/// other systems the whole file is read into memory.
pub fn load_trace(file: File) -> Result<impl Deref<Target = [u8]>, String> {
    #[cfg(not(unix))]
    {
        use std::io::Read;
        let mut file = file;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| format!("Couldn't read the trace file: {e}"))?;
        Ok(bytes)
    }
    #[cfg(unix)]
    {
        use memmap2::{Advice, Mmap};
        unsafe {
            let mapped = Mmap::map(&file).map_err(|e| format!("Couldn't memory map the file: {e}"))?;
            mapped
                .advise(Advice::Sequential)
                .map_err(|e| format!("Failed to provide access advice to the OS, {e}"))?;
            Ok(mapped)
        }
    }
}

/// Checks every record of a trace against the record grammar.
///
/// The simulator itself skips field validation on the hot path, so input of
/// dubious provenance should be run through this first.
pub fn validate_trace(bytes: &[u8]) -> Result<(), String> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(format!(
            "trace length {} is not a multiple of the {RECORD_SIZE}-byte record size",
            bytes.len()
        ));
    }
    let pattern = Regex::new(r"^[FLS] [0-9a-fA-F]{16} [0-9a-fA-F]{16} [0-9]{3}\n$").unwrap();
    for (number, record) in bytes.chunks_exact(RECORD_SIZE).enumerate() {
        let record = std::str::from_utf8(record)
            .map_err(|_| format!("record {number} is not valid ASCII"))?;
        if !pattern.is_match(record) {
            return Err(format!(
                "record {number} is malformed: {:?}",
                record.trim_end()
            ));
        }
    }
    Ok(())
}
