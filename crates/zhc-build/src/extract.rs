//! Overload extraction from the host binary
//!
//! Walks the host object's symbol table and demangles every launch-site
//! reference into the [`OverloadSet`] the rest of the pipeline consumes. No
//! partial result escapes: a single malformed suffix aborts extraction.

use std::path::Path;

use zhc_abi::{demangle_config, Overload, OverloadSet, LAUNCH_SYMBOL_PREFIX};
use zhc_elf::Elf;
use zhc_tracing::debug;

use crate::error::{DriverError, Result};

/// Collect every required overload from a host object's symbol table.
///
/// Grouping is by kernel name in first-seen order; within a kernel,
/// overloads keep first-seen order and exact duplicates collapse. `origin`
/// only labels diagnostics.
pub fn extract_overloads(bytes: &[u8], origin: &Path) -> Result<OverloadSet> {
    let elf = Elf::parse(bytes).map_err(|err| DriverError::invalid_elf(origin, err))?;

    let mut set = OverloadSet::new();
    let mut collapsed = 0usize;
    for symbol in elf.symbols().map_err(|err| DriverError::invalid_elf(origin, err))? {
        let symbol = symbol.map_err(|err| DriverError::invalid_elf(origin, err))?;
        let Some(suffix) = symbol.name.strip_prefix(LAUNCH_SYMBOL_PREFIX) else {
            continue;
        };
        let config = demangle_config(suffix).map_err(|_| DriverError::InvalidMangledName {
            symbol: symbol.name.to_string(),
        })?;
        if !set.insert(config) {
            collapsed += 1;
        }
    }

    if collapsed > 0 {
        // Identical launch sites deduplicate silently; the count stays
        // observable for anyone revisiting that policy.
        debug!(collapsed, "collapsed duplicate launch-site symbols");
    }
    debug!(
        kernels = set.kernel_count(),
        overloads = set.overload_count(),
        host_object = %origin.display(),
        "extracted overload set"
    );
    Ok(set)
}

/// JSON rendering of an overload set, in extraction order, for diagnostics
/// and external tooling.
pub fn overload_set_json(set: &OverloadSet) -> serde_json::Result<String> {
    let entries: Vec<(&str, &[Overload])> = set.iter().collect();
    serde_json::to_string_pretty(&entries)
}
