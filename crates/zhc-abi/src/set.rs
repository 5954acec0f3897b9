//! Deduplicated, grouped collection of required overloads
//!
//! The `OverloadSet` is the contract between host scanning and device
//! compilation: every overload the host binary references, grouped by kernel
//! name. Insertion order is observable (first occurrence in the host symbol
//! table wins) and emission order is additionally sorted by kernel name so
//! identical inputs produce byte-identical generated modules.

use std::collections::HashMap;

use crate::mangle::mangle_config;
use crate::value::{Kernel, KernelConfig, Overload};

/// Mapping from kernel name to the ordered, deduplicated list of overloads
/// the host binary requires.
#[derive(Debug, Clone, Default)]
pub struct OverloadSet {
    kernels: Vec<KernelEntry>,
    by_name: HashMap<String, usize>,
    /// Mangled suffix → (kernel index, overload index); also the dedup set.
    by_suffix: HashMap<String, (usize, usize)>,
}

#[derive(Debug, Clone)]
struct KernelEntry {
    name: String,
    overloads: Vec<Overload>,
}

impl OverloadSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one launch configuration. Returns `false` when an identical
    /// configuration (same mangled suffix) was already present; first-seen
    /// order is preserved in that case.
    pub fn insert(&mut self, config: KernelConfig) -> bool {
        let suffix = mangle_config(&config);
        if self.by_suffix.contains_key(&suffix) {
            return false;
        }
        let kernel_idx = match self.by_name.get(&config.kernel.name) {
            Some(&idx) => idx,
            None => {
                let idx = self.kernels.len();
                self.by_name.insert(config.kernel.name.clone(), idx);
                self.kernels.push(KernelEntry {
                    name: config.kernel.name.clone(),
                    overloads: Vec::new(),
                });
                idx
            }
        };
        let entry = &mut self.kernels[kernel_idx];
        entry.overloads.push(config.overload);
        self.by_suffix.insert(suffix, (kernel_idx, entry.overloads.len() - 1));
        true
    }

    /// Number of distinct kernel names.
    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    /// Total number of distinct overloads across all kernels.
    pub fn overload_count(&self) -> usize {
        self.kernels.iter().map(|k| k.overloads.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Overloads of one kernel, in first-seen order.
    pub fn get(&self, kernel: &str) -> Option<&[Overload]> {
        self.by_name.get(kernel).map(|&idx| self.kernels[idx].overloads.as_slice())
    }

    /// Look an overload up by its mangled suffix (as read back from a device
    /// object's definition symbols).
    pub fn lookup_mangled(&self, suffix: &str) -> Option<(&str, &Overload)> {
        self.by_suffix.get(suffix).map(|&(k, o)| {
            let entry = &self.kernels[k];
            (entry.name.as_str(), &entry.overloads[o])
        })
    }

    /// Iterate kernels in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Overload])> {
        self.kernels.iter().map(|k| (k.name.as_str(), k.overloads.as_slice()))
    }

    /// Iterate kernels sorted stably by name: the emission order for
    /// generated modules, chosen so repeated builds with identical inputs
    /// produce byte-identical artefacts.
    pub fn iter_sorted(&self) -> impl Iterator<Item = (&str, &[Overload])> {
        let mut order: Vec<&KernelEntry> = self.kernels.iter().collect();
        order.sort_by(|a, b| a.name.cmp(&b.name));
        order.into_iter().map(|k| (k.name.as_str(), k.overloads.as_slice()))
    }

    /// Every configuration in the set, in emission order.
    pub fn configs_sorted(&self) -> Vec<KernelConfig> {
        self.iter_sorted()
            .flat_map(|(name, overloads)| {
                overloads
                    .iter()
                    .map(move |o| KernelConfig::new(Kernel::new(name), o.clone()))
            })
            .collect()
    }
}

// ================================================================================================
// Tests
// ================================================================================================
