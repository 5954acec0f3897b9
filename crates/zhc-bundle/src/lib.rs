//! # zhc-bundle — clang-compatible offload-bundle writer
//!
//! Emits the binary container that HIP runtimes and clang's
//! `clang-offload-bundler` understand:
//!
//! ```text
//! magic          "__CLANG_OFFLOAD_BUNDLE__"      24 bytes
//! num_entries    little-endian u64
//! per entry:
//!   payload_off  little-endian u64
//!   payload_len  little-endian u64
//!   id_len       little-endian u64
//!   id           id_len bytes (ASCII)
//! zero-padding up to the bundle alignment
//! per entry:    code-object bytes, zero-padded up to the bundle alignment
//! ```
//!
//! Entry ids follow the `<kind>-<arch>-<vendor>-<os>[-<abi>]-<cpu>` shape
//! with optional `:<feature>+` suffixes; see [`EntryId`].

use std::fmt;

/// Result type for bundle operations.
pub type Result<T> = std::result::Result<T, BundleError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BundleError {
    /// No LLVM processor name exists for the requested CPU model, so no
    /// entry id can be synthesised.
    #[error("unsupported offload target: no LLVM name for cpu model `{0}`")]
    UnsupportedTarget(String),

    #[error("offload bundle has no entries")]
    EmptyBundle,
}

/// Container magic, 24 bytes.
pub const OFFLOAD_BUNDLE_MAGIC: &[u8; 24] = b"__CLANG_OFFLOAD_BUNDLE__";

/// Default placement alignment for bundle payloads.
pub const DEFAULT_BUNDLE_ALIGNMENT: u64 = 4096;

// ================================================================================================
// Entry ids
// ================================================================================================

/// Offload kind of one bundle entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffloadKind {
    Host,
    Hip,
    Hipv4,
    Openmp,
}

impl fmt::Display for OffloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffloadKind::Host => write!(f, "host"),
            OffloadKind::Hip => write!(f, "hip"),
            OffloadKind::Hipv4 => write!(f, "hipv4"),
            OffloadKind::Openmp => write!(f, "openmp"),
        }
    }
}

/// Target operating environment of one bundle entry; decides the vendor
/// component of the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetOs {
    Amdhsa,
    Amdpal,
    Other,
}

impl TargetOs {
    fn name(self) -> &'static str {
        match self {
            TargetOs::Amdhsa => "amdhsa",
            TargetOs::Amdpal => "amdpal",
            TargetOs::Other => "unknown",
        }
    }

    fn vendor(self) -> &'static str {
        match self {
            TargetOs::Amdhsa | TargetOs::Amdpal => "amd",
            TargetOs::Other => "unknown",
        }
    }
}

/// One bundle entry id: offload kind plus target description.
///
/// Renders as `<kind>-<arch>-<vendor>-<os>[-<abi>]-<cpu>` followed by one
/// `:<feature>+` group per explicitly enabled LLVM feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryId {
    pub kind: OffloadKind,
    pub arch: String,
    pub os: TargetOs,
    pub abi: Option<String>,
    pub cpu: String,
    pub features: Vec<String>,
}

impl EntryId {
    /// Build an entry id. `cpu` is the LLVM processor name; a model with no
    /// LLVM name cannot appear in a bundle.
    pub fn new(
        kind: OffloadKind,
        arch: impl Into<String>,
        os: TargetOs,
        abi: Option<String>,
        cpu: Option<&str>,
        features: Vec<String>,
    ) -> Result<Self> {
        let arch = arch.into();
        let cpu = cpu.ok_or_else(|| BundleError::UnsupportedTarget(format!("{}-{}", arch, os.name())))?;
        Ok(EntryId {
            kind,
            arch,
            os,
            abi,
            cpu: cpu.to_string(),
            features,
        })
    }

    /// The placeholder entry every HIP fat binary must lead with.
    pub fn host_placeholder(arch: impl Into<String>, os: impl Into<String>) -> Self {
        EntryId {
            kind: OffloadKind::Host,
            arch: arch.into(),
            os: TargetOs::Other,
            abi: Some(os.into()),
            cpu: String::new(),
            features: Vec::new(),
        }
    }

    /// Parse an `amdhsa.target` string such as
    /// `amdgcn-amd-amdhsa--gfx90a:sramecc+:xnack-` into a `hipv4` entry id.
    pub fn from_hsa_target(target: &str) -> Result<Self> {
        let (triple_cpu, feature_tail) = match target.split_once(':') {
            Some((head, tail)) => (head, Some(tail)),
            None => (target, None),
        };
        let parts: Vec<&str> = triple_cpu.split('-').collect();
        // arch-vendor-os[-abi]-cpu with an empty abi slot on HSA targets.
        if parts.len() < 4 {
            return Err(BundleError::UnsupportedTarget(target.to_string()));
        }
        let arch = parts[0];
        let os = match parts[2] {
            "amdhsa" => TargetOs::Amdhsa,
            "amdpal" => TargetOs::Amdpal,
            _ => TargetOs::Other,
        };
        let (abi, cpu) = if parts.len() >= 5 {
            (Some(parts[3].to_string()), parts[4])
        } else {
            (None, parts[3])
        };
        if cpu.is_empty() {
            return Err(BundleError::UnsupportedTarget(target.to_string()));
        }
        // Only explicitly enabled features are carried into the id.
        let features = feature_tail
            .into_iter()
            .flat_map(|tail| tail.split(':'))
            .filter_map(|feat| feat.strip_suffix('+'))
            .map(|feat| feat.to_string())
            .collect();
        Ok(EntryId {
            kind: OffloadKind::Hipv4,
            arch: arch.to_string(),
            os,
            abi,
            cpu: cpu.to_string(),
            features,
        })
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.kind, self.arch, self.os.vendor(), self.os.name())?;
        if let Some(abi) = &self.abi {
            write!(f, "-{abi}")?;
        }
        write!(f, "-{}", self.cpu)?;
        for feature in &self.features {
            write!(f, ":{feature}+")?;
        }
        Ok(())
    }
}

// ================================================================================================
// Writer
// ================================================================================================

/// One entry: an id string plus the code-object payload it carries.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    pub id: String,
    pub payload: Vec<u8>,
}

impl BundleEntry {
    pub fn new(id: impl Into<String>, payload: Vec<u8>) -> Self {
        BundleEntry {
            id: id.into(),
            payload,
        }
    }
}

/// Builds the container byte stream.
#[derive(Debug)]
pub struct OffloadBundleWriter {
    alignment: u64,
    entries: Vec<BundleEntry>,
}

impl Default for OffloadBundleWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl OffloadBundleWriter {
    pub fn new() -> Self {
        OffloadBundleWriter {
            alignment: DEFAULT_BUNDLE_ALIGNMENT,
            entries: Vec::new(),
        }
    }

    pub fn with_alignment(alignment: u64) -> Self {
        OffloadBundleWriter {
            alignment,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: BundleEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    /// Size of the header region: magic, count, and every entry record.
    ///
    /// Accumulated across entries, then the first payload is placed at this
    /// size rounded up to the alignment.
    pub fn header_size(&self) -> u64 {
        let mut size = OFFLOAD_BUNDLE_MAGIC.len() as u64 + 8;
        for entry in &self.entries {
            size += 3 * 8 + entry.id.len() as u64;
        }
        size
    }

    /// Emit the container.
    pub fn finish(&self) -> Result<Vec<u8>> {
        if self.entries.is_empty() {
            return Err(BundleError::EmptyBundle);
        }

        // First pass: place every payload.
        let mut offsets = Vec::with_capacity(self.entries.len());
        let mut cursor = align_up(self.header_size(), self.alignment);
        for entry in &self.entries {
            offsets.push(cursor);
            cursor = align_up(cursor + entry.payload.len() as u64, self.alignment);
        }
        let total = cursor;

        // Second pass: write header then payloads.
        let mut out = Vec::with_capacity(total as usize);
        out.extend_from_slice(OFFLOAD_BUNDLE_MAGIC);
        out.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        for (entry, &offset) in self.entries.iter().zip(&offsets) {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(entry.payload.len() as u64).to_le_bytes());
            out.extend_from_slice(&(entry.id.len() as u64).to_le_bytes());
            out.extend_from_slice(entry.id.as_bytes());
        }
        for (entry, &offset) in self.entries.iter().zip(&offsets) {
            out.resize(offset as usize, 0);
            out.extend_from_slice(&entry.payload);
        }
        out.resize(total as usize, 0);
        Ok(out)
    }
}

fn align_up(v: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (v + alignment - 1) & !(alignment - 1)
}

// ================================================================================================
// Tests
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u64(bytes: &[u8], off: usize) -> u64 {
        u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap())
    }

    #[test]
    fn test_entry_id_rendering() {
        let id = EntryId::new(
            OffloadKind::Hipv4,
            "amdgcn",
            TargetOs::Amdhsa,
            Some(String::new()),
            Some("gfx90a"),
            vec!["sramecc".to_string()],
        )
        .unwrap();
        assert_eq!(id.to_string(), "hipv4-amdgcn-amd-amdhsa--gfx90a:sramecc+");
    }

    #[test]
    fn test_entry_id_vendor_rules() {
        let pal = EntryId::new(OffloadKind::Hip, "amdgcn", TargetOs::Amdpal, None, Some("gfx1030"), vec![]).unwrap();
        assert_eq!(pal.to_string(), "hip-amdgcn-amd-amdpal-gfx1030");

        let other = EntryId::new(OffloadKind::Openmp, "nvptx64", TargetOs::Other, None, Some("sm_70"), vec![]).unwrap();
        assert_eq!(other.to_string(), "openmp-nvptx64-unknown-unknown-sm_70");
    }

    #[test]
    fn test_entry_id_requires_cpu_name() {
        let err = EntryId::new(OffloadKind::Hipv4, "amdgcn", TargetOs::Amdhsa, None, None, vec![]).unwrap_err();
        assert!(matches!(err, BundleError::UnsupportedTarget(_)));
    }

    #[test]
    fn test_host_placeholder_id() {
        let id = EntryId::host_placeholder("x86_64", "linux-gnu");
        assert_eq!(id.to_string(), "host-x86_64-unknown-unknown-linux-gnu-");
    }

    #[test]
    fn test_from_hsa_target() {
        let id = EntryId::from_hsa_target("amdgcn-amd-amdhsa--gfx90a:sramecc+:xnack-").unwrap();
        assert_eq!(id.kind, OffloadKind::Hipv4);
        assert_eq!(id.arch, "amdgcn");
        assert_eq!(id.os, TargetOs::Amdhsa);
        assert_eq!(id.abi.as_deref(), Some(""));
        assert_eq!(id.cpu, "gfx90a");
        // Only explicitly enabled features survive.
        assert_eq!(id.features, ["sramecc"]);
        assert_eq!(id.to_string(), "hipv4-amdgcn-amd-amdhsa--gfx90a:sramecc+");
    }

    #[test]
    fn test_from_hsa_target_rejects_garbage() {
        assert!(EntryId::from_hsa_target("amdgcn").is_err());
        assert!(EntryId::from_hsa_target("amdgcn-amd-amdhsa-").is_err());
    }

    #[test]
    fn test_bundle_layout() {
        let mut writer = OffloadBundleWriter::with_alignment(64);
        writer.push(BundleEntry::new("host-x86_64-unknown-unknown-", Vec::new()));
        writer.push(BundleEntry::new("hipv4-amdgcn-amd-amdhsa--gfx90a", vec![0xaa; 100]));
        writer.push(BundleEntry::new("hipv4-amdgcn-amd-amdhsa--gfx1030", vec![0xbb; 10]));
        let bytes = writer.finish().unwrap();

        assert!(bytes.starts_with(OFFLOAD_BUNDLE_MAGIC));
        assert_eq!(read_u64(&bytes, 24), 3);

        // Walk the entry table.
        let mut off = 32;
        let mut prev_end = 0u64;
        for expected_len in [0u64, 100, 10] {
            let payload_off = read_u64(&bytes, off);
            let payload_len = read_u64(&bytes, off + 8);
            let id_len = read_u64(&bytes, off + 16) as usize;
            assert_eq!(payload_len, expected_len);
            assert_eq!(payload_off % 64, 0, "payload must be aligned");
            assert!(payload_off >= prev_end);
            prev_end = payload_off + payload_len;
            off += 24 + id_len;
        }

        // Payload bytes land where the table says.
        let second_off = read_u64(&bytes, 32 + 24 + "host-x86_64-unknown-unknown-".len()) as usize;
        assert_eq!(&bytes[second_off..second_off + 100], &[0xaa; 100][..]);

        // Trailing padding completes the final alignment block.
        assert_eq!(bytes.len() % 64, 0);
    }

    #[test]
    fn test_header_size_accumulates_across_entries() {
        let mut writer = OffloadBundleWriter::new();
        writer.push(BundleEntry::new("ab", vec![]));
        writer.push(BundleEntry::new("cdef", vec![]));
        // magic + count + (24 + 2) + (24 + 4)
        assert_eq!(writer.header_size(), 24 + 8 + 26 + 28);
    }

    #[test]
    fn test_empty_bundle_rejected() {
        assert_eq!(OffloadBundleWriter::new().finish(), Err(BundleError::EmptyBundle));
    }
}
