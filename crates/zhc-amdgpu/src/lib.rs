//! # zhc-amdgpu — AMDGPU platform backend
//!
//! Reads per-kernel metadata out of a device object's `AMDGPU` note,
//! cross-references it against the overloads the host binary requires, and
//! produces the pieces of the offload library: the HIP offload bundle and
//! the generated wrapper that embeds it in the final linkable object.
//!
//! Layering:
//! - `metadata` — the msgpack schema of AMD HSA code-object metadata
//! - `fatbin` — embedding-stub generation and the host-compiler subprocess
//! - this module — the cross-referencing scan and bundle assembly

pub mod fatbin;
pub mod metadata;

use zhc_abi::{entry_point_params, KernelConfig, OverloadSet, DEFINE_SYMBOL_PREFIX};
use zhc_bundle::{BundleEntry, EntryId, OffloadBundleWriter};
use zhc_elf::{Elf, ElfError, EM_AMDGPU};
use zhc_msgpack::MsgpackError;
use zhc_tracing::{debug, warn};

pub use metadata::{ArgMetadata, CodeObjectMetadata, KernelMetadata, ValueKind};

/// Note type of the msgpack metadata blob (`NT_AMDGPU_METADATA`).
pub const NT_AMDGPU_METADATA: u64 = 32;

/// Note owner name of AMDGPU vendor notes.
pub const AMDGPU_NOTE_NAME: &[u8] = b"AMDGPU";

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, AmdgpuError>;

/// Errors raised while scanning a device object.
#[derive(Debug, thiserror::Error)]
pub enum AmdgpuError {
    #[error("invalid ELF object: {0}")]
    InvalidElf(#[from] ElfError),

    #[error("invalid AMDGPU metadata: {0}")]
    InvalidMetadata(#[from] MsgpackError),

    #[error("device object is not an AMDGPU object (e_machine {0})")]
    NotAmdgpu(u16),

    #[error("device object carries no AMDGPU metadata note")]
    MissingMetadataNote,

    #[error("unsupported AMDGPU metadata version {0}.{1} (need 1.0 or newer)")]
    UnsupportedMetadataVersion(u64, u64),

    #[error("device object metadata names no target")]
    MissingTarget,

    /// The overload set requires overloads no device kernel exports. The
    /// payload is one source-syntax line per missing overload.
    #[error("device code declares no kernel for:\n{}", .0.join("\n"))]
    MissingKernelDeclarations(Vec<String>),

    #[error(transparent)]
    Bundle(#[from] zhc_bundle::BundleError),
}

/// One requested overload resolved to its HSA symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelBinding {
    pub config: KernelConfig,
    /// The HSA kernel-descriptor symbol from the metadata.
    pub symbol: String,
}

/// The scan result for one device object.
#[derive(Debug, Clone)]
pub struct DeviceObjectInfo {
    /// HSA target string (`amdhsa.target`), used for the bundle entry id.
    pub target: String,
    /// Requested overloads found in the object, in metadata order.
    pub bindings: Vec<KernelBinding>,
}

/// Scan a device object and cross-reference it against the overload set.
///
/// Kernels in the object that the set never asked for are logged and
/// ignored; overloads the set requires but the object does not export are a
/// fatal, user-facing error listing every missing overload in source syntax.
pub fn scan_device_object(bytes: &[u8], overloads: &OverloadSet) -> Result<DeviceObjectInfo> {
    let elf = Elf::parse(bytes)?;
    if elf.machine() != EM_AMDGPU {
        return Err(AmdgpuError::NotAmdgpu(elf.machine()));
    }

    let mut metadata = None;
    for note in elf.notes()? {
        let note = note?;
        if note.name == AMDGPU_NOTE_NAME && note.note_type == NT_AMDGPU_METADATA {
            metadata = Some(CodeObjectMetadata::parse(note.desc)?);
            break;
        }
    }
    let metadata = metadata.ok_or(AmdgpuError::MissingMetadataNote)?;

    let [major, minor] = metadata.version;
    if major < 1 {
        return Err(AmdgpuError::UnsupportedMetadataVersion(major, minor));
    }
    let target = metadata.target.clone().ok_or(AmdgpuError::MissingTarget)?;

    let mut bindings = Vec::new();
    let mut satisfied = std::collections::HashSet::new();
    for kernel in &metadata.kernels {
        let Some(suffix) = kernel.name.strip_prefix(DEFINE_SYMBOL_PREFIX) else {
            debug!(kernel = %kernel.name, "ignoring non-zhc kernel in device object");
            continue;
        };
        let Some((kernel_name, overload)) = overloads.lookup_mangled(suffix) else {
            warn!(
                kernel = %kernel.name,
                "device object declares a kernel configuration the host never launches"
            );
            continue;
        };

        let config = KernelConfig::new(zhc_abi::Kernel::new(kernel_name), overload.clone());
        validate_kernarg_shape(kernel, &config);
        satisfied.insert(suffix.to_string());
        bindings.push(KernelBinding {
            config,
            symbol: kernel.symbol.clone(),
        });
    }

    // Every requested overload must be satisfied; report all misses at once.
    let missing: Vec<String> = overloads
        .configs_sorted()
        .into_iter()
        .filter(|config| !satisfied.contains(&zhc_abi::mangle_config(config)))
        .map(|config| format!("  {config}"))
        .collect();
    if !missing.is_empty() {
        return Err(AmdgpuError::MissingKernelDeclarations(missing));
    }

    debug!(
        target = %target,
        kernels = bindings.len(),
        "device object satisfies the requested overload set"
    );
    Ok(DeviceObjectInfo { target, bindings })
}

/// Compare the metadata's explicit argument count with the parameter list
/// the entry-point synthesis derives from the overload. A mismatch means the
/// device toolchain and the driver disagree about the calling convention;
/// that is worth a warning but the metadata stays authoritative.
fn validate_kernarg_shape(kernel: &KernelMetadata, config: &KernelConfig) {
    let Ok(params) = entry_point_params(&config.overload) else {
        return;
    };
    let explicit = kernel.explicit_args().count();
    if explicit != params.len() {
        warn!(
            kernel = %kernel.name,
            expected = params.len(),
            actual = explicit,
            "kernel argument metadata does not match the synthesised signature"
        );
    }
}

/// Assemble the HIP offload bundle for a set of scanned device objects.
///
/// The bundle always leads with an empty host placeholder entry; each device
/// object contributes one `hipv4` entry whose id is derived from its HSA
/// target string.
pub fn build_hip_bundle(
    host_arch: &str,
    host_os: &str,
    objects: &[(DeviceObjectInfo, Vec<u8>)],
) -> Result<Vec<u8>> {
    let mut writer = OffloadBundleWriter::new();
    writer.push(BundleEntry::new(
        EntryId::host_placeholder(host_arch, host_os).to_string(),
        Vec::new(),
    ));
    for (info, bytes) in objects {
        let id = EntryId::from_hsa_target(&info.target)?;
        writer.push(BundleEntry::new(id.to_string(), bytes.clone()));
    }
    Ok(writer.finish()?)
}

// ================================================================================================
// Tests
// ================================================================================================
