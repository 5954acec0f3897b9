//! Generated options module
//!
//! After extraction the driver writes a small source artefact that the
//! device-side compilation imports: the compilation side, the platform, and
//! every required overload keyed by kernel. Overloads are carried as their
//! mangled suffixes (with the demangled source syntax alongside as
//! comments), so re-parsing the module and mangling each overload reproduces
//! the byte-for-byte symbol seen in the host binary — the property the
//! device build depends on.

use std::fmt;

use zhc_abi::{demangle_config, mangle_config, Kernel, KernelConfig, Overload, OverloadSet};

use crate::error::{DriverError, Result};

/// Which compilation this module configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Host,
    Device,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Host => write!(f, "host"),
            Side::Device => write!(f, "device"),
        }
    }
}

/// Accelerator platform of the device compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Amdgpu,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Amdgpu => write!(f, "amdgpu"),
        }
    }
}

impl Platform {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "amdgpu" => Some(Platform::Amdgpu),
            _ => None,
        }
    }
}

/// Sanitise a kernel name into a source identifier for the per-kernel
/// constants.
pub fn sanitize_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if i == 0 && c.is_ascii_digit() {
                out.push('_');
            }
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Render the options module for one compilation.
///
/// Kernels appear in emission order (stably sorted by name) so identical
/// inputs produce byte-identical modules.
pub fn generate_options_module(set: &OverloadSet, side: Side, platform: Platform) -> String {
    let mut src = String::new();
    src.push_str("//! Kernel launch configurations extracted from the host binary.\n");
    src.push_str("//! Generated by zhc; do not edit.\n\n");
    src.push_str(&format!("pub const SIDE: &str = \"{side}\";\n"));
    if side == Side::Device {
        src.push_str(&format!("pub const PLATFORM: &str = \"{platform}\";\n"));
    }
    src.push('\n');

    src.push_str("/// Required overloads keyed by kernel name, as mangled suffixes.\n");
    src.push_str("pub static LAUNCH_CONFIGURATIONS: &[(&str, &[&str])] = &[\n");
    for (name, overloads) in set.iter_sorted() {
        src.push_str(&format!("    ({name:?}, &[\n"));
        for overload in overloads {
            let config = KernelConfig::new(Kernel::new(name), overload.clone());
            src.push_str(&format!("        \"{}\", // {config}\n", mangle_config(&config)));
        }
        src.push_str("    ]),\n");
    }
    src.push_str("];\n\n");

    src.push_str("#[allow(non_upper_case_globals)]\n");
    src.push_str("pub mod launch_configurations {\n");
    for (name, overloads) in set.iter_sorted() {
        let ident = sanitize_ident(name);
        src.push_str(&format!("    pub const {ident}: &[&str] = &[\n"));
        for overload in overloads {
            let config = KernelConfig::new(Kernel::new(name), overload.clone());
            src.push_str(&format!("        \"{}\",\n", mangle_config(&config)));
        }
        src.push_str("    ];\n");
    }
    src.push_str("}\n");
    src
}

/// The data recovered from a generated options module.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionsModule {
    pub side: Side,
    pub platform: Option<Platform>,
    /// Kernel name → overloads, in module order.
    pub kernels: Vec<(String, Vec<Overload>)>,
}

impl OptionsModule {
    /// Total overloads across all kernels.
    pub fn overload_count(&self) -> usize {
        self.kernels.iter().map(|(_, o)| o.len()).sum()
    }

    /// Overloads of one kernel. Absent kernels yield an empty slice so a
    /// device-side `declare_kernel` degrades to a no-op.
    pub fn overloads_for(&self, kernel: &str) -> &[Overload] {
        self.kernels
            .iter()
            .find(|(name, _)| name == kernel)
            .map(|(_, overloads)| overloads.as_slice())
            .unwrap_or(&[])
    }
}

/// Parse a generated options module back into its overloads.
///
/// Only the grammar [`generate_options_module`] emits is accepted. The
/// device compilation and the round-trip tests both load modules through
/// this path.
pub fn parse_options_module(src: &str) -> Result<OptionsModule> {
    let mut side = None;
    let mut platform = None;
    let mut kernels: Vec<(String, Vec<Overload>)> = Vec::new();
    let mut in_table = false;

    for (line_no, line) in src.lines().enumerate() {
        let line = line.trim();
        if let Some(tag) = const_str_value(line, "pub const SIDE: &str = ") {
            side = match tag {
                "host" => Some(Side::Host),
                "device" => Some(Side::Device),
                other => {
                    return Err(bad_module(line_no, &format!("unknown side tag `{other}`")));
                }
            };
        } else if let Some(tag) = const_str_value(line, "pub const PLATFORM: &str = ") {
            platform = Some(
                Platform::from_tag(tag).ok_or_else(|| bad_module(line_no, &format!("unknown platform tag `{tag}`")))?,
            );
        } else if line.starts_with("pub static LAUNCH_CONFIGURATIONS") {
            in_table = true;
        } else if in_table {
            if line == "];" {
                in_table = false;
            } else if let Some(rest) = line.strip_prefix("(\"") {
                let name = rest
                    .split('"')
                    .next()
                    .ok_or_else(|| bad_module(line_no, "unterminated kernel name"))?;
                kernels.push((name.to_string(), Vec::new()));
            } else if let Some(rest) = line.strip_prefix('"') {
                let suffix = rest
                    .split('"')
                    .next()
                    .ok_or_else(|| bad_module(line_no, "unterminated overload suffix"))?;
                let config = demangle_config(suffix).map_err(|_| DriverError::InvalidMangledName {
                    symbol: suffix.to_string(),
                })?;
                let (name, overloads) = kernels
                    .last_mut()
                    .ok_or_else(|| bad_module(line_no, "overload before any kernel entry"))?;
                if config.kernel.name != *name {
                    return Err(bad_module(
                        line_no,
                        &format!("suffix names kernel `{}` inside entry `{name}`", config.kernel.name),
                    ));
                }
                overloads.push(config.overload);
            }
        }
    }

    let side = side.ok_or_else(|| bad_module(0, "module declares no SIDE"))?;
    if side == Side::Device && platform.is_none() {
        return Err(bad_module(0, "device module declares no PLATFORM"));
    }
    Ok(OptionsModule { side, platform, kernels })
}

fn const_str_value<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?.strip_suffix("\";")?.strip_prefix('"')
}

fn bad_module(line: usize, detail: &str) -> DriverError {
    DriverError::InvalidElf {
        path: "<options module>".into(),
        detail: format!("line {}: {detail}", line + 1),
    }
}

// ================================================================================================
// Tests
// ================================================================================================
