//! Fatbin embedding stub
//!
//! The offload library is an ordinary linkable object whose only job is to
//! carry the offload bundle in a section the HIP runtime knows to look at.
//! This module generates a tiny source stub that embeds the bundle file as a
//! page-aligned symbol in `.hip_fatbin`, and drives the host compiler as a
//! subprocess to turn the stub into that object.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use zhc_tracing::debug;

/// Section the HIP runtime scans for the fat binary.
pub const FATBIN_SECTION: &str = ".hip_fatbin";

/// Symbol the host-side driver resolves at load time.
pub const FATBIN_SYMBOL: &str = "__hip_fatbin";

/// Alignment of the embedded bundle.
pub const FATBIN_ALIGN: u64 = 4096;

/// Result type for stub compilation.
pub type Result<T> = std::result::Result<T, FatbinError>;

#[derive(Debug, thiserror::Error)]
pub enum FatbinError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("host compiler exited with {status}: {stderr}")]
    CompilerFailed { status: String, stderr: String },
}

/// Generate the embedding stub.
///
/// `bundle_file` is the file name of the bundle, resolved relative to the
/// stub's own directory at compile time. The stub is freestanding so the
/// host compiler needs no runtime library to build it.
pub fn fatbin_stub_source(bundle_file: &str) -> String {
    let mut src = String::new();
    src.push_str("//! Offload-library embedding stub. Generated; do not edit.\n");
    src.push_str("#![no_std]\n\n");
    src.push_str(&format!("#[repr(C, align({FATBIN_ALIGN}))]\n"));
    src.push_str("pub struct PageAligned<T: ?Sized>(pub T);\n\n");
    src.push_str("#[no_mangle]\n");
    src.push_str(&format!("#[link_section = \"{FATBIN_SECTION}\"]\n"));
    src.push_str(&format!(
        "pub static {FATBIN_SYMBOL}: PageAligned<[u8; include_bytes!(\"{bundle_file}\").len()]> =\n"
    ));
    src.push_str(&format!("    PageAligned(*include_bytes!(\"{bundle_file}\"));\n"));
    src
}

/// The host compiler invocation used to turn the stub into an object.
#[derive(Debug, Clone)]
pub struct HostCompiler {
    program: PathBuf,
    target: Option<String>,
    extra_args: Vec<String>,
}

impl HostCompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        HostCompiler {
            program: program.into(),
            target: None,
            extra_args: Vec::new(),
        }
    }

    /// Target triple forwarded to the compiler, when cross-compiling the
    /// host side.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.extra_args.extend(args);
        self
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Compile `stub` into the linkable object `output`.
    pub fn compile_object(&self, stub: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--edition=2021")
            .arg("--crate-type=lib")
            .arg("--emit=obj")
            .arg(stub)
            .arg("-o")
            .arg(output);
        if let Some(target) = &self.target {
            cmd.arg("--target").arg(target);
        }
        cmd.args(&self.extra_args);

        debug!(compiler = %self.program.display(), stub = %stub.display(), "compiling fatbin stub");
        let result = cmd.output().map_err(|source| FatbinError::Io {
            path: self.program.clone(),
            source,
        })?;
        if !result.status.success() {
            return Err(FatbinError::CompilerFailed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

// ================================================================================================
// Tests
// ================================================================================================
