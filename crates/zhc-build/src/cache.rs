//! Content-addressed scratch directories
//!
//! Step outputs are staged in directories named by a hash of the step's
//! inputs, mixed with a per-pipeline salt so unrelated pipelines never
//! collide. Two steps with identical inputs derive the same path and either
//! may win the write; user-visible destinations only ever receive completed
//! artefacts.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::{DriverError, Result};

/// Salt mixed into device-object scratch paths.
pub const DEVICE_OBJECT_SALT: &str = "zhc-device-object-v1";

/// Salt mixed into offload-library scratch paths.
pub const OFFLOAD_LIBRARY_SALT: &str = "zhc-offload-library-v1";

/// Number of digest bytes kept for the directory name (24 base64 chars).
const DIR_NAME_BYTES: usize = 18;

/// Root of the driver's scratch space.
#[derive(Debug, Clone)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CacheDir { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive the scratch directory for a step from its salt and input
    /// byte streams. Inputs are length-delimited into the hash so
    /// `["ab","c"]` and `["a","bc"]` land in different directories.
    pub fn entry<'a>(&self, salt: &str, inputs: impl IntoIterator<Item = &'a [u8]>) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        for input in inputs {
            hasher.update((input.len() as u64).to_le_bytes());
            hasher.update(input);
        }
        let digest = hasher.finalize();
        let name = URL_SAFE_NO_PAD.encode(&digest[..DIR_NAME_BYTES]);
        self.root.join(name)
    }

    /// Create a scratch directory (and parents) if needed.
    pub fn ensure(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|source| DriverError::io(dir, source))
    }
}

/// Write a file into a scratch directory.
pub fn write_scratch(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| DriverError::io(parent, source))?;
    }
    fs::write(path, bytes).map_err(|source| DriverError::io(path, source))
}
