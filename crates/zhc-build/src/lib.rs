//! # zhc-build — the cross-compilation coordination pipeline
//!
//! The orchestrator that glues a host compilation to its device
//! compilations. A build runs as a DAG of three step kinds:
//!
//! 1. `ExtractOverloads` — scan the host object's symbol table for
//!    `__zhc_ka_…` launch references and publish the overload set.
//! 2. `DeviceObject` — write the generated options module enumerating those
//!    overloads and drive the device compiler so the object exports exactly
//!    one `__zhc_kd_…` entry point per requested overload.
//! 3. `OffloadLibrary` — cross-reference the device objects' metadata
//!    against the set, bundle them, and compile the embedding stub into the
//!    linkable offload library.
//!
//! ```no_run
//! use zhc_amdgpu::fatbin::HostCompiler;
//! use zhc_build::{Compiler, Pipeline, Platform};
//!
//! # fn main() -> Result<(), zhc_build::DriverError> {
//! let mut pipeline = Pipeline::new(".zhc-cache");
//! let overloads = pipeline.extract_overloads("target/host.o");
//! let device = pipeline.device_object(
//!     "src/kernels.rs",
//!     Platform::Amdgpu,
//!     overloads,
//!     Compiler::new("device-rustc"),
//! );
//! let library = pipeline.offload_library(HostCompiler::new("rustc"));
//! pipeline.add_kernels(library, device);
//! pipeline.set_host_target(library, "x86_64-unknown-linux-gnu");
//! let artifacts = pipeline.run()?;
//! # let _ = artifacts;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod extract;
pub mod graph;
pub mod options;

#[cfg(test)]
mod testobj;

pub use cache::CacheDir;
pub use error::{DriverError, Result};
pub use extract::{extract_overloads, overload_set_json};
pub use graph::{BuildArtifacts, CancellationToken, Compiler, Pipeline, StepId};
pub use options::{generate_options_module, parse_options_module, OptionsModule, Platform, Side};
