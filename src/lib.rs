//! # zhc — heterogeneous-compute build driver
//!
//! `zhc` coordinates two separately compiled programs sharing one source
//! library: the *host* executable that launches accelerator kernels, and the
//! *device* code that implements them. The driver discovers which kernel
//! overloads the host references (from its ELF symbol table), drives a
//! device compilation that exports exactly those overloads, and packages the
//! device objects into an *offload library* the host links against.
//!
//! ## Architecture overview
//!
//! - [`abi`] owns the value model (`AbiValue`, `Overload`, `KernelConfig`)
//!   and the `__zhc_ka_` / `__zhc_kd_` symbol mangling.
//! - [`msgpack`] and [`elf`] read device-object metadata and object files.
//! - [`bundle`] writes the clang-compatible offload-bundle container.
//! - [`amdgpu`] is the platform backend: HSA metadata, overload
//!   cross-referencing, and the fatbin embedding stub.
//! - [`build`] is the step graph (`ExtractOverloads` → `DeviceObject` →
//!   `OffloadLibrary`) the outer build framework drives.
//! - [`tracing`] centralises subscriber setup for binaries and tests.
//!
//! Downstream consumers depend on this facade instead of the individual
//! member crates.

pub use zhc_abi as abi;
pub use zhc_amdgpu as amdgpu;
pub use zhc_build as build;
pub use zhc_bundle as bundle;
pub use zhc_elf as elf;
pub use zhc_msgpack as msgpack;
pub use zhc_tracing as tracing;

pub use zhc_abi::{AbiValue, Kernel, KernelConfig, Overload, OverloadSet};
pub use zhc_build::{DriverError, Pipeline, Platform};
