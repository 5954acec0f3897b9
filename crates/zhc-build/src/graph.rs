//! Build graph
//!
//! Steps form a directed acyclic graph visited in topological order:
//! `ExtractOverloads` scans the compiled host object, each `DeviceObject`
//! consumes the published overload set and drives one device compilation,
//! and `OffloadLibrary` bundles the resulting objects into the linkable
//! artefact. The only state shared between steps is the overload set an
//! extract step publishes after its `make` returns; dependents read it only
//! afterwards, so an outer framework may run independent steps in parallel.
//!
//! Scheduling is single-threaded and cooperative: subprocess launches block
//! the calling step, and a cancellation flag is observed before every
//! subprocess launch and file write. Partial outputs only ever land in the
//! content-addressed scratch directory.
//!
//! The device compiler is invoked as
//! `<program> <configured args> --kernel-options <module> -o <object> <source>`.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use zhc_abi::OverloadSet;
use zhc_amdgpu::fatbin::{fatbin_stub_source, FatbinError, HostCompiler};
use zhc_amdgpu::{build_hip_bundle, scan_device_object, AmdgpuError, DeviceObjectInfo};
use zhc_tracing::{debug, info};

use crate::cache::{write_scratch, CacheDir, DEVICE_OBJECT_SALT, OFFLOAD_LIBRARY_SALT};
use crate::error::{DriverError, Result};
use crate::extract::extract_overloads;
use crate::options::{generate_options_module, Platform, Side};

// ================================================================================================
// Cancellation
// ================================================================================================

/// Cooperative cancellation flag shared with the outer framework.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Abandon the step if cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        Ok(())
    }
}

// ================================================================================================
// Step definitions
// ================================================================================================

/// Identifier of one step in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId(usize);

/// A device-compiler invocation template.
#[derive(Debug, Clone)]
pub struct Compiler {
    program: PathBuf,
    args: Vec<OsString>,
}

impl Compiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Compiler {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn run(&self, extra: impl IntoIterator<Item = OsString>) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.args(extra);
        let output = cmd.output().map_err(|source| DriverError::io(&self.program, source))?;
        if !output.status.success() {
            return Err(DriverError::CompilerFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

enum StepKind {
    ExtractOverloads {
        host_object: PathBuf,
    },
    DeviceObject {
        source: PathBuf,
        platform: Platform,
        overloads: StepId,
        compiler: Compiler,
    },
    OffloadLibrary {
        kernels: Vec<StepId>,
        host_target: Option<String>,
        host_compiler: HostCompiler,
        output: Option<PathBuf>,
    },
}

struct StepNode {
    name: String,
    deps: Vec<StepId>,
    kind: StepKind,
}

/// Outputs of a completed run.
#[derive(Debug, Default)]
pub struct BuildArtifacts {
    configs: HashMap<StepId, OverloadSet>,
    options_modules: HashMap<StepId, PathBuf>,
    objects: HashMap<StepId, PathBuf>,
    /// The offload library object, in the scratch directory.
    pub library: Option<PathBuf>,
}

impl BuildArtifacts {
    /// The overload set an `ExtractOverloads` step published.
    pub fn configs(&self, step: StepId) -> Option<&OverloadSet> {
        self.configs.get(&step)
    }

    /// The options module a `DeviceObject` step generated.
    pub fn options_module(&self, step: StepId) -> Option<&Path> {
        self.options_modules.get(&step).map(PathBuf::as_path)
    }

    /// The object a `DeviceObject` step produced.
    pub fn object(&self, step: StepId) -> Option<&Path> {
        self.objects.get(&step).map(PathBuf::as_path)
    }
}

// ================================================================================================
// Pipeline
// ================================================================================================

/// The build-graph owner: step constructors plus the runner.
pub struct Pipeline {
    steps: Vec<StepNode>,
    cache: CacheDir,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Pipeline {
            steps: Vec::new(),
            cache: CacheDir::new(cache_root),
            cancel: CancellationToken::new(),
        }
    }

    /// The cancellation token observed by every step.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Add a step scanning `host_object` for launch-site symbols.
    pub fn extract_overloads(&mut self, host_object: impl Into<PathBuf>) -> StepId {
        let host_object = host_object.into();
        self.push(
            format!("extract-overloads({})", host_object.display()),
            Vec::new(),
            StepKind::ExtractOverloads { host_object },
        )
    }

    /// Add a device compilation of `source` for `platform`, parameterised by
    /// the overload set `overloads` publishes.
    pub fn device_object(
        &mut self,
        source: impl Into<PathBuf>,
        platform: Platform,
        overloads: StepId,
        compiler: Compiler,
    ) -> StepId {
        let source = source.into();
        self.push(
            format!("device-object({})", source.display()),
            vec![overloads],
            StepKind::DeviceObject {
                source,
                platform,
                overloads,
                compiler,
            },
        )
    }

    /// Add the offload-library packaging step.
    pub fn offload_library(&mut self, host_compiler: HostCompiler) -> StepId {
        self.push(
            "offload-library".to_string(),
            Vec::new(),
            StepKind::OffloadLibrary {
                kernels: Vec::new(),
                host_target: None,
                host_compiler,
                output: None,
            },
        )
    }

    /// Register a device object's kernels with an offload-library step.
    pub fn add_kernels(&mut self, library: StepId, device_object: StepId) {
        let node = &mut self.steps[library.0];
        node.deps.push(device_object);
        if let StepKind::OffloadLibrary { kernels, .. } = &mut node.kind {
            kernels.push(device_object);
        }
    }

    /// Set the host target triple the library's placeholder entry and stub
    /// compilation use.
    pub fn set_host_target(&mut self, library: StepId, target: impl Into<String>) {
        if let StepKind::OffloadLibrary { host_target, .. } = &mut self.steps[library.0].kind {
            *host_target = Some(target.into());
        }
    }

    /// Copy the finished library to a user-visible path after the step
    /// completes (the scratch copy stays authoritative until then).
    pub fn set_output(&mut self, library: StepId, path: impl Into<PathBuf>) {
        if let StepKind::OffloadLibrary { output, .. } = &mut self.steps[library.0].kind {
            *output = Some(path.into());
        }
    }

    fn push(&mut self, name: String, deps: Vec<StepId>, kind: StepKind) -> StepId {
        let id = StepId(self.steps.len());
        self.steps.push(StepNode { name, deps, kind });
        id
    }

    /// Visit every step in topological order and run it.
    pub fn run(&mut self) -> Result<BuildArtifacts> {
        let order = self.topological_order()?;
        let mut artifacts = BuildArtifacts::default();
        for id in order {
            let node = &self.steps[id.0];
            debug!(step = %node.name, "running step");
            match &node.kind {
                StepKind::ExtractOverloads { host_object } => {
                    let bytes = fs::read(host_object).map_err(|source| DriverError::io(host_object, source))?;
                    let set = extract_overloads(&bytes, host_object)?;
                    artifacts.configs.insert(id, set);
                }
                StepKind::DeviceObject {
                    source,
                    platform,
                    overloads,
                    compiler,
                } => {
                    self.run_device_object(id, source, *platform, *overloads, compiler, &mut artifacts)?;
                }
                StepKind::OffloadLibrary {
                    kernels,
                    host_target,
                    host_compiler,
                    output,
                } => {
                    self.run_offload_library(kernels, host_target.as_deref(), host_compiler, output.as_deref(), &mut artifacts)?;
                }
            }
        }
        Ok(artifacts)
    }

    fn topological_order(&self) -> Result<Vec<StepId>> {
        let mut indegree = vec![0usize; self.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for (idx, node) in self.steps.iter().enumerate() {
            for dep in &node.deps {
                indegree[idx] += 1;
                dependents[dep.0].push(idx);
            }
        }
        let mut ready: VecDeque<usize> = (0..self.steps.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(idx) = ready.pop_front() {
            order.push(StepId(idx));
            for &next in &dependents[idx] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }
        if order.len() != self.steps.len() {
            return Err(DriverError::DependencyCycle);
        }
        Ok(order)
    }

    fn run_device_object(
        &self,
        id: StepId,
        source: &Path,
        platform: Platform,
        overloads: StepId,
        compiler: &Compiler,
        artifacts: &mut BuildArtifacts,
    ) -> Result<()> {
        let set = artifacts.configs.get(&overloads).ok_or_else(|| DriverError::MissingDependency {
            step: self.steps[id.0].name.clone(),
        })?;

        // The module content addresses the scratch directory, so the device
        // compilation reruns exactly when the overload set or platform
        // changes.
        let module = generate_options_module(set, Side::Device, platform);
        let platform_tag = platform.to_string();
        let dir = self.cache.entry(
            DEVICE_OBJECT_SALT,
            [
                module.as_bytes(),
                source.as_os_str().as_encoded_bytes(),
                platform_tag.as_bytes(),
            ],
        );
        self.cache.ensure(&dir)?;

        let module_path = dir.join("kernel_options.rs");
        let object_path = dir.join("device.o");
        self.cancel.checkpoint()?;
        write_scratch(&module_path, module.as_bytes())?;

        self.cancel.checkpoint()?;
        compiler.run([
            OsString::from("--kernel-options"),
            module_path.clone().into_os_string(),
            OsString::from("-o"),
            object_path.clone().into_os_string(),
            source.as_os_str().to_os_string(),
        ])?;

        info!(object = %object_path.display(), "device object built");
        artifacts.options_modules.insert(id, module_path);
        artifacts.objects.insert(id, object_path);
        Ok(())
    }

    fn run_offload_library(
        &self,
        kernels: &[StepId],
        host_target: Option<&str>,
        host_compiler: &HostCompiler,
        output: Option<&Path>,
        artifacts: &mut BuildArtifacts,
    ) -> Result<()> {
        // Re-scan every device object against the set that parameterised it.
        let mut objects: Vec<(DeviceObjectInfo, Vec<u8>)> = Vec::new();
        for &device in kernels {
            let object_path = artifacts.objects.get(&device).ok_or_else(|| DriverError::MissingDependency {
                step: "offload-library".to_string(),
            })?;
            let set = self
                .extract_dep_of(device)
                .and_then(|extract| artifacts.configs.get(&extract))
                .ok_or_else(|| DriverError::MissingDependency {
                    step: "offload-library".to_string(),
                })?;
            let bytes = fs::read(object_path).map_err(|source| DriverError::io(object_path, source))?;
            let info = scan_device_object(&bytes, set).map_err(|err| lower_amdgpu_error(object_path, err))?;
            objects.push((info, bytes));
        }

        let target = host_target.unwrap_or("x86_64-unknown-linux-gnu");
        let (host_arch, host_os) = target.split_once('-').unwrap_or((target, "unknown"));
        let bundle = build_hip_bundle(host_arch, host_os, &objects)
            .map_err(|err| lower_amdgpu_error(Path::new("<bundle>"), err))?;

        let dir = self.cache.entry(OFFLOAD_LIBRARY_SALT, [bundle.as_slice()]);
        self.cache.ensure(&dir)?;
        let bundle_path = dir.join("bundle.hipfb");
        let stub_path = dir.join("fatbin_stub.rs");
        let library_path = dir.join("offload_library.o");

        self.cancel.checkpoint()?;
        write_scratch(&bundle_path, &bundle)?;
        self.cancel.checkpoint()?;
        write_scratch(&stub_path, fatbin_stub_source("bundle.hipfb").as_bytes())?;

        self.cancel.checkpoint()?;
        let compiler = match host_target {
            Some(target) => host_compiler.clone().with_target(target),
            None => host_compiler.clone(),
        };
        compiler
            .compile_object(&stub_path, &library_path)
            .map_err(|err| match err {
                FatbinError::Io { path, source } => DriverError::Io { path, source },
                FatbinError::CompilerFailed { status, stderr } => DriverError::CompilerFailed {
                    program: PathBuf::from("host-compiler"),
                    status,
                    stderr,
                },
            })?;

        if let Some(destination) = output {
            self.cancel.checkpoint()?;
            fs::copy(&library_path, destination).map_err(|source| DriverError::io(destination, source))?;
        }
        info!(library = %library_path.display(), "offload library built");
        artifacts.library = Some(library_path);
        Ok(())
    }

    /// The extract step a device-object step depends on.
    fn extract_dep_of(&self, device: StepId) -> Option<StepId> {
        match &self.steps[device.0].kind {
            StepKind::DeviceObject { overloads, .. } => Some(*overloads),
            _ => None,
        }
    }
}

fn lower_amdgpu_error(path: &Path, err: AmdgpuError) -> DriverError {
    match err {
        AmdgpuError::MissingKernelDeclarations(missing) => DriverError::MissingKernelDeclaration(missing),
        AmdgpuError::Bundle(bundle) => DriverError::UnsupportedTarget(bundle.to_string()),
        // Structural and metadata-level problems collapse: the user cares
        // that the object is malformed, not where it was detected.
        other => DriverError::invalid_elf(path, other),
    }
}

// ================================================================================================
// Tests
// ================================================================================================
