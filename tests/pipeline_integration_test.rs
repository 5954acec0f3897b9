//! End-to-end pipeline test over synthetic objects
//!
//! Drives the full flow the build driver owns: a host object with
//! launch-site symbols is scanned, the generated options module round-trips
//! back to the same symbols, a device object with matching AMDGPU metadata
//! satisfies the overload set, and the resulting offload bundle has the
//! layout the HIP runtime expects.

use std::fs;
use std::path::Path;

use zhc::abi::{demangle_config, mangle_config};
use zhc::amdgpu::fatbin::{fatbin_stub_source, HostCompiler};
use zhc::build::{parse_options_module, Compiler, Pipeline, Platform, Side};
use zhc::bundle::OFFLOAD_BUNDLE_MAGIC;

// ================================================================================================
// Object synthesis
// ================================================================================================

const SHDR: usize = 64;
const SYM: usize = 24;

/// Build a minimal ELF64LE relocatable with the given symbol names and an
/// optional AMDGPU metadata note.
fn build_object(machine: u16, symbols: &[&str], metadata: Option<&[u8]>) -> Vec<u8> {
    let mut shstrtab = vec![0u8];
    let mut sec_name = |table: &mut Vec<u8>, name: &str| -> u32 {
        let off = table.len() as u32;
        table.extend_from_slice(name.as_bytes());
        table.push(0);
        off
    };
    let shstrtab_name = sec_name(&mut shstrtab, ".shstrtab");
    let symtab_name = sec_name(&mut shstrtab, ".symtab");
    let strtab_name = sec_name(&mut shstrtab, ".strtab");
    let note_name = sec_name(&mut shstrtab, ".note");

    let mut strtab = vec![0u8];
    let mut symtab = vec![0u8; SYM];
    for name in symbols {
        let off = strtab.len() as u32;
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
        symtab.extend_from_slice(&off.to_le_bytes());
        symtab.extend_from_slice(&[0u8; 20]);
    }

    let mut note = Vec::new();
    if let Some(desc) = metadata {
        note.extend_from_slice(&7u32.to_le_bytes());
        note.extend_from_slice(&(desc.len() as u32).to_le_bytes());
        note.extend_from_slice(&32u32.to_le_bytes());
        note.extend_from_slice(b"AMDGPU\0\0");
        note.extend_from_slice(desc);
        while note.len() % 4 != 0 {
            note.push(0);
        }
    }

    let shnum = 5u16;
    let shoff = 64usize;
    let mut payload_off = shoff + shnum as usize * SHDR;
    let mut headers = vec![0u8; SHDR];
    let mut push = |headers: &mut Vec<u8>, name: u32, ty: u32, len: usize, link: u32, entsize: u64, off: &mut usize| {
        headers.extend_from_slice(&name.to_le_bytes());
        headers.extend_from_slice(&ty.to_le_bytes());
        headers.extend_from_slice(&[0u8; 16]);
        headers.extend_from_slice(&(*off as u64).to_le_bytes());
        headers.extend_from_slice(&(len as u64).to_le_bytes());
        headers.extend_from_slice(&link.to_le_bytes());
        headers.extend_from_slice(&0u32.to_le_bytes());
        headers.extend_from_slice(&4u64.to_le_bytes());
        headers.extend_from_slice(&entsize.to_le_bytes());
        *off += len;
    };
    push(&mut headers, shstrtab_name, 3, shstrtab.len(), 0, 0, &mut payload_off);
    push(&mut headers, symtab_name, 2, symtab.len(), 3, SYM as u64, &mut payload_off);
    push(&mut headers, strtab_name, 3, strtab.len(), 0, 0, &mut payload_off);
    push(&mut headers, note_name, 7, note.len(), 0, 0, &mut payload_off);

    let mut out = Vec::new();
    out.extend_from_slice(b"\x7fELF\x02\x01\x01");
    out.extend_from_slice(&[0u8; 9]);
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&machine.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&(shoff as u64).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&64u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(SHDR as u16).to_le_bytes());
    out.extend_from_slice(&shnum.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&headers);
    out.extend_from_slice(&shstrtab);
    out.extend_from_slice(&symtab);
    out.extend_from_slice(&strtab);
    out.extend_from_slice(&note);
    out
}

fn amdgpu_metadata(kernel_names: &[&str]) -> Vec<u8> {
    let mut w = zhc::msgpack::Writer::new();
    w.map(3);
    w.str("amdhsa.version");
    w.array(2);
    w.uint(1);
    w.uint(1);
    w.str("amdhsa.target");
    w.str("amdgcn-amd-amdhsa--gfx90a");
    w.str("amdhsa.kernels");
    w.array(kernel_names.len() as u32);
    for name in kernel_names {
        w.map(2);
        w.str(".name");
        w.str(name);
        w.str(".symbol");
        w.str(&format!("{name}.kd"));
    }
    w.into_bytes()
}

#[cfg(unix)]
fn stub_device_compiler(dir: &Path, fixture: &Path) -> Compiler {
    use std::os::unix::fs::PermissionsExt;
    let script = dir.join("devicecc.sh");
    let body = format!(
        "#!/bin/sh\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then out=\"$2\"; shift; fi\n  shift\ndone\ncp \"{}\" \"$out\"\n",
        fixture.display()
    );
    fs::write(&script, body).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    Compiler::new(script)
}

// ================================================================================================
// Scenarios
// ================================================================================================

#[cfg(unix)]
#[test]
fn full_amdgpu_pipeline_two_vadd_overloads() {
    let tmp = tempfile::tempdir().unwrap();

    // Host binary launches vadd on u32 and on u64 (one duplicate launch).
    let host_path = tmp.path().join("host.o");
    fs::write(
        &host_path,
        build_object(
            62,
            &["__zhc_ka_4_vadd1ru32", "__zhc_ka_4_vadd1ru64", "__zhc_ka_4_vadd1ru32"],
            None,
        ),
    )
    .unwrap();

    // Device object exports exactly those two overloads.
    let device_fixture = tmp.path().join("device_fixture.o");
    fs::write(
        &device_fixture,
        build_object(
            zhc::elf::EM_AMDGPU,
            &[],
            Some(&amdgpu_metadata(&["__zhc_kd_4_vadd1ru32", "__zhc_kd_4_vadd1ru64"])),
        ),
    )
    .unwrap();

    let device_source = tmp.path().join("kernels.rs");
    fs::write(&device_source, "// device kernels\n").unwrap();

    let mut pipeline = Pipeline::new(tmp.path().join("cache"));
    let overloads = pipeline.extract_overloads(&host_path);
    let device = pipeline.device_object(
        &device_source,
        Platform::Amdgpu,
        overloads,
        stub_device_compiler(tmp.path(), &device_fixture),
    );
    let library = pipeline.offload_library(HostCompiler::new("/bin/true"));
    pipeline.add_kernels(library, device);
    pipeline.set_host_target(library, "x86_64-unknown-linux-gnu");

    let artifacts = pipeline.run().unwrap();

    // Extraction collapsed the duplicate and grouped under one kernel.
    let set = artifacts.configs(overloads).unwrap();
    assert_eq!(set.kernel_count(), 1);
    assert_eq!(set.overload_count(), 2);

    // The options module parses back to the same byte-for-byte suffixes.
    let module_src = fs::read_to_string(artifacts.options_module(device).unwrap()).unwrap();
    let module = parse_options_module(&module_src).unwrap();
    assert_eq!(module.side, Side::Device);
    assert_eq!(module.platform, Some(Platform::Amdgpu));
    let suffixes: Vec<String> = module
        .kernels
        .iter()
        .flat_map(|(name, overloads)| {
            overloads.iter().map(move |o| {
                mangle_config(&zhc::KernelConfig::new(zhc::Kernel::new(name.clone()), o.clone()))
            })
        })
        .collect();
    assert_eq!(suffixes, ["4_vadd1ru32", "4_vadd1ru64"]);

    // Those suffixes demangle back to the launch configurations.
    for suffix in &suffixes {
        let config = demangle_config(suffix).unwrap();
        assert_eq!(config.kernel.name, "vadd");
    }

    // The bundle: one host placeholder entry plus one hipv4 entry.
    let library_path = artifacts.library.as_ref().unwrap();
    let bundle = fs::read(library_path.parent().unwrap().join("bundle.hipfb")).unwrap();
    assert!(bundle.starts_with(OFFLOAD_BUNDLE_MAGIC));
    let num_entries = u64::from_le_bytes(bundle[24..32].try_into().unwrap());
    assert_eq!(num_entries, 2);

    // First entry: empty host payload. Second: the device object, aligned.
    let first_len = u64::from_le_bytes(bundle[40..48].try_into().unwrap());
    assert_eq!(first_len, 0);
    let first_id_len = u64::from_le_bytes(bundle[48..56].try_into().unwrap()) as usize;
    let second_base = 56 + first_id_len;
    let second_off = u64::from_le_bytes(bundle[second_base..second_base + 8].try_into().unwrap());
    let second_len = u64::from_le_bytes(bundle[second_base + 8..second_base + 16].try_into().unwrap());
    assert_eq!(second_off % 4096, 0);
    let device_bytes = fs::read(&device_fixture).unwrap();
    assert_eq!(second_len as usize, device_bytes.len());
    assert_eq!(
        &bundle[second_off as usize..second_off as usize + device_bytes.len()],
        &device_bytes[..]
    );
    let second_id_len =
        u64::from_le_bytes(bundle[second_base + 16..second_base + 24].try_into().unwrap()) as usize;
    let second_id = &bundle[second_base + 24..second_base + 24 + second_id_len];
    assert_eq!(second_id, b"hipv4-amdgcn-amd-amdhsa--gfx90a");

    // The embedding stub pins the fatbin contract.
    let stub = fs::read_to_string(library_path.parent().unwrap().join("fatbin_stub.rs")).unwrap();
    assert!(stub.contains("#[link_section = \".hip_fatbin\"]"));
    assert!(stub.contains("align(4096)"));
    assert!(stub.contains("pub static __hip_fatbin"));
    assert_eq!(stub, fatbin_stub_source("bundle.hipfb"));
}

#[cfg(unix)]
#[test]
fn missing_overload_reports_source_syntax() {
    let tmp = tempfile::tempdir().unwrap();

    let host_path = tmp.path().join("host.o");
    fs::write(
        &host_path,
        build_object(62, &["__zhc_ka_3_foo1ru32", "__zhc_ka_3_foo1ru64"], None),
    )
    .unwrap();

    // Device exports only the first overload.
    let device_fixture = tmp.path().join("device_fixture.o");
    fs::write(
        &device_fixture,
        build_object(zhc::elf::EM_AMDGPU, &[], Some(&amdgpu_metadata(&["__zhc_kd_3_foo1ru32"]))),
    )
    .unwrap();
    let device_source = tmp.path().join("kernels.rs");
    fs::write(&device_source, "// device kernels\n").unwrap();

    let mut pipeline = Pipeline::new(tmp.path().join("cache"));
    let overloads = pipeline.extract_overloads(&host_path);
    let device = pipeline.device_object(
        &device_source,
        Platform::Amdgpu,
        overloads,
        stub_device_compiler(tmp.path(), &device_fixture),
    );
    let library = pipeline.offload_library(HostCompiler::new("/bin/true"));
    pipeline.add_kernels(library, device);

    let err = pipeline.run().unwrap_err();
    match &err {
        zhc::DriverError::MissingKernelDeclaration(missing) => {
            assert_eq!(missing.len(), 1);
            assert!(missing[0].contains("foo(u64)"), "got: {}", missing[0]);
        }
        other => panic!("expected missing declaration, got {other:?}"),
    }
    assert_ne!(err.exit_code(), 0);
}

#[test]
fn malformed_launch_symbol_aborts_extraction() {
    let tmp = tempfile::tempdir().unwrap();
    let host_path = tmp.path().join("host.o");
    fs::write(&host_path, build_object(62, &["__zhc_ka_not_mangled"], None)).unwrap();

    let mut pipeline = Pipeline::new(tmp.path().join("cache"));
    pipeline.extract_overloads(&host_path);
    match pipeline.run().unwrap_err() {
        zhc::DriverError::InvalidMangledName { symbol } => {
            assert_eq!(symbol, "__zhc_ka_not_mangled");
        }
        other => panic!("expected invalid mangled name, got {other:?}"),
    }
}
