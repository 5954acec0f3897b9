//! AMD HSA code-object metadata schema
//!
//! The device object carries a msgpack map in its `AMDGPU` note
//! (`NT_AMDGPU_METADATA`). This module parses the subset the driver
//! consumes plus the remaining per-kernel fields, which are validated and
//! kept for diagnostics even though nothing downstream reads them yet.

use zhc_msgpack::schema;
use zhc_msgpack::{MapReader, MsgpackError, Reader, Result};

/// Top-level `amdhsa.*` metadata map.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CodeObjectMetadata {
    /// `amdhsa.version`, `[major, minor]`.
    pub version: [u64; 2],
    /// `amdhsa.target`, present from code-object V4 on.
    pub target: Option<String>,
    /// `amdhsa.printf` format strings, if the device code uses printf.
    pub printf: Option<Vec<String>>,
    /// `amdhsa.kernels`.
    pub kernels: Vec<KernelMetadata>,
}

/// One entry of `amdhsa.kernels`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct KernelMetadata {
    /// Source-level kernel name; for zhc kernels this is the full
    /// `__zhc_kd_…` definition symbol.
    pub name: String,
    /// HSA symbol name (usually `<name>.kd`).
    pub symbol: String,
    pub language: Option<String>,
    pub language_version: Option<Vec<u64>>,
    pub args: Vec<ArgMetadata>,
    pub kernarg_segment_size: u64,
    pub kernarg_segment_align: u64,
    pub group_segment_fixed_size: u64,
    pub private_segment_fixed_size: u64,
    pub wavefront_size: u64,
    pub sgpr_count: u64,
    pub vgpr_count: u64,
    pub agpr_count: Option<u64>,
    pub max_flat_workgroup_size: u64,
    pub sgpr_spill_count: Option<u64>,
    pub vgpr_spill_count: Option<u64>,
    pub reqd_workgroup_size: Option<Vec<u64>>,
    pub workgroup_size_hint: Option<Vec<u64>>,
    pub vec_type_hint: Option<String>,
    pub device_enqueue_symbol: Option<String>,
    pub kind: Option<String>,
    pub uses_dynamic_stack: Option<bool>,
    pub workgroup_processor_mode: Option<bool>,
    pub uniform_work_group_size: Option<bool>,
}

/// One entry of a kernel's `.args`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ArgMetadata {
    pub name: Option<String>,
    pub type_name: Option<String>,
    pub size: u64,
    pub offset: u64,
    pub value_kind: ValueKind,
    pub pointee_align: Option<u64>,
    pub address_space: Option<AddressSpace>,
    pub access: Option<Access>,
    pub actual_access: Option<Access>,
    pub is_const: Option<bool>,
    pub is_restrict: Option<bool>,
    pub is_volatile: Option<bool>,
    pub is_pipe: Option<bool>,
}

/// `.value_kind` of a kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ValueKind {
    ByValue,
    GlobalBuffer,
    DynamicSharedPointer,
    Sampler,
    Image,
    Pipe,
    Queue,
    HiddenGlobalOffsetX,
    HiddenGlobalOffsetY,
    HiddenGlobalOffsetZ,
    HiddenNone,
    HiddenPrintfBuffer,
    HiddenHostcallBuffer,
    HiddenDefaultQueue,
    HiddenCompletionAction,
    HiddenMultigridSyncArg,
    HiddenBlockCountX,
    HiddenBlockCountY,
    HiddenBlockCountZ,
    HiddenGroupSizeX,
    HiddenGroupSizeY,
    HiddenGroupSizeZ,
    HiddenRemainderX,
    HiddenRemainderY,
    HiddenRemainderZ,
    HiddenGridDims,
    HiddenHeapV1,
    HiddenDynamicLdsSize,
    HiddenQueuePtr,
}

impl ValueKind {
    const NAMES: &'static [(&'static str, ValueKind)] = &[
        ("by_value", ValueKind::ByValue),
        ("global_buffer", ValueKind::GlobalBuffer),
        ("dynamic_shared_pointer", ValueKind::DynamicSharedPointer),
        ("sampler", ValueKind::Sampler),
        ("image", ValueKind::Image),
        ("pipe", ValueKind::Pipe),
        ("queue", ValueKind::Queue),
        ("hidden_global_offset_x", ValueKind::HiddenGlobalOffsetX),
        ("hidden_global_offset_y", ValueKind::HiddenGlobalOffsetY),
        ("hidden_global_offset_z", ValueKind::HiddenGlobalOffsetZ),
        ("hidden_none", ValueKind::HiddenNone),
        ("hidden_printf_buffer", ValueKind::HiddenPrintfBuffer),
        ("hidden_hostcall_buffer", ValueKind::HiddenHostcallBuffer),
        ("hidden_default_queue", ValueKind::HiddenDefaultQueue),
        ("hidden_completion_action", ValueKind::HiddenCompletionAction),
        ("hidden_multigrid_sync_arg", ValueKind::HiddenMultigridSyncArg),
        ("hidden_block_count_x", ValueKind::HiddenBlockCountX),
        ("hidden_block_count_y", ValueKind::HiddenBlockCountY),
        ("hidden_block_count_z", ValueKind::HiddenBlockCountZ),
        ("hidden_group_size_x", ValueKind::HiddenGroupSizeX),
        ("hidden_group_size_y", ValueKind::HiddenGroupSizeY),
        ("hidden_group_size_z", ValueKind::HiddenGroupSizeZ),
        ("hidden_remainder_x", ValueKind::HiddenRemainderX),
        ("hidden_remainder_y", ValueKind::HiddenRemainderY),
        ("hidden_remainder_z", ValueKind::HiddenRemainderZ),
        ("hidden_grid_dims", ValueKind::HiddenGridDims),
        ("hidden_heap_v1", ValueKind::HiddenHeapV1),
        ("hidden_dynamic_lds_size", ValueKind::HiddenDynamicLdsSize),
        ("hidden_queue_ptr", ValueKind::HiddenQueuePtr),
    ];

    /// Hidden arguments are appended by the compiler, not by the launch
    /// signature.
    pub fn is_hidden(self) -> bool {
        !matches!(
            self,
            ValueKind::ByValue
                | ValueKind::GlobalBuffer
                | ValueKind::DynamicSharedPointer
                | ValueKind::Sampler
                | ValueKind::Image
                | ValueKind::Pipe
                | ValueKind::Queue
        )
    }
}

/// `.address_space` of a pointer argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum AddressSpace {
    Private,
    Global,
    Constant,
    Local,
    Generic,
    Region,
}

impl AddressSpace {
    const NAMES: &'static [(&'static str, AddressSpace)] = &[
        ("private", AddressSpace::Private),
        ("global", AddressSpace::Global),
        ("constant", AddressSpace::Constant),
        ("local", AddressSpace::Local),
        ("generic", AddressSpace::Generic),
        ("region", AddressSpace::Region),
    ];
}

/// `.access` / `.actual_access` of a buffer or image argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    const NAMES: &'static [(&'static str, Access)] = &[
        ("read_only", Access::ReadOnly),
        ("write_only", Access::WriteOnly),
        ("read_write", Access::ReadWrite),
    ];
}

// ================================================================================================
// Parsing
// ================================================================================================

const TOP_LEVEL_KEYS: &[&str] = &["amdhsa.version", "amdhsa.target", "amdhsa.printf", "amdhsa.kernels"];

const KERNEL_KEYS: &[&str] = &[
    ".name",
    ".symbol",
    ".language",
    ".language_version",
    ".args",
    ".reqd_workgroup_size",
    ".workgroup_size_hint",
    ".vec_type_hint",
    ".device_enqueue_symbol",
    ".kernarg_segment_size",
    ".group_segment_fixed_size",
    ".private_segment_fixed_size",
    ".kernarg_segment_align",
    ".wavefront_size",
    ".sgpr_count",
    ".vgpr_count",
    ".agpr_count",
    ".max_flat_workgroup_size",
    ".sgpr_spill_count",
    ".vgpr_spill_count",
    ".kind",
    ".uses_dynamic_stack",
    ".workgroup_processor_mode",
    ".uniform_work_group_size",
];

const ARG_KEYS: &[&str] = &[
    ".name",
    ".type_name",
    ".size",
    ".offset",
    ".value_kind",
    ".value_type",
    ".pointee_align",
    ".address_space",
    ".access",
    ".actual_access",
    ".is_const",
    ".is_restrict",
    ".is_volatile",
    ".is_pipe",
];

impl CodeObjectMetadata {
    /// Parse the full metadata map from the note descriptor bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let mut version = None;
        let mut target = None;
        let mut printf = None;
        let mut kernels = Vec::new();

        let mut map = MapReader::begin(&mut reader, TOP_LEVEL_KEYS)?;
        while let Some(key) = map.next_key()? {
            let r = map.reader();
            match key.as_str() {
                "amdhsa.version" => {
                    schema::read_array_header_exact(r, 2)?;
                    version = Some([schema::read_u64(r)?, schema::read_u64(r)?]);
                }
                "amdhsa.target" => target = Some(schema::read_str(r)?.to_string()),
                "amdhsa.printf" => printf = Some(read_string_seq(r)?),
                "amdhsa.kernels" => {
                    let count = schema::read_array_header(r)?;
                    kernels.reserve(count as usize);
                    for _ in 0..count {
                        kernels.push(KernelMetadata::parse(r)?);
                    }
                }
                _ => unreachable!("MapReader rejects unknown keys"),
            }
        }
        map.finish(&["amdhsa.version", "amdhsa.kernels"])?;

        Ok(CodeObjectMetadata {
            version: version.ok_or_else(|| MsgpackError::MissingField("amdhsa.version".to_string()))?,
            target,
            printf,
            kernels,
        })
    }
}

impl KernelMetadata {
    fn parse(r: &mut Reader<'_>) -> Result<Self> {
        let mut name = None;
        let mut symbol = None;
        let mut language = None;
        let mut language_version = None;
        let mut args = Vec::new();
        let mut kernarg_segment_size = 0;
        let mut kernarg_segment_align = 0;
        let mut group_segment_fixed_size = 0;
        let mut private_segment_fixed_size = 0;
        let mut wavefront_size = 0;
        let mut sgpr_count = 0;
        let mut vgpr_count = 0;
        let mut agpr_count = None;
        let mut max_flat_workgroup_size = 0;
        let mut sgpr_spill_count = None;
        let mut vgpr_spill_count = None;
        let mut reqd_workgroup_size = None;
        let mut workgroup_size_hint = None;
        let mut vec_type_hint = None;
        let mut device_enqueue_symbol = None;
        let mut kind = None;
        let mut uses_dynamic_stack = None;
        let mut workgroup_processor_mode = None;
        let mut uniform_work_group_size = None;

        let mut map = MapReader::begin(r, KERNEL_KEYS)?;
        while let Some(key) = map.next_key()? {
            let r = map.reader();
            match key.as_str() {
                ".name" => name = Some(schema::read_str(r)?.to_string()),
                ".symbol" => symbol = Some(schema::read_str(r)?.to_string()),
                ".language" => language = Some(schema::read_str(r)?.to_string()),
                ".language_version" => language_version = Some(read_u64_seq(r)?),
                ".args" => {
                    let count = schema::read_array_header(r)?;
                    args.reserve(count as usize);
                    for _ in 0..count {
                        args.push(ArgMetadata::parse(r)?);
                    }
                }
                ".reqd_workgroup_size" => reqd_workgroup_size = Some(read_u64_seq(r)?),
                ".workgroup_size_hint" => workgroup_size_hint = Some(read_u64_seq(r)?),
                ".vec_type_hint" => vec_type_hint = Some(schema::read_str(r)?.to_string()),
                ".device_enqueue_symbol" => device_enqueue_symbol = Some(schema::read_str(r)?.to_string()),
                ".kernarg_segment_size" => kernarg_segment_size = schema::read_u64(r)?,
                ".group_segment_fixed_size" => group_segment_fixed_size = schema::read_u64(r)?,
                ".private_segment_fixed_size" => private_segment_fixed_size = schema::read_u64(r)?,
                ".kernarg_segment_align" => kernarg_segment_align = schema::read_u64(r)?,
                ".wavefront_size" => wavefront_size = schema::read_u64(r)?,
                ".sgpr_count" => sgpr_count = schema::read_u64(r)?,
                ".vgpr_count" => vgpr_count = schema::read_u64(r)?,
                ".agpr_count" => agpr_count = Some(schema::read_u64(r)?),
                ".max_flat_workgroup_size" => max_flat_workgroup_size = schema::read_u64(r)?,
                ".sgpr_spill_count" => sgpr_spill_count = Some(schema::read_u64(r)?),
                ".vgpr_spill_count" => vgpr_spill_count = Some(schema::read_u64(r)?),
                ".kind" => kind = Some(schema::read_str(r)?.to_string()),
                ".uses_dynamic_stack" => uses_dynamic_stack = Some(schema::read_bool(r)?),
                ".workgroup_processor_mode" => workgroup_processor_mode = Some(schema::read_bool(r)?),
                ".uniform_work_group_size" => uniform_work_group_size = Some(schema::read_bool(r)?),
                _ => unreachable!("MapReader rejects unknown keys"),
            }
        }
        map.finish(&[".name", ".symbol"])?;

        Ok(KernelMetadata {
            name: name.ok_or_else(|| MsgpackError::MissingField(".name".to_string()))?,
            symbol: symbol.ok_or_else(|| MsgpackError::MissingField(".symbol".to_string()))?,
            language,
            language_version,
            args,
            kernarg_segment_size,
            kernarg_segment_align,
            group_segment_fixed_size,
            private_segment_fixed_size,
            wavefront_size,
            sgpr_count,
            vgpr_count,
            agpr_count,
            max_flat_workgroup_size,
            sgpr_spill_count,
            vgpr_spill_count,
            reqd_workgroup_size,
            workgroup_size_hint,
            vec_type_hint,
            device_enqueue_symbol,
            kind,
            uses_dynamic_stack,
            workgroup_processor_mode,
            uniform_work_group_size,
        })
    }

    /// Arguments that originate in the launch signature (hidden compiler
    /// arguments stripped).
    pub fn explicit_args(&self) -> impl Iterator<Item = &ArgMetadata> {
        self.args.iter().filter(|a| !a.value_kind.is_hidden())
    }
}

impl ArgMetadata {
    fn parse(r: &mut Reader<'_>) -> Result<Self> {
        let mut name = None;
        let mut type_name = None;
        let mut size = None;
        let mut offset = None;
        let mut value_kind = None;
        let mut pointee_align = None;
        let mut address_space = None;
        let mut access = None;
        let mut actual_access = None;
        let mut is_const = None;
        let mut is_restrict = None;
        let mut is_volatile = None;
        let mut is_pipe = None;

        let mut map = MapReader::begin(r, ARG_KEYS)?;
        while let Some(key) = map.next_key()? {
            let r = map.reader();
            match key.as_str() {
                ".name" => name = Some(schema::read_str(r)?.to_string()),
                ".type_name" => type_name = Some(schema::read_str(r)?.to_string()),
                ".size" => size = Some(schema::read_u64(r)?),
                ".offset" => offset = Some(schema::read_u64(r)?),
                ".value_kind" => value_kind = Some(schema::read_enum(r, ValueKind::NAMES)?),
                // Dropped from the metadata in code-object V3.1; tolerated
                // and ignored for older emitters.
                ".value_type" => r.skip_value()?,
                ".pointee_align" => pointee_align = Some(schema::read_u64(r)?),
                ".address_space" => address_space = Some(schema::read_enum(r, AddressSpace::NAMES)?),
                ".access" => access = Some(schema::read_enum(r, Access::NAMES)?),
                ".actual_access" => actual_access = Some(schema::read_enum(r, Access::NAMES)?),
                ".is_const" => is_const = Some(schema::read_bool(r)?),
                ".is_restrict" => is_restrict = Some(schema::read_bool(r)?),
                ".is_volatile" => is_volatile = Some(schema::read_bool(r)?),
                ".is_pipe" => is_pipe = Some(schema::read_bool(r)?),
                _ => unreachable!("MapReader rejects unknown keys"),
            }
        }
        map.finish(&[".size", ".offset", ".value_kind"])?;

        Ok(ArgMetadata {
            name,
            type_name,
            size: size.ok_or_else(|| MsgpackError::MissingField(".size".to_string()))?,
            offset: offset.ok_or_else(|| MsgpackError::MissingField(".offset".to_string()))?,
            value_kind: value_kind.ok_or_else(|| MsgpackError::MissingField(".value_kind".to_string()))?,
            pointee_align,
            address_space,
            access,
            actual_access,
            is_const,
            is_restrict,
            is_volatile,
            is_pipe,
        })
    }
}

fn read_string_seq(r: &mut Reader<'_>) -> Result<Vec<String>> {
    let count = schema::read_array_header(r)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(schema::read_str(r)?.to_string());
    }
    Ok(out)
}

fn read_u64_seq(r: &mut Reader<'_>) -> Result<Vec<u64>> {
    let count = schema::read_array_header(r)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(schema::read_u64(r)?);
    }
    Ok(out)
}

// ================================================================================================
// Tests
// ================================================================================================
