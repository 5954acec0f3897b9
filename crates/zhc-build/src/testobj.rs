//! Synthetic ELF objects for driver tests.

/// Build a minimal host object whose symbol table holds `symbols`.
pub fn host_object(symbols: &[&str]) -> Vec<u8> {
    build_object(62, symbols, None)
}

/// Build a minimal AMDGPU device object carrying `metadata` in its
/// `AMDGPU`/`NT_AMDGPU_METADATA` note.
pub fn amdgpu_object(metadata: &[u8]) -> Vec<u8> {
    build_object(zhc_elf::EM_AMDGPU, &[], Some(metadata))
}

fn build_object(machine: u16, symbols: &[&str], metadata: Option<&[u8]>) -> Vec<u8> {
    const SHDR: usize = 64;
    const SYM: usize = 24;

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
        symtab.extend_from_slice(&[0u8; 4]);
        symtab.extend_from_slice(&[0u8; 16]);
    }

    let mut note = Vec::new();
    if let Some(desc) = metadata {
        note.extend_from_slice(&7u32.to_le_bytes()); // "AMDGPU\0"
        note.extend_from_slice(&(desc.len() as u32).to_le_bytes());
        note.extend_from_slice(&32u32.to_le_bytes()); // NT_AMDGPU_METADATA
        note.extend_from_slice(b"AMDGPU\0\0");
        note.extend_from_slice(desc);
        while note.len() % 4 != 0 {
            note.push(0);
        }
    }

    let shnum = 5u16;
    let shoff = 64usize;
    let mut payload_off = shoff + shnum as usize * SHDR;
    let mut headers = vec![0u8; SHDR]; // null section
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
    out.extend_from_slice(&1u16.to_le_bytes()); // ET_REL
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
