//! Offset assignment, fixup resolution and section assembly
//!
//! After selection every instruction holds fixed bytes except for its
//! immediate placeholders. Offsets are assigned in definition order;
//! immediates are resolved by summing their additive chains; an 8-bit
//! field whose value does not fit is promoted to the 32-bit form and its
//! instruction re-selected. Promotion never reverses, so the iteration is
//! monotone and reaches a fixed point.

use crate::encode::{BackendData, ImmKind};
use crate::select::select;
use crate::{BackendFlags, BackendResult};
use lyra_common::{LyraError, LyraResult};
use lyra_ir::{CompileResult, FuncId, ImmPart, InsnId, GPR_SIZE, PAGE_SIZE};
use std::collections::BTreeSet;

fn align_up(n: u32, align: u32) -> u32 {
    (n + align - 1) & !(align - 1)
}

pub(crate) fn run(result: &CompileResult, flags: BackendFlags) -> LyraResult<BackendResult> {
    let module = &result.module;
    let strings_sz = result.string_region.len() as u32;

    let data_align = if flags.contains(BackendFlags::PAGEALIGNDATA)
        || flags.contains(BackendFlags::PAGEALIGNALL)
    {
        PAGE_SIZE
    } else {
        GPR_SIZE
    };

    // Initial selection.
    let mut data: Vec<Vec<BackendData>> = Vec::with_capacity(module.funcs.len());
    for (_, f) in module.iter() {
        let mut per_insn = Vec::with_capacity(f.instrs.len());
        for insn in &f.instrs {
            let mut b = BackendData::default();
            select(insn, &mut b)?;
            per_insn.push(b);
        }
        data.push(per_insn);
    }

    let mut rounds = 0u32;
    let exec_padded = loop {
        rounds += 1;

        // Phase A: running binary offsets, with the fixed-stride padding
        // jump tables rely on.
        let mut offset = 0u32;
        for (fi, f) in module.iter() {
            for (ii, insn) in f.instrs.iter().enumerate() {
                let b = &mut data[fi as usize][ii];
                b.binary_offset = offset;
                if insn.binsz != 0 {
                    if b.binary.len() as u32 > insn.binsz {
                        return Err(LyraError::backend(
                            "padded instruction exceeds its fixed stride",
                        ));
                    }
                    while (b.binary.len() as u32) < insn.binsz {
                        b.binary.push(0x90);
                    }
                }
                offset += b.binary.len() as u32;
            }
        }
        let exec_padded = align_up(offset, data_align);
        let string_base = exec_padded;
        let global_base = align_up(string_base + strings_sz, data_align);

        // Phase B: resolve immediates, collecting promotions.
        let mut redo: BTreeSet<(FuncId, InsnId)> = BTreeSet::new();
        for (fi, f) in module.iter() {
            for (ii, insn) in f.instrs.iter().enumerate() {
                let b = &data[fi as usize][ii];

                if let Some(slot) = b.imm2 {
                    let imm_size = slot_size(slot.kind);
                    let anchor = b.binary_offset + slot.field_offset + imm_size;
                    // The secondary immediate always reaches the reserved
                    // slot just past the loader pointers at the head of
                    // the global region.
                    let value = slot
                        .misc
                        .wrapping_add(global_base + 2 * GPR_SIZE)
                        .wrapping_sub(anchor);
                    if !write_slot(&mut data[fi as usize][ii], value, true) {
                        redo.insert((fi, ii as InsnId));
                    }
                }

                let b = &data[fi as usize][ii];
                if let Some(slot) = b.imm {
                    let imm_size = slot_size(slot.kind);
                    let anchor = b.binary_offset + slot.field_offset + imm_size;

                    let mut value = slot.misc;
                    for part in &insn.imm {
                        value = value.wrapping_add(match part {
                            ImmPart::Value(n) => *n as u32,
                            ImmPart::OffsetToInstruction(r) => {
                                let target = &data[r.func as usize][r.insn as usize];
                                target.binary_offset.wrapping_sub(anchor)
                            }
                            ImmPart::OffsetToFunction(callee) => {
                                let first = data[*callee as usize].first().ok_or_else(|| {
                                    LyraError::backend(format!(
                                        "function {} has no instructions to reach",
                                        module.func(*callee).name
                                    ))
                                })?;
                                first.binary_offset.wrapping_sub(anchor)
                            }
                            ImmPart::OffsetToGlobalRegion => global_base.wrapping_sub(anchor),
                            ImmPart::OffsetToStringRegion => string_base.wrapping_sub(anchor),
                        });
                    }

                    if !write_slot(&mut data[fi as usize][ii], value, false) {
                        redo.insert((fi, ii as InsnId));
                    }
                }
            }
        }

        if redo.is_empty() {
            break exec_padded;
        }

        log::debug!("fixup round {rounds}: {} instructions promoted", redo.len());
        for (fi, ii) in redo {
            let b = &mut data[fi as usize][ii as usize];
            b.reset_for_redo();
            select(&module.func(fi).instrs[ii as usize], b)?;
        }
    };

    // Concatenate the executable image.
    let mut execbin = Vec::with_capacity((exec_padded + strings_sz) as usize);
    for (fi, f) in module.iter() {
        for (ii, _) in f.instrs.iter().enumerate() {
            execbin.extend_from_slice(&data[fi as usize][ii].binary);
        }
    }
    execbin.resize(exec_padded as usize, 0);
    execbin.extend_from_slice(&result.string_region);

    let export_info = build_exports(result, &data);
    let import_info = build_imports(result);
    let debug_info = build_debug(result, &data);

    Ok(BackendResult {
        execbin,
        executable_instrs_size: exec_padded,
        constant_strings_size: strings_sz,
        global_region_size: result.global_region_size,
        export_info,
        import_info,
        debug_info,
    })
}

fn slot_size(kind: ImmKind) -> u32 {
    match kind {
        ImmKind::Imm8 => 1,
        ImmKind::Imm32 => 4,
    }
}

/// Write a resolved value into a slot. Returns false when an 8-bit field
/// cannot hold it and the instruction must be promoted.
fn write_slot(b: &mut BackendData, value: u32, secondary: bool) -> bool {
    let slot = if secondary { b.imm2.as_mut() } else { b.imm.as_mut() };
    let slot = match slot {
        Some(s) => s,
        None => return true,
    };
    match slot.kind {
        ImmKind::Imm8 => {
            let signed = value as i32;
            if (-(1 << 7)..(1 << 7)).contains(&signed) {
                b.binary[slot.field_offset as usize] = value as u8;
                true
            } else {
                slot.kind = ImmKind::Imm32;
                false
            }
        }
        ImmKind::Imm32 => {
            let off = slot.field_offset as usize;
            b.binary[off..off + 4].copy_from_slice(&value.to_le_bytes());
            true
        }
    }
}

/// Export entries: linking signature, NUL, then the function's offset in
/// the executable, little-endian.
fn build_exports(result: &CompileResult, data: &[Vec<BackendData>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (fi, f) in result.module.iter() {
        if !f.to_export || !f.is_defined {
            continue;
        }
        let offset = match data[fi as usize].first() {
            Some(first) => first.binary_offset,
            None => continue,
        };
        out.extend_from_slice(f.link_sig.as_bytes());
        out.push(0);
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out
}

/// Import entries: linking signature, NUL, then the offset within the
/// string region where the loader must write the callee's address.
fn build_imports(result: &CompileResult) -> Vec<u8> {
    let mut out = Vec::new();
    for (_, f) in result.module.iter() {
        if f.to_import == 0 {
            continue;
        }
        out.extend_from_slice(f.link_sig.as_bytes());
        out.push(0);
        out.extend_from_slice(&(f.to_import - 1).to_le_bytes());
    }
    out
}

/// Two debug sections, each prefixed by its little-endian u32 byte
/// length: sorted `{binoffset, filepathoff, linenum, lineoff}` quadruples
/// closed by a zero-linenum sentinel, then the path string table.
fn build_debug(result: &CompileResult, data: &[Vec<BackendData>]) -> Vec<u8> {
    let mut section1: Vec<u32> = Vec::new();
    let mut section2: Vec<u8> = Vec::new();
    let mut path_offsets: Vec<(String, u32)> = Vec::new();
    let mut last_line = 0u32;
    let mut end_offset = 0u32;

    for (fi, f) in result.module.iter() {
        for (ii, insn) in f.instrs.iter().enumerate() {
            let b = &data[fi as usize][ii];
            if !b.binary.is_empty() {
                end_offset = b.binary_offset + b.binary.len() as u32;
            }
            let dbg = match &insn.dbg {
                Some(d) if d.line != 0 => d,
                _ => continue,
            };
            // One entry per source line transition keeps the section
            // proportional to the source, not to the instruction count.
            if dbg.line == last_line {
                continue;
            }
            last_line = dbg.line;

            let path_off = match path_offsets.iter().find(|(p, _)| p == &dbg.path) {
                Some((_, o)) => *o,
                None => {
                    let o = section2.len() as u32;
                    section2.extend_from_slice(dbg.path.as_bytes());
                    section2.push(0);
                    path_offsets.push((dbg.path.clone(), o));
                    o
                }
            };

            section1.extend_from_slice(&[b.binary_offset, path_off, dbg.line, dbg.line_offset]);
        }
    }

    if section1.is_empty() {
        return Vec::new();
    }

    // Sentinel entry marking the upper limit offset.
    section1.extend_from_slice(&[end_offset, 0, 0, 0]);

    let mut out = Vec::new();
    out.extend_from_slice(&((section1.len() * 4) as u32).to_le_bytes());
    for word in &section1 {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend_from_slice(&(section2.len() as u32).to_le_bytes());
    out.extend_from_slice(&section2);
    out
}
