//! Backend integration: byte-level checks over compiled programs

use lyra_backend_x86::{backend_x86, BackendFlags};
use lyra_frontend::{compile, CompileFlags, CompileOptions};
use lyra_ir::{CompileResult, Function, Instruction, Module, Opcode};

fn build(src: &str) -> CompileResult {
    compile(&CompileOptions::new(src)).expect("source should compile")
}

fn build_debug(src: &str) -> CompileResult {
    let mut opts = CompileOptions::new(src);
    opts.flags = CompileFlags::GENERATE_DEBUG_INFO;
    compile(&opts).expect("source should compile")
}

#[test]
fn return_constant_shows_up_as_a_mov_immediate() {
    let r = build("uint f(){return 42;}\n");
    let out = backend_x86(&r, BackendFlags::ALIGN32).expect("backend should lower");

    // mov r32, 42: the immediate bytes land somewhere in the image.
    assert!(out
        .execbin
        .windows(4)
        .any(|w| w == [0x2a, 0x00, 0x00, 0x00]));
    assert_eq!(
        out.execbin.len() as u32,
        out.executable_instrs_size + out.constant_strings_size
    );
}

#[test]
fn every_function_ends_in_a_return() {
    let r = build("uint f(){return 1;}\nvoid g(){}\n");
    let out = backend_x86(&r, BackendFlags::ALIGN32).expect("backend should lower");
    // The image contains ret opcodes for root, f and g.
    assert!(out.execbin.iter().filter(|&&b| b == 0xc3).count() >= 3);
}

#[test]
fn far_branches_promote_to_their_wide_form() {
    // A conditional jump over a body far larger than 127 bytes cannot
    // keep its 8-bit displacement.
    let mut body = String::new();
    for _ in 0..64 {
        body.push_str("x = x + 1000; ");
    }
    let src = format!("uint f(uint x){{\n  if (x) {{ {body} }}\n  return x;\n}}\n");
    let r = build(&src);
    let out = backend_x86(&r, BackendFlags::ALIGN32).expect("fixups should converge");

    // jz rel32.
    assert!(out.execbin.windows(2).any(|w| w == [0x0f, 0x84]));
}

#[test]
fn debug_section_offsets_increase_monotonically() {
    let src = "uint f(uint x){\n  uint y;\n  y = x + 1;\n  y = y + 2;\n  return y;\n}\nuint g(){return f(1);}\n";
    let r = build_debug(src);
    let out = backend_x86(&r, BackendFlags::ALIGN32).expect("backend should lower");

    let dbg = &out.debug_info;
    assert!(!dbg.is_empty());
    let sec1_len = u32::from_le_bytes(dbg[0..4].try_into().unwrap()) as usize;
    assert!(sec1_len % 16 == 0);

    let mut last = None;
    let mut entries = 0;
    for chunk in dbg[4..4 + sec1_len].chunks(16) {
        let binoffset = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
        let linenum = u32::from_le_bytes(chunk[8..12].try_into().unwrap());
        if let Some(prev) = last {
            assert!(binoffset > prev, "offsets must be strictly increasing");
        }
        last = Some(binoffset);
        entries += 1;
        // The sentinel closes the section.
        if entries > 1 && linenum == 0 {
            break;
        }
    }
    assert!(entries > 1);

    // Section 2 holds the source path.
    let sec2_off = 4 + sec1_len;
    let sec2_len = u32::from_le_bytes(dbg[sec2_off..sec2_off + 4].try_into().unwrap()) as usize;
    let table = &dbg[sec2_off + 4..sec2_off + 4 + sec2_len];
    assert!(table.windows(7).any(|w| w == b"<input>"));
}

#[test]
fn export_entries_carry_the_linking_signature_and_offset() {
    let r = build("export uint f(uint a){return a;}\n");
    let out = backend_x86(&r, BackendFlags::ALIGN32).expect("backend should lower");

    let nul = out
        .export_info
        .iter()
        .position(|&b| b == 0)
        .expect("signature terminator");
    assert_eq!(&out.export_info[..nul], b"f(uint)");
    assert_eq!(out.export_info.len(), nul + 1 + 4);
    let offset = u32::from_le_bytes(out.export_info[nul + 1..].try_into().unwrap());
    assert!(offset < out.executable_instrs_size);
}

#[test]
fn declared_but_undefined_functions_become_imports() {
    let r = build("uint h(uint a);\nuint g(){return h(2);}\n");
    let out = backend_x86(&r, BackendFlags::ALIGN32).expect("backend should lower");

    let nul = out
        .import_info
        .iter()
        .position(|&b| b == 0)
        .expect("signature terminator");
    assert_eq!(&out.import_info[..nul], b"h(uint)");
    let slot = u32::from_le_bytes(out.import_info[nul + 1..nul + 5].try_into().unwrap());
    assert!(slot < out.constant_strings_size);
}

#[test]
fn unknown_width_is_a_backend_error() {
    let mut module = Module::new();
    let mut root = Function::new("", "void");
    root.is_defined = true;
    root.push_insn(Instruction::with_regs(Opcode::Ld64r, 1, 2, 0));
    root.push_insn(Instruction::new(Opcode::Jpop));
    module.alloc(root);
    let result = CompileResult { module, ..Default::default() };

    let err = backend_x86(&result, BackendFlags::ALIGN32).expect_err("no 64-bit lowering");
    assert!(err.to_string().contains("lowering"));
}

#[test]
fn string_region_follows_the_aligned_instructions() {
    let r = build("void f(){u8* s; s = \"payload\";}\n");
    let out = backend_x86(&r, BackendFlags::ALIGN32).expect("backend should lower");
    let strings =
        &out.execbin[out.executable_instrs_size as usize..];
    assert!(strings.starts_with(b"payload\0"));
    assert_eq!(out.executable_instrs_size % 4, 0);
}
