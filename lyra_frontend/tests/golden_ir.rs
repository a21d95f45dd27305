//! End-to-end IR shape tests over small programs

use lyra_frontend::{compile, CompileFlags, CompileOptions};
use lyra_ir::{CompileResult, Function, ImmPart, Opcode};
use pretty_assertions::assert_eq;

fn build(src: &str) -> CompileResult {
    compile(&CompileOptions::new(src)).expect("source should compile")
}

fn build_with(src: &str, flags: CompileFlags) -> CompileResult {
    let mut opts = CompileOptions::new(src);
    opts.flags = flags;
    compile(&opts).expect("source should compile")
}

fn func<'a>(r: &'a CompileResult, name: &str) -> &'a Function {
    r.module
        .funcs
        .iter()
        .find(|f| f.name == name)
        .unwrap_or_else(|| panic!("function {name} not found"))
}

fn count_op(f: &Function, op: Opcode) -> usize {
    f.instrs.iter().filter(|i| i.op == op).count()
}

fn count_li_with(f: &Function, value: i64) -> usize {
    f.instrs
        .iter()
        .filter(|i| i.op == Opcode::Li && i.const_imm() == Some(value))
        .count()
}

#[test]
fn return_constant_lowers_to_one_li_and_the_epilogue_pair() {
    let r = build("uint f(){return 42;}\n");
    let f = func(&r, "f");
    assert!(f.is_defined);

    assert_eq!(count_li_with(f, 42), 1);

    let n = f.instrs.len();
    assert_eq!(f.instrs[n - 1].op, Opcode::Jpop);
    let epilogue = &f.instrs[n - 2];
    assert_eq!(epilogue.op, Opcode::Addi);
    assert_eq!(epilogue.r1, 0);
    assert_eq!(epilogue.r2, 0);
    assert!(epilogue.const_imm().unwrap() > 0);
}

#[test]
fn if_else_with_two_returns_emits_two_epilogues() {
    let r = build("uint f(uint x){if (x) {return 1;} else {return 0;}}\n");
    let f = func(&r, "f");

    assert_eq!(count_op(f, Opcode::Jz), 1);
    assert_eq!(count_op(f, Opcode::Jpop), 2);
    assert_eq!(count_li_with(f, 1), 1);
    // Zero loads use the xor idiom instead of an immediate load.
    assert!(f
        .instrs
        .iter()
        .any(|i| i.op == Opcode::Xor && i.r1 == i.r2 && i.r2 == i.r3));
}

#[test]
fn while_loop_branches_back_to_its_condition() {
    let r = build("void f(uint n){uint i; i = 0; while (i < n) {i = i + 1;}}\n");
    let f = func(&r, "f");

    assert_eq!(count_op(f, Opcode::Sltu), 1);
    assert_eq!(count_op(f, Opcode::Jz), 1);
    // One back edge; the loop exit falls through to the epilogue.
    assert_eq!(count_op(f, Opcode::J), 1);
    assert!(f
        .instrs
        .iter()
        .any(|i| i.op == Opcode::Addi && i.const_imm() == Some(1)));
}

#[test]
fn switch_builds_a_dense_fixed_stride_jump_table() {
    let r = build(
        "uint f(uint x){switch (x) { case 1,2: {return 1;} case 5: {return 2;} default: {return 0;} }}\n",
    );
    let f = func(&r, "f");

    // Dense run over 1..=5 with the default stride of 1 << 3.
    let table: Vec<_> = f
        .instrs
        .iter()
        .filter(|i| i.op == Opcode::J && i.binsz != 0)
        .collect();
    assert_eq!(table.len(), 5);
    assert!(table.iter().all(|i| i.binsz == 8));

    let target = |i: &lyra_ir::Instruction| match i.imm.as_slice() {
        [ImmPart::OffsetToInstruction(r)] => r.insn,
        other => panic!("table entry with unexpected immediate {other:?}"),
    };
    // 1 and 2 share a case; 3 and 4 fall to default; 5 stands alone.
    assert_eq!(target(table[0]), target(table[1]));
    assert_eq!(target(table[2]), target(table[3]));
    assert_ne!(target(table[0]), target(table[2]));
    assert_ne!(target(table[4]), target(table[2]));

    // The base of the table is taken relative to the instruction pointer.
    assert_eq!(count_op(f, Opcode::Afip), 1);
    assert_eq!(count_op(f, Opcode::Jlteu), 1);
}

#[test]
fn static_initializer_runs_once_behind_a_guard_byte() {
    let r = build("void f(){static uint cached = 3;}\n");
    let f = func(&r, "f");

    assert_eq!(count_op(f, Opcode::Ld8), 1);
    assert_eq!(count_op(f, Opcode::Jnz), 1);
    assert_eq!(count_li_with(f, 3), 1);
    assert_eq!(count_li_with(f, 1), 1);
    assert_eq!(count_op(f, Opcode::St8), 1);
    assert_eq!(r.status_vars.len(), 1);
}

#[test]
fn throw_jumps_into_the_ancestor_declaring_the_catchable_label() {
    let r = build("void outer(){catch oops; void inner(){throw oops;} inner();}\n");
    let outer = func(&r, "outer");
    let inner = func(&r, "inner");

    let outer_id = r
        .module
        .iter()
        .find(|(_, f)| f.name == "outer")
        .map(|(id, _)| id)
        .unwrap();

    let throw_jump = inner
        .instrs
        .iter()
        .rev()
        .find(|i| i.op == Opcode::J)
        .expect("inner should end in the throw jump");
    match throw_jump.imm.as_slice() {
        [ImmPart::OffsetToInstruction(rref)] => assert_eq!(rref.func, outer_id),
        other => panic!("throw jump resolved to {other:?}"),
    }

    // A leaf without locals borrows its caller's frame and is reached by
    // jump-and-link instead of a pushing call.
    assert!(inner.stackframe_holder.is_some());
    assert_eq!(count_op(outer, Opcode::Jl), 1);
}

#[test]
fn byref_parameters_store_through_their_pointer() {
    let r = build("void f(uint &x){x = 5;}\n");
    let f = func(&r, "f");

    assert_eq!(count_li_with(f, 5), 1);
    assert_eq!(count_op(f, Opcode::St32r), 1);
}

#[test]
fn user_operator_wins_overload_resolution_for_aggregates() {
    let r = build(
        "struct point { uint x; uint y; };\n\
         uint operator+(point &a, point &b){return a.x + b.x;}\n\
         void g(){point p; point q; uint s; s = p + q;}\n",
    );
    let plus = func(&r, "+");
    assert!(plus.is_defined);
    assert!(plus.fcall_pattern.is_some());

    let g = func(&r, "g");
    assert_eq!(count_op(g, Opcode::Jpush), 1);
}

#[test]
fn enumerators_fold_at_compile_time() {
    let r = build("enum color { RED, GREEN = 5, BLUE };\nuint f(){return BLUE + 1;}\n");
    let f = func(&r, "f");
    assert_eq!(count_li_with(f, 7), 1);
}

#[test]
fn volatile_variables_flush_on_every_write() {
    let r = build_with(
        "void f(){uint a; a = 1; a = 2;}\n",
        CompileFlags::ALL_VAR_VOLATILE,
    );
    let f = func(&r, "f");
    assert!(count_op(f, Opcode::St32) >= 2);
}

#[test]
fn compilation_is_deterministic() {
    let src = "uint f(uint x){if (x) {return x + 1;} else {return 0;}}\nuint g(){return f(3);}\n";
    let a = build(src);
    let b = build(src);
    assert_eq!(a.module.funcs.len(), b.module.funcs.len());
    for (fa, fb) in a.module.funcs.iter().zip(&b.module.funcs) {
        assert_eq!(fa.instrs, fb.instrs);
    }
    assert_eq!(a.string_region, b.string_region);
    assert_eq!(a.global_region_size, b.global_region_size);
}

#[test]
fn string_literals_land_in_the_string_region() {
    let r = build("void f(){u8* s; s = \"hi\";}\n");
    assert!(r.string_region.starts_with(b"hi\0"));
    let f = func(&r, "f");
    assert_eq!(count_op(f, Opcode::Afip), 1);
}

#[test]
fn calls_place_arguments_and_read_the_result_slot() {
    let r = build("uint add2(uint a, uint b){return a + b;}\nuint g(){return add2(3, 4);}\n");
    let g = func(&r, "g");
    assert_eq!(count_op(g, Opcode::Jpush), 1);
    // Both arguments stored below the caller's frame.
    assert!(count_op(g, Opcode::St32) >= 2);
    let callee = func(&r, "add2");
    assert!(callee.was_used);
    assert_eq!(callee.params.len(), 2);
}

#[test]
fn pointer_to_function_types_parse_and_size_like_addresses() {
    let r = build(
        "void g(){void(u8*, uint) handler; uint(uint&)* table;}\n\
         void f(uint a, void(u8* path, uint off) cb){}\n",
    );

    let g = func(&r, "g");
    let handler = g.vars.iter().find(|v| v.name == "handler").expect("handler declared");
    assert_eq!(handler.typ, "void(u8*,uint)");
    assert_eq!(handler.size, 4);

    // The argument names inside the parentheses document the callback
    // and do not reach the type string.
    let table = g.vars.iter().find(|v| v.name == "table").expect("table declared");
    assert_eq!(table.typ, "uint(uint&)*");
    assert_eq!(table.size, 4);

    let f = func(&r, "f");
    assert_eq!(f.params.len(), 2);
    let cb = f.var(f.params[1]);
    assert_eq!(cb.typ, "void(u8*,uint)");
    assert_eq!(cb.size, 4);
}

#[test]
fn function_pointers_assign_as_addresses() {
    let r = build("void g(){void(uint) a; void(uint) b; a = b;}\n");
    let g = func(&r, "g");
    // One load of b, one register copy into a's binding, flushed at the
    // function end.
    assert!(g.instrs.iter().any(|i| i.op == Opcode::Ld32));
    assert!(g.instrs.iter().any(|i| i.op == Opcode::Cpy));
}

mod errors {
    use super::*;

    fn expect_error(src: &str) -> lyra_common::LyraError {
        compile(&CompileOptions::new(src)).expect_err("source should be rejected")
    }

    #[test]
    fn break_outside_a_loop() {
        let e = expect_error("void f(){break;}\n");
        assert!(e.to_string().contains("break"));
    }

    #[test]
    fn duplicate_case_values() {
        let e = expect_error("void f(uint x){switch (x) { case 1: {} case 1: {} }}\n");
        assert!(e.to_string().contains("duplicate case"));
    }

    #[test]
    fn unknown_symbol_cites_its_position() {
        let e = expect_error("void f(){missing = 1;}\n");
        assert!(e.pos().is_some());
        assert!(e.to_string().contains("missing"));
    }

    #[test]
    fn byref_is_parameter_only() {
        expect_error("void f(){uint &x;}\n");
    }

    #[test]
    fn throw_without_a_declaring_ancestor() {
        let e = expect_error("void outer(){void inner(){throw oops;} inner();}\n");
        assert!(e.to_string().contains("oops"));
    }

    #[test]
    fn array_initializer_indices_must_not_decrease() {
        expect_error("void f(){uint a[4] = {[2] = 1, [1] = 2};}\n");
    }

    #[test]
    fn returning_a_value_from_a_void_function() {
        expect_error("void f(){return 1;}\n");
    }
}
