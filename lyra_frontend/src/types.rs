//! Type strings and aggregate layout
//!
//! Types are carried as strings: `uint`, `u8*`, `point`, `u32[16]`,
//! `#color` (enum names wear a sentinel prefix so they never collide with
//! aggregate names). Pointers append `*`, arrays append `[N]`; a byref
//! variable's stored type carries one extra `*` that the evaluator strips
//! on read.

use crate::parser::Parser;
use lyra_common::LyraResult;
use lyra_ir::types::ENUM_NAME_PREFIX;
use lyra_ir::{TypeDef, Variable, GPR_SIZE};

/// Byte size of a native integer type name, `None` when not native.
pub fn native_size(name: &str) -> Option<u32> {
    match name {
        "u8" | "s8" => Some(1),
        "u16" | "s16" => Some(2),
        "u32" | "s32" => Some(4),
        "u64" | "s64" => Some(8),
        "uint" | "sint" => Some(GPR_SIZE),
        _ => None,
    }
}

pub fn is_native(name: &str) -> bool {
    native_size(name).is_some()
}

pub fn is_signed(name: &str) -> bool {
    matches!(name, "s8" | "s16" | "s32" | "s64" | "sint")
}

pub fn is_pointer(typ: &str) -> bool {
    typ.ends_with('*')
}

/// Native integer or pointer: the types branch conditions and switch
/// expressions accept.
pub fn is_native_or_pointer(typ: &str) -> bool {
    is_native(typ) || is_pointer(typ)
}

pub fn is_enum(typ: &str) -> bool {
    typ.starts_with(ENUM_NAME_PREFIX)
}

/// Pointer-to-function types encode as `ret(t1,t2&)`, gpr-sized like any
/// other address.
pub fn is_funcptr(typ: &str) -> bool {
    typ.ends_with(')')
}

/// Strip one pointer level.
pub fn pointee(typ: &str) -> &str {
    typ.strip_suffix('*').unwrap_or(typ)
}

/// Split a trailing array specification: `u32[16]` becomes `("u32", 16)`.
pub fn split_array(typ: &str) -> Option<(&str, u64)> {
    let open = typ.rfind('[')?;
    if !typ.ends_with(']') {
        return None;
    }
    let count: u64 = typ[open + 1..typ.len() - 1].parse().ok()?;
    Some((&typ[..open], count))
}

/// Natural alignment of a type: native integers align to their size,
/// everything else to the gpr size.
pub fn alignment_of(typ: &str) -> u32 {
    if is_pointer(typ) || is_enum(typ) {
        return GPR_SIZE;
    }
    if let Some((elem, _)) = split_array(typ) {
        return alignment_of(elem);
    }
    native_size(typ).unwrap_or(GPR_SIZE)
}

pub fn round_up(n: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (n + align - 1) & !(align - 1)
}

impl Parser<'_> {
    /// Byte size of a type string, resolving named types through the
    /// symbol search.
    pub(crate) fn sizeof_type(&self, typ: &str) -> LyraResult<u32> {
        if is_pointer(typ) {
            return Ok(GPR_SIZE);
        }
        if let Some((elem, count)) = split_array(typ) {
            let elem_size = self.sizeof_type(elem)?;
            let stride = round_up(elem_size, alignment_of(elem));
            return Ok(stride * count as u32);
        }
        if is_funcptr(typ) {
            return Ok(GPR_SIZE);
        }
        if let Some(n) = native_size(typ) {
            return Ok(n);
        }
        if typ == "void" {
            return Ok(0);
        }
        if is_enum(typ) {
            return Ok(GPR_SIZE);
        }
        match self.find_typedef(typ) {
            Some(t) if t.size != 0 => Ok(t.size),
            Some(_) => Err(self.err_semantic(format!("type {typ} is declared but not defined"))),
            None => Err(self.err_semantic(format!("unknown type {typ}"))),
        }
    }

    /// Find a type definition by name across the current function and its
    /// ancestors.
    pub(crate) fn find_typedef(&self, name: &str) -> Option<&TypeDef> {
        let mut func = Some(self.cur);
        while let Some(id) = func {
            let f = self.func(id);
            if let Some(t) = f.types.iter().rev().find(|t| t.name == name) {
                return Some(t);
            }
            func = f.parent;
        }
        None
    }

    /// Resolve one member step `name.field`: the member and its offset
    /// within `typ`, looking through anonymous members.
    pub(crate) fn find_member(&self, typ: &str, field: &str) -> Option<Variable> {
        let t = self.find_typedef(typ)?;
        t.member(field).cloned()
    }

    /// Inline the members of anonymous sub-types into `t`, adding each
    /// holder's offset to the leaves. Recurses so an anonymous type inside
    /// an anonymous type resolves too.
    pub(crate) fn adjust_offsets_of_type_members(&mut self, mut t: TypeDef) -> TypeDef {
        let mut flattened: Vec<Variable> = Vec::with_capacity(t.members.len());
        for member in t.members.drain(..) {
            if member.name.is_empty() && !member.typ.is_empty() {
                // Anonymous member: hoist the sub-type's members, shifted
                // by where the anonymous member itself sits.
                if let Some(sub) = self.find_typedef(&member.typ).cloned() {
                    let sub = self.adjust_offsets_of_type_members(sub);
                    for mut leaf in sub.members {
                        leaf.offset += member.offset;
                        flattened.push(leaf);
                    }
                }
            } else {
                flattened.push(member);
            }
        }
        t.members = flattened;
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Parser, Pass};
    use crate::CompileOptions;
    use lyra_ir::Module;

    #[test]
    fn native_sizes() {
        assert_eq!(native_size("u8"), Some(1));
        assert_eq!(native_size("s64"), Some(8));
        assert_eq!(native_size("uint"), Some(GPR_SIZE));
        assert_eq!(native_size("point"), None);
    }

    #[test]
    fn pointer_and_array_strings() {
        assert!(is_pointer("u8*"));
        assert!(!is_pointer("u8[4]"));
        assert_eq!(split_array("u32[16]"), Some(("u32", 16)));
        assert_eq!(split_array("u32*"), None);
        assert_eq!(pointee("u8**"), "u8*");
    }

    #[test]
    fn function_pointer_strings_are_gpr_sized_addresses() {
        assert!(is_funcptr("uint(uint,u8*)"));
        assert!(is_funcptr("void()"));
        assert!(!is_funcptr("uint(uint)*"));
        assert!(is_pointer("uint(uint)*"));

        let opts = crate::CompileOptions::new("");
        let p = crate::parser::Parser::new(&opts, crate::parser::Pass::Size, None);
        assert_eq!(p.sizeof_type("uint(uint,u8*)").unwrap(), GPR_SIZE);
        assert_eq!(p.sizeof_type("uint(uint&)[4]").unwrap(), 4 * GPR_SIZE);
    }

    #[test]
    fn sizeof_arrays_respects_element_alignment() {
        let opts = CompileOptions::new("");
        let p = Parser::new(&opts, Pass::Size, None);
        assert_eq!(p.sizeof_type("u32[16]").unwrap(), 64);
        assert_eq!(p.sizeof_type("u8[3]").unwrap(), 3);
        assert_eq!(p.sizeof_type("u8*").unwrap(), GPR_SIZE);
    }

    #[test]
    fn anonymous_members_flatten_with_shifted_offsets() {
        let opts = CompileOptions::new("");
        let mut p = Parser::new(&opts, Pass::Size, None);

        let mut inner = TypeDef::new("$anon1");
        inner.size = 8;
        let mut x = Variable::new("x", "u32");
        x.offset = 0;
        let mut y = Variable::new("y", "u32");
        y.offset = 4;
        inner.members = vec![x, y];
        p.func_mut(Module::ROOT).types.push(inner);

        let mut outer = TypeDef::new("wrap");
        outer.size = 12;
        let mut head = Variable::new("head", "u32");
        head.offset = 0;
        let mut anon = Variable::new("", "$anon1");
        anon.offset = 4;
        outer.members = vec![head, anon];

        let flat = p.adjust_offsets_of_type_members(outer);
        let names: Vec<_> = flat.members.iter().map(|m| (m.name.as_str(), m.offset)).collect();
        assert_eq!(names, vec![("head", 0), ("x", 4), ("y", 8)]);
    }
}
