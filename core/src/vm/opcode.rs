use std::fmt;

use crate::val::{Tag, Val};

use super::{BlockId, CallSite};

/// Branch operand: a stub carries the target's version handle until the
/// first execution patches it to a code address.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum BranchTarget {
    Stub(BlockId),
    Addr(usize),
}

/// One dispatch record in the code heap.
///
/// Immediates live inside the variant. The operands of `Jump`, `IfTrue`,
/// `GetField` and `Call` are mutable at their site: the dispatcher rewrites
/// them in place when patching stubs and warming inline caches.
#[derive(Clone, PartialEq)]
pub enum Instr {
    // Stack manipulation
    Push(Val),
    Pop,
    Dup(u16),
    Swap,

    // Local variable access
    GetLocal(u16),
    SetLocal(u16),

    // 32-bit integer operations
    AddI32,
    SubI32,
    MulI32,
    DivI32,
    ModI32,
    ShlI32,
    ShrI32,
    UshrI32,
    AndI32,
    OrI32,
    XorI32,
    NotI32,
    LtI32,
    LeI32,
    GtI32,
    GeI32,
    EqI32,

    // Floating-point operations
    AddF32,
    SubF32,
    MulF32,
    DivF32,
    LtF32,
    LeF32,
    GtF32,
    GeF32,
    EqF32,
    SinF32,
    CosF32,
    SqrtF32,

    // Conversions
    I32ToF32,
    I32ToStr,
    F32ToI32,
    F32ToStr,
    StrToF32,

    // Miscellaneous
    EqBool,
    HasTag(Tag),
    GetTag,

    // String operations
    StrLen,
    GetChar,
    GetCharCode,
    CharToStr,
    StrCat,
    EqStr,

    // Object operations
    NewObject,
    HasField,
    SetField,
    GetField { slot: usize },
    GetFieldList,
    EqObj,

    // Array operations
    NewArray,
    ArrayLen,
    ArrayPush,
    GetElem,
    SetElem,

    // Branches
    Jump(usize),
    JumpStub(BlockId),
    IfTrue { then_t: BranchTarget, else_t: BranchTarget },
    Call(CallSite),
    Ret,
    Throw,

    Import,
    Abort,
}

impl fmt::Debug for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Push(v) => write!(f, "push {:?}", v),
            Instr::Pop => f.write_str("pop"),
            Instr::Dup(i) => write!(f, "dup {}", i),
            Instr::Swap => f.write_str("swap"),
            Instr::GetLocal(i) => write!(f, "get_local {}", i),
            Instr::SetLocal(i) => write!(f, "set_local {}", i),
            Instr::AddI32 => f.write_str("add_i32"),
            Instr::SubI32 => f.write_str("sub_i32"),
            Instr::MulI32 => f.write_str("mul_i32"),
            Instr::DivI32 => f.write_str("div_i32"),
            Instr::ModI32 => f.write_str("mod_i32"),
            Instr::ShlI32 => f.write_str("shl_i32"),
            Instr::ShrI32 => f.write_str("shr_i32"),
            Instr::UshrI32 => f.write_str("ushr_i32"),
            Instr::AndI32 => f.write_str("and_i32"),
            Instr::OrI32 => f.write_str("or_i32"),
            Instr::XorI32 => f.write_str("xor_i32"),
            Instr::NotI32 => f.write_str("not_i32"),
            Instr::LtI32 => f.write_str("lt_i32"),
            Instr::LeI32 => f.write_str("le_i32"),
            Instr::GtI32 => f.write_str("gt_i32"),
            Instr::GeI32 => f.write_str("ge_i32"),
            Instr::EqI32 => f.write_str("eq_i32"),
            Instr::AddF32 => f.write_str("add_f32"),
            Instr::SubF32 => f.write_str("sub_f32"),
            Instr::MulF32 => f.write_str("mul_f32"),
            Instr::DivF32 => f.write_str("div_f32"),
            Instr::LtF32 => f.write_str("lt_f32"),
            Instr::LeF32 => f.write_str("le_f32"),
            Instr::GtF32 => f.write_str("gt_f32"),
            Instr::GeF32 => f.write_str("ge_f32"),
            Instr::EqF32 => f.write_str("eq_f32"),
            Instr::SinF32 => f.write_str("sin_f32"),
            Instr::CosF32 => f.write_str("cos_f32"),
            Instr::SqrtF32 => f.write_str("sqrt_f32"),
            Instr::I32ToF32 => f.write_str("i32_to_f32"),
            Instr::I32ToStr => f.write_str("i32_to_str"),
            Instr::F32ToI32 => f.write_str("f32_to_i32"),
            Instr::F32ToStr => f.write_str("f32_to_str"),
            Instr::StrToF32 => f.write_str("str_to_f32"),
            Instr::EqBool => f.write_str("eq_bool"),
            Instr::HasTag(t) => write!(f, "has_tag {}", t.name()),
            Instr::GetTag => f.write_str("get_tag"),
            Instr::StrLen => f.write_str("str_len"),
            Instr::GetChar => f.write_str("get_char"),
            Instr::GetCharCode => f.write_str("get_char_code"),
            Instr::CharToStr => f.write_str("char_to_str"),
            Instr::StrCat => f.write_str("str_cat"),
            Instr::EqStr => f.write_str("eq_str"),
            Instr::NewObject => f.write_str("new_object"),
            Instr::HasField => f.write_str("has_field"),
            Instr::SetField => f.write_str("set_field"),
            Instr::GetField { slot } => write!(f, "get_field slot={}", slot),
            Instr::GetFieldList => f.write_str("get_field_list"),
            Instr::EqObj => f.write_str("eq_obj"),
            Instr::NewArray => f.write_str("new_array"),
            Instr::ArrayLen => f.write_str("array_len"),
            Instr::ArrayPush => f.write_str("array_push"),
            Instr::GetElem => f.write_str("get_elem"),
            Instr::SetElem => f.write_str("set_elem"),
            Instr::Jump(a) => write!(f, "jump @{}", a),
            Instr::JumpStub(v) => write!(f, "jump_stub v{}", v.0),
            Instr::IfTrue { then_t, else_t } => {
                write!(f, "if_true {:?} {:?}", then_t, else_t)
            }
            Instr::Call(site) => {
                write!(f, "call n={} ret=v{}", site.num_args, site.ret_ver.0)
            }
            Instr::Ret => f.write_str("ret"),
            Instr::Throw => f.write_str("throw"),
            Instr::Import => f.write_str("import"),
            Instr::Abort => f.write_str("abort"),
        }
    }
}
