use anyhow::{anyhow, bail, Result};
use tracing::debug;

use crate::val::{Tag, Val};

use super::{BlockId, BranchTarget, CallSite, Instr, Interp, RetEntry};

impl Interp {
    /// Translates `ver`'s block into a linear run of dispatch records.
    ///
    /// On success the version's `start`/`end` are set, exactly once. Branch
    /// targets are resolved to (possibly uncompiled) block versions; call
    /// sites additionally install their return entry and an instruction
    /// mapping for the unwinder.
    pub(crate) fn compile(&mut self, ver: BlockId) -> Result<()> {
        let (fun, block) = {
            let v = self.registry.version(ver);
            debug_assert!(v.start.is_none(), "block version compiled twice");
            (v.fun.clone(), v.block.clone())
        };

        let instrs = self.ics.instrs.get_arr(&block)?;
        if instrs.is_empty() {
            bail!("empty basic block");
        }

        debug!(
            target: "strix::vm::compile",
            block = block.addr(),
            num_instrs = instrs.len(),
            "compiling block version"
        );

        let start = self.code.alloc_pos();

        for i in 0..instrs.len() {
            let instr = match instrs.get(i) {
                Some(Val::Obj(o)) => o,
                _ => bail!("instruction is not an object"),
            };
            let op = self.ics.op.get_str(&instr)?;

            // Address the record for this instruction will land at.
            let addr = self.code.alloc_pos();

            let record = match &*op {
                "push" => Instr::Push(self.ics.val.get(&instr)?),
                "pop" => Instr::Pop,
                "dup" => Instr::Dup(self.ics.idx.get_i32(&instr)? as u16),
                "swap" => Instr::Swap,
                "get_local" => Instr::GetLocal(self.ics.idx.get_i32(&instr)? as u16),
                "set_local" => Instr::SetLocal(self.ics.idx.get_i32(&instr)? as u16),

                "add_i32" => Instr::AddI32,
                "sub_i32" => Instr::SubI32,
                "mul_i32" => Instr::MulI32,
                "div_i32" => Instr::DivI32,
                "mod_i32" => Instr::ModI32,
                "shl_i32" => Instr::ShlI32,
                "shr_i32" => Instr::ShrI32,
                "ushr_i32" => Instr::UshrI32,
                "and_i32" => Instr::AndI32,
                "or_i32" => Instr::OrI32,
                "xor_i32" => Instr::XorI32,
                "not_i32" => Instr::NotI32,
                "lt_i32" => Instr::LtI32,
                "le_i32" => Instr::LeI32,
                "gt_i32" => Instr::GtI32,
                "ge_i32" => Instr::GeI32,
                "eq_i32" => Instr::EqI32,

                "add_f32" => Instr::AddF32,
                "sub_f32" => Instr::SubF32,
                "mul_f32" => Instr::MulF32,
                "div_f32" => Instr::DivF32,
                "lt_f32" => Instr::LtF32,
                "le_f32" => Instr::LeF32,
                "gt_f32" => Instr::GtF32,
                "ge_f32" => Instr::GeF32,
                "eq_f32" => Instr::EqF32,
                "sin_f32" => Instr::SinF32,
                "cos_f32" => Instr::CosF32,
                "sqrt_f32" => Instr::SqrtF32,

                "i32_to_f32" => Instr::I32ToF32,
                "i32_to_str" => Instr::I32ToStr,
                "f32_to_i32" => Instr::F32ToI32,
                "f32_to_str" => Instr::F32ToStr,
                "str_to_f32" => Instr::StrToF32,

                "eq_bool" => Instr::EqBool,
                "has_tag" => {
                    let name = self.ics.tag.get_str(&instr)?;
                    let tag = Tag::parse(&name)
                        .ok_or_else(|| anyhow!("unknown tag \"{}\"", &*name))?;
                    Instr::HasTag(tag)
                }
                "get_tag" => Instr::GetTag,

                "str_len" => Instr::StrLen,
                "get_char" => Instr::GetChar,
                "get_char_code" => Instr::GetCharCode,
                "char_to_str" => Instr::CharToStr,
                "str_cat" => Instr::StrCat,
                "eq_str" => Instr::EqStr,

                "new_object" => Instr::NewObject,
                "has_field" => Instr::HasField,
                "set_field" => Instr::SetField,
                "get_field" => Instr::GetField { slot: 0 },
                "get_field_list" => Instr::GetFieldList,
                "eq_obj" => Instr::EqObj,

                "new_array" => Instr::NewArray,
                "array_len" => Instr::ArrayLen,
                "array_push" => Instr::ArrayPush,
                "get_elem" => Instr::GetElem,
                "set_elem" => Instr::SetElem,

                "jump" => {
                    let dst_bb = self.ics.to.get_obj(&instr)?;
                    let dst = self.registry.get_version(&fun, &dst_bb);
                    Instr::JumpStub(dst)
                }
                "if_true" => {
                    let then_bb = self.ics.then_.get_obj(&instr)?;
                    let else_bb = self.ics.else_.get_obj(&instr)?;
                    let then_ver = self.registry.get_version(&fun, &then_bb);
                    let else_ver = self.registry.get_version(&fun, &else_bb);
                    Instr::IfTrue {
                        then_t: BranchTarget::Stub(then_ver),
                        else_t: BranchTarget::Stub(else_ver),
                    }
                }
                "call" => {
                    // The unwinder recovers the enclosing function through
                    // this mapping.
                    self.registry.record_instr(addr, ver);

                    let num_args = self.ics.num_args.get_i32(&instr)? as u16;
                    let ret_bb = self.ics.ret_to.get_obj(&instr)?;
                    let ret_ver = self.registry.get_version(&fun, &ret_bb);

                    let exc_ver = if instr.has_field("throw_to") {
                        let throw_bb = self.ics.throw_to.get_obj(&instr)?;
                        Some(self.registry.get_version(&fun, &throw_bb))
                    } else {
                        None
                    };
                    self.registry.set_ret_entry(ret_ver, RetEntry { ret_ver, exc_ver });

                    Instr::Call(CallSite::new(num_args, ret_ver))
                }
                "ret" => Instr::Ret,
                "throw" => {
                    self.registry.record_instr(addr, ver);
                    Instr::Throw
                }
                "import" => Instr::Import,
                "abort" => {
                    // Mapped so abort can report its source position.
                    self.registry.record_instr(addr, ver);
                    Instr::Abort
                }

                unknown => bail!("unhandled opcode in basic block \"{}\"", unknown),
            };

            self.code.write(record)?;
        }

        let end = self.code.alloc_pos();
        let v = self.registry.version_mut(ver);
        v.start = Some(start);
        v.end = end;
        Ok(())
    }
}
