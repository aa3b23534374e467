use std::process;
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::val::{Arr, HostFn, Obj, RawRef, Str, Val};

use super::{BlockId, BranchTarget, CallSite, CodeHeap, Instr, NamedIcs, VersionRegistry};

/// Initial operand stack size in slots.
pub const STACK_INIT_SIZE: usize = 1 << 16;

/// The interpreter context: code heap, operand stack, frame registers,
/// version registry and inline caches.
///
/// One `Interp` is one VM. The stack grows toward lower indices: a push
/// decrements `sp`, local `i` of the active frame lives at `stack[fp - i]`,
/// and the saved caller triple sits just below the locals. Host functions
/// may re-enter the VM through [`Interp::call_fun`]; concurrent dispatch
/// over a shared context is not supported.
pub struct Interp {
    pub(crate) code: CodeHeap,
    pub(crate) registry: VersionRegistry,
    pub(crate) ics: NamedIcs,
    stack: Vec<Val>,
    /// Top-of-stack index; `stack.len()` means empty.
    sp: usize,
    /// Frame register: index of local 0 of the active frame.
    fp: usize,
    /// Next instruction address.
    ip: usize,
    /// Interned single-character strings, indexed by character code.
    char_strings: Vec<Option<Str>>,
    packages: FxHashMap<String, Val>,
}

impl Interp {
    pub fn new() -> Interp {
        Interp {
            code: CodeHeap::new(),
            registry: VersionRegistry::default(),
            ics: NamedIcs::new(),
            stack: vec![Val::Undef; STACK_INIT_SIZE],
            sp: STACK_INIT_SIZE,
            fp: STACK_INIT_SIZE,
            ip: 0,
            char_strings: vec![None; 256],
            packages: FxHashMap::default(),
        }
    }

    /// Makes `pkg` available to the `import` instruction under `name`.
    pub fn register_package(&mut self, name: &str, pkg: Val) {
        self.packages.insert(name.to_string(), pkg);
    }

    /// Number of dispatch records currently in the code heap.
    pub fn code_size(&self) -> usize {
        self.code.alloc_pos()
    }

    /// Number of allocated stack slots.
    pub fn stack_size(&self) -> usize {
        self.stack.len() - self.sp
    }

    // =========================================================================
    // Stack access
    // =========================================================================

    fn push(&mut self, val: Val) -> Result<()> {
        if self.sp == 0 {
            bail!("stack overflow");
        }
        self.sp -= 1;
        self.stack[self.sp] = val;
        Ok(())
    }

    fn push_bool(&mut self, b: bool) -> Result<()> {
        self.push(if b { Val::TRUE } else { Val::FALSE })
    }

    fn pop(&mut self) -> Result<Val> {
        if self.sp == self.stack.len() {
            bail!("stack underflow");
        }
        let val = std::mem::take(&mut self.stack[self.sp]);
        self.sp += 1;
        Ok(val)
    }

    fn pop_bool(&mut self) -> Result<bool> {
        match self.pop()? {
            Val::Bool(b) => Ok(b),
            other => bail!("expected bool value, got {}", other.tag().name()),
        }
    }

    fn pop_i32(&mut self) -> Result<i32> {
        match self.pop()? {
            Val::Int32(i) => Ok(i),
            other => bail!("expected int32 value, got {}", other.tag().name()),
        }
    }

    fn pop_f32(&mut self) -> Result<f32> {
        match self.pop()? {
            Val::Float32(x) => Ok(x),
            other => bail!("expected float32 value, got {}", other.tag().name()),
        }
    }

    fn pop_str(&mut self) -> Result<Str> {
        match self.pop()? {
            Val::Str(s) => Ok(s),
            other => bail!("expected string value, got {}", other.tag().name()),
        }
    }

    fn pop_obj(&mut self) -> Result<Obj> {
        match self.pop()? {
            Val::Obj(o) => Ok(o),
            other => bail!("expected object value, got {}", other.tag().name()),
        }
    }

    fn pop_arr(&mut self) -> Result<Arr> {
        match self.pop()? {
            Val::Arr(a) => Ok(a),
            other => bail!("expected array value, got {}", other.tag().name()),
        }
    }

    fn pop_slot(&mut self) -> Result<usize> {
        match self.pop()? {
            Val::Raw(RawRef::Slot(idx)) => Ok(idx),
            _ => bail!("corrupted stack frame"),
        }
    }

    fn pop_ret(&mut self) -> Result<Option<BlockId>> {
        match self.pop()? {
            Val::Raw(RawRef::Ret(ver)) => Ok(ver),
            _ => bail!("corrupted stack frame"),
        }
    }

    /// The interned one-character string for `c`. Codes below 256 are cached
    /// so repeated `get_char`/`char_to_str` of the same code are
    /// reference-equal.
    fn char_string(&mut self, c: char) -> Str {
        let code = c as usize;
        if code < 256 {
            if let Some(s) = &self.char_strings[code] {
                return s.clone();
            }
            let s = Str::from(c);
            self.char_strings[code] = Some(s.clone());
            return s;
        }
        Str::from(c)
    }

    // =========================================================================
    // Compilation plumbing
    // =========================================================================

    /// Code address of `ver`'s first record, compiling the block on first
    /// request. A compiled version is never compiled again.
    fn ensure_compiled(&mut self, ver: BlockId) -> Result<usize> {
        if let Some(start) = self.registry.version(ver).start {
            return Ok(start);
        }
        self.compile(ver)?;
        self.registry
            .version(ver)
            .start
            .ok_or_else(|| anyhow!("block version failed to compile"))
    }

    /// Source position for the instruction at `addr`, when its block carries
    /// one. Scans the owning block's instruction list in reverse.
    fn get_src_pos(&mut self, addr: usize) -> Option<Val> {
        let owner = self.registry.owner_of(addr)?;
        let block = self.registry.version(owner).block.clone();
        let instrs = self.ics.instrs.get_arr(&block).ok()?;
        for i in (0..instrs.len()).rev() {
            if let Some(Val::Obj(instr)) = instrs.get(i) {
                if let Some(pos) = instr.get_field("src_pos") {
                    return Some(pos);
                }
            }
        }
        None
    }

    /// Renders a `src_pos` object as `file:line:col`.
    fn pos_to_string(pos: &Val) -> String {
        match pos {
            Val::Obj(o) => {
                let file = o
                    .get_field("file")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "?".to_string());
                let line = o
                    .get_field("line")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "?".to_string());
                let col = o
                    .get_field("col")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "?".to_string());
                format!("{}:{}:{}", file, line, col)
            }
            other => other.to_string(),
        }
    }

    fn check_arg_count(
        &mut self,
        call_addr: usize,
        num_params: usize,
        num_args: usize,
    ) -> Result<()> {
        if num_args == num_params {
            return Ok(());
        }
        let prefix = self
            .get_src_pos(call_addr)
            .map(|pos| format!("{} - ", Self::pos_to_string(&pos)))
            .unwrap_or_default();
        bail!(
            "{}incorrect argument count in call, received {}, expected {}",
            prefix,
            num_args,
            num_params
        )
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Calls a user function: verifies the callee against the site's inline
    /// cache, lays out the callee frame and transfers control to its entry
    /// version.
    fn fun_call(&mut self, call_addr: usize, fun: Obj, mut site: CallSite) -> Result<()> {
        if site.last_fn != Some(fun.addr()) {
            let entry_bb = self.ics.entry.get_obj(&fun)?;
            let entry_ver = self.registry.get_version(&fun, &entry_bb);
            self.ensure_compiled(entry_ver)?;

            let num_locals = self.ics.num_locals.get_i32(&fun)?;
            if num_locals < 0 {
                bail!("num_locals must be non-negative");
            }
            let params = self.ics.params.get_arr(&fun)?;
            let num_params = params.len();

            self.check_arg_count(call_addr, num_params, site.num_args as usize)?;

            // The hidden function/closure slot is always present.
            if (num_locals as usize) < num_params + 1 {
                bail!("not enough locals to store function parameters");
            }
            if num_locals as usize > u16::MAX as usize {
                bail!("too many locals in function");
            }

            site.last_fn = Some(fun.addr());
            site.entry_ver = Some(entry_ver);
            site.num_locals = num_locals as u16;
            if let Instr::Call(cached) = self.code.instr_mut(call_addr) {
                *cached = site;
            }
        }

        let num_args = site.num_args as usize;
        let num_locals = site.num_locals as usize;
        let Some(entry_ver) = site.entry_ver else {
            bail!("call site cache not primed");
        };

        if self.sp + num_args < num_locals + 3 {
            bail!("stack overflow in call");
        }

        // The stack pointer the matching return restores (the state with the
        // arguments consumed).
        let prev_sp = self.sp + num_args;
        let prev_fp = self.fp;

        // Local 0 is the first argument.
        self.fp = self.sp + num_args - 1;
        self.stack[self.fp - num_args] = Val::Obj(fun);

        // Pop the arguments, allocate the remaining locals. Locals other
        // than the arguments are left uninitialized; generated code must
        // write them before reading.
        self.sp -= num_locals - num_args;

        self.push(Val::Raw(RawRef::Slot(prev_sp)))?;
        self.push(Val::Raw(RawRef::Slot(prev_fp)))?;
        self.push(Val::Raw(RawRef::Ret(Some(site.ret_ver))))?;

        self.ip = self
            .registry
            .version(entry_ver)
            .start
            .ok_or_else(|| anyhow!("uncompiled entry version at warmed call site"))?;
        Ok(())
    }

    /// Calls a host function: pops the arguments (in push order), runs the
    /// native code to completion, pushes its result and resumes at the
    /// call's return version.
    fn host_call(&mut self, host: Rc<HostFn>, site: CallSite) -> Result<()> {
        let num_args = site.num_args as usize;
        if host.num_params() != num_args {
            bail!(
                "incorrect argument count in host call, received {}, expected {}",
                num_args,
                host.num_params()
            );
        }

        let ret = match &*host {
            HostFn::Fn0(f) => f(self)?,
            HostFn::Fn1(f) => {
                let a0 = self.pop()?;
                f(self, a0)?
            }
            HostFn::Fn2(f) => {
                let a1 = self.pop()?;
                let a0 = self.pop()?;
                f(self, a0, a1)?
            }
            HostFn::Fn3(f) => {
                let a2 = self.pop()?;
                let a1 = self.pop()?;
                let a0 = self.pop()?;
                f(self, a0, a1, a2)?
            }
        };

        self.push(ret)?;
        let start = self.ensure_compiled(site.ret_ver)?;
        self.ip = start;
        Ok(())
    }

    // =========================================================================
    // Exception unwinding
    // =========================================================================

    /// Unwinds saved frames starting at the throw site until a `throw_to`
    /// handler is found. With no handler on the way to the top level the
    /// exception surfaces as a runtime error.
    fn unwind(&mut self, throw_addr: usize, exc: Val) -> Result<()> {
        let owner = self
            .registry
            .owner_of(throw_addr)
            .ok_or_else(|| anyhow!("no block mapping for throw instruction"))?;
        let mut cur_fun = self.registry.version(owner).fun.clone();

        loop {
            let num_locals = self.ics.num_locals.get_i32(&cur_fun)? as usize;

            // Saved caller triple below the locals.
            let prev_sp = match &self.stack[self.fp - num_locals] {
                Val::Raw(RawRef::Slot(idx)) => *idx,
                _ => bail!("corrupted stack frame during unwind"),
            };
            let prev_fp = match &self.stack[self.fp - (num_locals + 1)] {
                Val::Raw(RawRef::Slot(idx)) => *idx,
                _ => bail!("corrupted stack frame during unwind"),
            };
            let ret_ver = match &self.stack[self.fp - (num_locals + 2)] {
                Val::Raw(RawRef::Ret(ver)) => *ver,
                _ => bail!("corrupted stack frame during unwind"),
            };

            let Some(ret_ver) = ret_ver else {
                // Top level reached with no handler.
                let msg = match &exc {
                    Val::Obj(exc_obj) => {
                        let mut msg = String::new();
                        if let Some(pos) = exc_obj.get_field("src_pos") {
                            msg.push_str(&Self::pos_to_string(&pos));
                            msg.push_str(" - ");
                        }
                        match exc_obj.get_field("msg") {
                            Some(m) => msg.push_str(&m.to_string()),
                            None => msg.push_str("uncaught user exception object"),
                        }
                        msg
                    }
                    other => other.to_string(),
                };
                bail!("{}", msg);
            };

            let entry = self
                .registry
                .ret_entry(ret_ver)
                .ok_or_else(|| anyhow!("no return entry for version"))?;
            cur_fun = self.registry.version(entry.ret_ver).fun.clone();

            debug!(target: "strix::vm::unwind", "unwinding frame");
            self.sp = prev_sp;
            self.fp = prev_fp;

            if let Some(exc_ver) = entry.exc_ver {
                self.push(exc)?;
                let start = self.ensure_compiled(exc_ver)?;
                self.ip = start;
                return Ok(());
            }
        }
    }

    // =========================================================================
    // Dispatch loop
    // =========================================================================

    /// Runs until the top-level return, yielding the returned value.
    fn exec(&mut self) -> Result<Val> {
        loop {
            let cur = self.ip;
            self.ip += 1;
            let instr = self
                .code
                .get(cur)
                .ok_or_else(|| anyhow!("instruction pointer out of bounds"))?
                .clone();

            match instr {
                Instr::Push(val) => self.push(val)?,
                Instr::Pop => {
                    self.pop()?;
                }
                Instr::Dup(idx) => {
                    let val = self.stack[self.sp + idx as usize].clone();
                    self.push(val)?;
                }
                Instr::Swap => {
                    let v0 = self.pop()?;
                    let v1 = self.pop()?;
                    self.push(v0)?;
                    self.push(v1)?;
                }

                Instr::GetLocal(idx) => {
                    let val = self.stack[self.fp - idx as usize].clone();
                    self.push(val)?;
                }
                Instr::SetLocal(idx) => {
                    self.stack[self.fp - idx as usize] = self.pop()?;
                }

                // Integer arithmetic wraps; shifts mask the count to 0..31.
                Instr::AddI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push(Val::Int32(a.wrapping_add(b)))?;
                }
                Instr::SubI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push(Val::Int32(a.wrapping_sub(b)))?;
                }
                Instr::MulI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push(Val::Int32(a.wrapping_mul(b)))?;
                }
                Instr::DivI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    if b == 0 {
                        bail!("division by zero");
                    }
                    self.push(Val::Int32(a.wrapping_div(b)))?;
                }
                Instr::ModI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    if b == 0 {
                        bail!("modulo by zero");
                    }
                    self.push(Val::Int32(a.wrapping_rem(b)))?;
                }
                Instr::ShlI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push(Val::Int32(a.wrapping_shl(b as u32)))?;
                }
                Instr::ShrI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push(Val::Int32(a.wrapping_shr(b as u32)))?;
                }
                Instr::UshrI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()? as u32;
                    self.push(Val::Int32(a.wrapping_shr(b as u32) as i32))?;
                }
                Instr::AndI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push(Val::Int32(a & b))?;
                }
                Instr::OrI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push(Val::Int32(a | b))?;
                }
                Instr::XorI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push(Val::Int32(a ^ b))?;
                }
                Instr::NotI32 => {
                    let a = self.pop_i32()?;
                    self.push(Val::Int32(!a))?;
                }
                Instr::LtI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push_bool(a < b)?;
                }
                Instr::LeI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push_bool(a <= b)?;
                }
                Instr::GtI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push_bool(a > b)?;
                }
                Instr::GeI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push_bool(a >= b)?;
                }
                Instr::EqI32 => {
                    let b = self.pop_i32()?;
                    let a = self.pop_i32()?;
                    self.push_bool(a == b)?;
                }

                Instr::AddF32 => {
                    let b = self.pop_f32()?;
                    let a = self.pop_f32()?;
                    self.push(Val::Float32(a + b))?;
                }
                Instr::SubF32 => {
                    let b = self.pop_f32()?;
                    let a = self.pop_f32()?;
                    self.push(Val::Float32(a - b))?;
                }
                Instr::MulF32 => {
                    let b = self.pop_f32()?;
                    let a = self.pop_f32()?;
                    self.push(Val::Float32(a * b))?;
                }
                Instr::DivF32 => {
                    let b = self.pop_f32()?;
                    let a = self.pop_f32()?;
                    self.push(Val::Float32(a / b))?;
                }
                Instr::LtF32 => {
                    let b = self.pop_f32()?;
                    let a = self.pop_f32()?;
                    self.push_bool(a < b)?;
                }
                Instr::LeF32 => {
                    let b = self.pop_f32()?;
                    let a = self.pop_f32()?;
                    self.push_bool(a <= b)?;
                }
                Instr::GtF32 => {
                    let b = self.pop_f32()?;
                    let a = self.pop_f32()?;
                    self.push_bool(a > b)?;
                }
                Instr::GeF32 => {
                    let b = self.pop_f32()?;
                    let a = self.pop_f32()?;
                    self.push_bool(a >= b)?;
                }
                Instr::EqF32 => {
                    let b = self.pop_f32()?;
                    let a = self.pop_f32()?;
                    self.push_bool(a == b)?;
                }
                // Unary float ops go through f64 and truncate back.
                Instr::SinF32 => {
                    let a = self.pop_f32()?;
                    self.push(Val::Float32((a as f64).sin() as f32))?;
                }
                Instr::CosF32 => {
                    let a = self.pop_f32()?;
                    self.push(Val::Float32((a as f64).cos() as f32))?;
                }
                Instr::SqrtF32 => {
                    let a = self.pop_f32()?;
                    self.push(Val::Float32((a as f64).sqrt() as f32))?;
                }

                Instr::I32ToF32 => {
                    let a = self.pop_i32()?;
                    self.push(Val::Float32(a as f32))?;
                }
                Instr::I32ToStr => {
                    let a = self.pop_i32()?;
                    self.push(Val::Str(Str::from(a.to_string())))?;
                }
                Instr::F32ToI32 => {
                    let a = self.pop_f32()?;
                    self.push(Val::Int32(a as i32))?;
                }
                Instr::F32ToStr => {
                    let a = self.pop_f32()?;
                    self.push(Val::Str(Str::from(format!("{:.6}", a))))?;
                }
                Instr::StrToF32 => {
                    let s = self.pop_str()?;
                    let x = s.trim().parse::<f32>().unwrap_or(f32::NAN);
                    self.push(Val::Float32(x))?;
                }

                Instr::EqBool => {
                    let b = self.pop_bool()?;
                    let a = self.pop_bool()?;
                    self.push_bool(a == b)?;
                }
                Instr::HasTag(tag) => {
                    let val = self.pop()?;
                    self.push_bool(val.tag() == tag)?;
                }
                Instr::GetTag => {
                    let val = self.pop()?;
                    self.push(Val::Str(Str::from(val.tag().name())))?;
                }

                Instr::StrLen => {
                    let s = self.pop_str()?;
                    self.push(Val::Int32(s.char_len() as i32))?;
                }
                Instr::GetChar => {
                    let idx = self.pop_i32()?;
                    let s = self.pop_str()?;
                    let c = usize::try_from(idx)
                        .ok()
                        .and_then(|i| s.char_at(i))
                        .ok_or_else(|| anyhow!("get_char, index out of bounds"))?;
                    let ch = self.char_string(c);
                    self.push(Val::Str(ch))?;
                }
                Instr::GetCharCode => {
                    let idx = self.pop_i32()?;
                    let s = self.pop_str()?;
                    let c = usize::try_from(idx)
                        .ok()
                        .and_then(|i| s.char_at(i))
                        .ok_or_else(|| anyhow!("get_char_code, index out of bounds"))?;
                    self.push(Val::Int32(c as i32))?;
                }
                Instr::CharToStr => {
                    let code = self.pop_i32()?;
                    let c = u32::try_from(code)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| anyhow!("char_to_str, invalid character code"))?;
                    let ch = self.char_string(c);
                    self.push(Val::Str(ch))?;
                }
                Instr::StrCat => {
                    let b = self.pop_str()?;
                    let a = self.pop_str()?;
                    self.push(Val::Str(Str::concat(&a, &b)))?;
                }
                Instr::EqStr => {
                    let b = self.pop_str()?;
                    let a = self.pop_str()?;
                    self.push_bool(a == b)?;
                }

                Instr::NewObject => {
                    let cap = self.pop_i32()?;
                    self.push(Val::Obj(Obj::with_capacity(cap.max(0) as usize)))?;
                }
                Instr::HasField => {
                    let name = self.pop_str()?;
                    let obj = self.pop_obj()?;
                    self.push_bool(obj.has_field(&name))?;
                }
                Instr::SetField => {
                    let val = self.pop()?;
                    let name = self.pop_str()?;
                    let obj = self.pop_obj()?;
                    obj.set_field(name, val);
                }
                Instr::GetField { slot } => {
                    let name = self.pop_str()?;
                    let obj = self.pop_obj()?;
                    let mut cached = slot;
                    match obj.get_field_slot(&name, &mut cached) {
                        Some(val) => {
                            if cached != slot {
                                if let Instr::GetField { slot } = self.code.instr_mut(cur) {
                                    *slot = cached;
                                }
                            }
                            self.push(val)?;
                        }
                        None => bail!("get_field failed, missing field \"{}\"", &*name),
                    }
                }
                Instr::GetFieldList => {
                    let obj = self.pop_obj()?;
                    let names = Arr::new(0);
                    for name in obj.field_names() {
                        names.push(Val::Str(name));
                    }
                    self.push(Val::Arr(names))?;
                }
                Instr::EqObj => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push_bool(a.identical(&b))?;
                }

                Instr::NewArray => {
                    let len = self.pop_i32()?;
                    self.push(Val::Arr(Arr::new(len.max(0) as usize)))?;
                }
                Instr::ArrayLen => {
                    let arr = self.pop_arr()?;
                    self.push(Val::Int32(arr.len() as i32))?;
                }
                Instr::ArrayPush => {
                    let val = self.pop()?;
                    let arr = self.pop_arr()?;
                    arr.push(val);
                }
                Instr::GetElem => {
                    let idx = self.pop_i32()?;
                    let arr = self.pop_arr()?;
                    let val = usize::try_from(idx)
                        .ok()
                        .and_then(|i| arr.get(i))
                        .ok_or_else(|| anyhow!("get_elem, index out of bounds"))?;
                    self.push(val)?;
                }
                Instr::SetElem => {
                    let val = self.pop()?;
                    let idx = self.pop_i32()?;
                    let arr = self.pop_arr()?;
                    let ok = usize::try_from(idx)
                        .map(|i| arr.set(i, val))
                        .unwrap_or(false);
                    if !ok {
                        bail!("set_elem, index out of bounds");
                    }
                }

                Instr::Jump(addr) => {
                    self.ip = addr;
                }
                Instr::JumpStub(dst) => {
                    if let Some(start) = self.registry.version(dst).start {
                        debug!(target: "strix::vm::patch", addr = cur, "patching jump");
                        *self.code.instr_mut(cur) = Instr::Jump(start);
                        self.ip = start;
                    } else if cur + 1 == self.code.alloc_pos() {
                        // The stub is the last record in the heap: the jump
                        // is redundant, the target body is laid out over it.
                        self.code.rewind(cur);
                        self.compile(dst)?;
                        self.ip = self
                            .registry
                            .version(dst)
                            .start
                            .ok_or_else(|| anyhow!("block version failed to compile"))?;
                    } else {
                        self.compile(dst)?;
                        let start = self
                            .registry
                            .version(dst)
                            .start
                            .ok_or_else(|| anyhow!("block version failed to compile"))?;
                        *self.code.instr_mut(cur) = Instr::Jump(start);
                        self.ip = start;
                    }
                }
                Instr::IfTrue { then_t, else_t } => {
                    let cond = self.pop()?;
                    let take_then = matches!(cond, Val::Bool(true));
                    let target = if take_then { then_t } else { else_t };
                    let addr = match target {
                        BranchTarget::Addr(addr) => addr,
                        BranchTarget::Stub(ver) => {
                            let start = self.ensure_compiled(ver)?;
                            if let Instr::IfTrue { then_t, else_t } = self.code.instr_mut(cur) {
                                if take_then {
                                    *then_t = BranchTarget::Addr(start);
                                } else {
                                    *else_t = BranchTarget::Addr(start);
                                }
                            }
                            start
                        }
                    };
                    self.ip = addr;
                }

                Instr::Call(site) => {
                    let callee = self.pop()?;
                    if self.stack_size() < site.num_args as usize {
                        bail!("stack underflow at call");
                    }
                    match callee {
                        Val::Obj(fun) => self.fun_call(cur, fun, site)?,
                        Val::HostFn(host) => self.host_call(host, site)?,
                        _ => bail!("invalid callee at call site"),
                    }
                }
                Instr::Ret => {
                    let ret = self.pop()?;
                    let ret_ver = self.pop_ret()?;
                    let prev_fp = self.pop_slot()?;
                    let prev_sp = self.pop_slot()?;
                    self.fp = prev_fp;
                    self.sp = prev_sp;
                    match ret_ver {
                        // Null return version marks the top level.
                        None => return Ok(ret),
                        Some(ver) => {
                            self.push(ret)?;
                            let start = self.ensure_compiled(ver)?;
                            self.ip = start;
                        }
                    }
                }
                Instr::Throw => {
                    let exc = self.pop()?;
                    self.unwind(cur, exc)?;
                }

                Instr::Import => {
                    let name = self.pop_str()?;
                    let pkg = self.import(&name)?;
                    self.push(pkg)?;
                }
                Instr::Abort => {
                    let msg = self.pop_str()?;
                    if let Some(pos) = self.get_src_pos(cur) {
                        print!("{} - ", Self::pos_to_string(&pos));
                    }
                    if msg.is_empty() {
                        println!("aborting execution due to error");
                    } else {
                        println!("aborting execution due to error: {}", &*msg);
                    }
                    process::exit(1);
                }
            }
        }
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Resolves a package previously registered for the `import`
    /// instruction.
    fn import(&self, name: &str) -> Result<Val> {
        self.packages
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("import failed, unknown package \"{}\"", name))
    }

    /// Top-level function invocation. May be re-entered from host functions;
    /// the enclosing activation's instruction pointer is saved on the stack
    /// and restored when the inner call returns.
    pub fn call_fun(&mut self, fun: &Obj, args: &[Val]) -> Result<Val> {
        let params = self.ics.params.get_arr(fun)?;
        let num_params = params.len();
        let num_locals = self.ics.num_locals.get_i32(fun)?;
        if num_locals < 0 {
            bail!("num_locals must be non-negative");
        }
        let num_locals = num_locals as usize;

        if args.len() != num_params {
            bail!("argument count mismatch in top-level call");
        }
        if num_locals < num_params + 1 {
            bail!("not enough locals to store function parameters in top-level call");
        }

        let pre_call_size = self.stack_size();

        // Save the instruction pointer of the enclosing activation.
        self.push(Val::Raw(RawRef::Code(self.ip)))?;

        if num_locals + 3 > self.sp {
            bail!("stack overflow in top-level call");
        }

        let prev_sp = self.sp;
        let prev_fp = self.fp;
        self.fp = self.sp - 1;
        self.sp -= num_locals;

        self.push(Val::Raw(RawRef::Slot(prev_sp)))?;
        self.push(Val::Raw(RawRef::Slot(prev_fp)))?;
        // Null return version: the matching ret terminates exec.
        self.push(Val::Raw(RawRef::Ret(None)))?;

        for (i, arg) in args.iter().enumerate() {
            self.stack[self.fp - i] = arg.clone();
        }
        self.stack[self.fp - num_params] = Val::Obj(fun.clone());

        let entry_bb = self.ics.entry.get_obj(fun)?;
        let entry_ver = self.registry.get_version(fun, &entry_bb);
        self.ip = self.ensure_compiled(entry_ver)?;

        let ret = self.exec()?;

        match self.pop()? {
            Val::Raw(RawRef::Code(saved_ip)) => self.ip = saved_ip,
            _ => bail!("corrupted stack frame after call"),
        }

        if self.stack_size() != pre_call_size {
            bail!("stack size does not match after call termination");
        }

        Ok(ret)
    }

    /// Invokes a function exported by a package, by name.
    pub fn call_export_fn(&mut self, pkg: &Obj, name: &str, args: &[Val]) -> Result<Val> {
        let Some(fn_val) = pkg.get_field(name) else {
            bail!("package does not export function \"{}\"", name);
        };
        let Val::Obj(fun) = fn_val else {
            bail!("field \"{}\" exported by package is not a function", name);
        };
        self.call_fun(&fun, args)
    }
}

impl Default for Interp {
    fn default() -> Interp {
        Interp::new()
    }
}
