pub(super) use std::rc::Rc;

pub(super) use crate::val::{Arr, HostFn, Obj, Str, Val};
pub(super) use crate::vm::{Instr, Interp};

/// Builds an instruction object: `instr("push").with("val", int(7))`.
pub(super) fn instr(op: &str) -> Obj {
    let o = Obj::new();
    o.set_field("op", Val::Str(Str::from(op)));
    o
}

pub(super) trait WithField {
    fn with(self, name: &str, val: Val) -> Obj;
}

impl WithField for Obj {
    fn with(self, name: &str, val: Val) -> Obj {
        self.set_field(name, val);
        self
    }
}

/// An empty basic block object. Blocks form cycles (loops, recursion), so
/// they sometimes must exist before their instruction lists do; fill them
/// with [`set_instrs`].
pub(super) fn bb() -> Obj {
    Obj::new()
}

pub(super) fn set_instrs(block: &Obj, instrs: Vec<Obj>) {
    let vals = instrs.into_iter().map(Val::Obj).collect();
    block.set_field("instrs", Val::Arr(Arr::from_vec(vals)));
}

pub(super) fn block(instrs: Vec<Obj>) -> Obj {
    let b = bb();
    set_instrs(&b, instrs);
    b
}

pub(super) fn fun(num_params: usize, num_locals: i32, entry: &Obj) -> Obj {
    let f = Obj::new();
    f.set_field("entry", Val::Obj(entry.clone()));
    f.set_field("params", Val::Arr(Arr::new(num_params)));
    f.set_field("num_locals", Val::Int32(num_locals));
    f
}

pub(super) fn pkg(exports: &[(&str, &Obj)]) -> Obj {
    let p = Obj::new();
    for (name, f) in exports {
        p.set_field(*name, Val::Obj((*f).clone()));
    }
    p
}

pub(super) fn int(i: i32) -> Val {
    Val::Int32(i)
}

pub(super) fn float(x: f32) -> Val {
    Val::Float32(x)
}

pub(super) fn s(v: &str) -> Val {
    Val::Str(Str::from(v))
}

pub(super) fn push(v: Val) -> Obj {
    instr("push").with("val", v)
}

pub(super) fn get_local(i: i32) -> Obj {
    instr("get_local").with("idx", int(i))
}

pub(super) fn set_local(i: i32) -> Obj {
    instr("set_local").with("idx", int(i))
}

pub(super) fn jump(to: &Obj) -> Obj {
    instr("jump").with("to", Val::Obj(to.clone()))
}

pub(super) fn if_true(then_bb: &Obj, else_bb: &Obj) -> Obj {
    instr("if_true")
        .with("then", Val::Obj(then_bb.clone()))
        .with("else", Val::Obj(else_bb.clone()))
}

pub(super) fn call(num_args: i32, ret_to: &Obj) -> Obj {
    instr("call")
        .with("num_args", int(num_args))
        .with("ret_to", Val::Obj(ret_to.clone()))
}

pub(super) fn call_catch(num_args: i32, ret_to: &Obj, throw_to: &Obj) -> Obj {
    call(num_args, ret_to).with("throw_to", Val::Obj(throw_to.clone()))
}

pub(super) fn host(h: HostFn) -> Val {
    Val::HostFn(Rc::new(h))
}

/// Runs a one-block, zero-parameter function in a fresh interpreter.
pub(super) fn run(entry_instrs: Vec<Obj>) -> anyhow::Result<Val> {
    let f = fun(0, 1, &block(entry_instrs));
    Interp::new().call_fun(&f, &[])
}

pub(super) fn run_ok(entry_instrs: Vec<Obj>) -> Val {
    run(entry_instrs).unwrap()
}

pub(super) fn run_err(entry_instrs: Vec<Obj>) -> String {
    run(entry_instrs).unwrap_err().to_string()
}

mod control_flow;
mod inline_cache;
