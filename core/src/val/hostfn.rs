use std::fmt;

use anyhow::Result;

use crate::vm::Interp;

use super::Val;

pub type Host0 = fn(&mut Interp) -> Result<Val>;
pub type Host1 = fn(&mut Interp, Val) -> Result<Val>;
pub type Host2 = fn(&mut Interp, Val, Val) -> Result<Val>;
pub type Host3 = fn(&mut Interp, Val, Val, Val) -> Result<Val>;

/// Native function callable from bytecode, dispatched by arity (0 to 3).
///
/// Host functions receive the interpreter context and may re-enter the VM
/// through [`Interp::call_fun`]; they run to completion before the call
/// instruction's continuation executes.
pub enum HostFn {
    Fn0(Host0),
    Fn1(Host1),
    Fn2(Host2),
    Fn3(Host3),
}

impl HostFn {
    pub fn num_params(&self) -> usize {
        match self {
            HostFn::Fn0(_) => 0,
            HostFn::Fn1(_) => 1,
            HostFn::Fn2(_) => 2,
            HostFn::Fn3(_) => 3,
        }
    }
}

impl fmt::Debug for HostFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFn/{}", self.num_params())
    }
}
