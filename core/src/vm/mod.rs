//! The execution core: code heap, block-version registry, block compiler
//! and the threaded-dispatch interpreter.
//!
//! Blocks are compiled lazily: a branch compiled before its target exists
//! carries a stub holding the target's [`BlockId`]; the dispatcher patches
//! the stub in place on first execution.

mod blocks;
mod caches;
mod compiler;
mod heap;
mod interp;
mod opcode;

pub use blocks::{BlockId, BlockVersion, RetEntry, VersionRegistry};
pub use caches::{CallSite, FieldIc, NamedIcs};
pub use heap::{CodeHeap, CODE_HEAP_INIT_SIZE};
pub use interp::{Interp, STACK_INIT_SIZE};
pub use opcode::{BranchTarget, Instr};

#[cfg(test)]
mod vm_test;
