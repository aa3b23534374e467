use anyhow::{bail, Result};
use tracing::trace;

use super::Instr;

/// Initial code heap capacity in bytes.
pub const CODE_HEAP_INIT_SIZE: usize = 1 << 20;

/// Append-only buffer of dispatch records.
///
/// Records are addressed by index. The allocation cursor only moves forward,
/// with one exception: a trailing jump stub may be rewound over so that the
/// jump target's body is laid out in its place. Nothing is ever freed.
pub struct CodeHeap {
    instrs: Vec<Instr>,
    limit: usize,
}

impl CodeHeap {
    pub fn new() -> CodeHeap {
        let limit = CODE_HEAP_INIT_SIZE / std::mem::size_of::<Instr>();
        CodeHeap {
            instrs: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Current allocation cursor, which is also the address the next record
    /// will receive.
    pub fn alloc_pos(&self) -> usize {
        self.instrs.len()
    }

    pub fn write(&mut self, instr: Instr) -> Result<usize> {
        if self.instrs.len() >= self.limit {
            bail!("code heap exhausted");
        }
        let addr = self.instrs.len();
        self.instrs.push(instr);
        Ok(addr)
    }

    pub fn get(&self, addr: usize) -> Option<&Instr> {
        self.instrs.get(addr)
    }

    pub fn instr_mut(&mut self, addr: usize) -> &mut Instr {
        &mut self.instrs[addr]
    }

    /// Rewinds the allocation cursor to `addr`, discarding the records past
    /// it. Only used to overwrite a stub that sits at the end of the heap.
    pub fn rewind(&mut self, addr: usize) {
        trace!(target: "strix::vm::patch", addr, "rewinding code heap over trailing stub");
        self.instrs.truncate(addr);
    }
}

impl Default for CodeHeap {
    fn default() -> CodeHeap {
        CodeHeap::new()
    }
}
