use anyhow::{anyhow, bail, Result};

use crate::val::{Arr, Obj, Str, Val};

use super::BlockId;

/// Per-call-site inline cache, embedded in the call's dispatch record.
///
/// The argument count and return version are fixed when the call is
/// compiled; the callee fields track the last function seen at the site and
/// are rewritten in place on a miss.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct CallSite {
    pub num_args: u16,
    pub ret_ver: BlockId,
    /// Identity of the last callee ([`Obj::addr`]).
    pub last_fn: Option<usize>,
    pub entry_ver: Option<BlockId>,
    pub num_locals: u16,
}

impl CallSite {
    pub fn new(num_args: u16, ret_ver: BlockId) -> CallSite {
        CallSite {
            num_args,
            ret_ver,
            last_fn: None,
            entry_ver: None,
            num_locals: 0,
        }
    }
}

/// Slot cache for a field name known at compile time.
///
/// Same semantics as a `get_field` site's in-stream cache, but keyed per
/// name, so repeated reads of `op`, `instrs`, `num_locals` and friends skip
/// the name scan after the first hit against a given layout.
pub struct FieldIc {
    name: Str,
    slot: usize,
}

impl FieldIc {
    pub fn new(name: &str) -> FieldIc {
        FieldIc {
            name: Str::from(name),
            slot: 0,
        }
    }

    pub fn get(&mut self, obj: &Obj) -> Result<Val> {
        obj.get_field_slot(&self.name, &mut self.slot)
            .ok_or_else(|| anyhow!("missing field \"{}\"", &*self.name))
    }

    pub fn get_i32(&mut self, obj: &Obj) -> Result<i32> {
        match self.get(obj)? {
            Val::Int32(i) => Ok(i),
            other => bail!(
                "field \"{}\" is not an int32, got {}",
                &*self.name,
                other.tag().name()
            ),
        }
    }

    pub fn get_str(&mut self, obj: &Obj) -> Result<Str> {
        match self.get(obj)? {
            Val::Str(s) => Ok(s),
            other => bail!(
                "field \"{}\" is not a string, got {}",
                &*self.name,
                other.tag().name()
            ),
        }
    }

    pub fn get_obj(&mut self, obj: &Obj) -> Result<Obj> {
        match self.get(obj)? {
            Val::Obj(o) => Ok(o),
            other => bail!(
                "field \"{}\" is not an object, got {}",
                &*self.name,
                other.tag().name()
            ),
        }
    }

    pub fn get_arr(&mut self, obj: &Obj) -> Result<Arr> {
        match self.get(obj)? {
            Val::Arr(a) => Ok(a),
            other => bail!(
                "field \"{}\" is not an array, got {}",
                &*self.name,
                other.tag().name()
            ),
        }
    }
}

/// One cache per constant field name read by the compiler and dispatcher.
pub struct NamedIcs {
    pub instrs: FieldIc,
    pub op: FieldIc,
    pub val: FieldIc,
    pub idx: FieldIc,
    pub tag: FieldIc,
    pub to: FieldIc,
    pub then_: FieldIc,
    pub else_: FieldIc,
    pub num_args: FieldIc,
    pub ret_to: FieldIc,
    pub throw_to: FieldIc,
    pub entry: FieldIc,
    pub params: FieldIc,
    pub num_locals: FieldIc,
}

impl NamedIcs {
    pub fn new() -> NamedIcs {
        NamedIcs {
            instrs: FieldIc::new("instrs"),
            op: FieldIc::new("op"),
            val: FieldIc::new("val"),
            idx: FieldIc::new("idx"),
            tag: FieldIc::new("tag"),
            to: FieldIc::new("to"),
            then_: FieldIc::new("then"),
            else_: FieldIc::new("else"),
            num_args: FieldIc::new("num_args"),
            ret_to: FieldIc::new("ret_to"),
            throw_to: FieldIc::new("throw_to"),
            entry: FieldIc::new("entry"),
            params: FieldIc::new("params"),
            num_locals: FieldIc::new("num_locals"),
        }
    }
}

impl Default for NamedIcs {
    fn default() -> NamedIcs {
        NamedIcs::new()
    }
}
