use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use crate::vm::BlockId;

use super::{Arr, HostFn, Obj};

/// Immutable shared string. Cloning bumps a refcount; `==` compares content.
/// Identity ([`Str::ptr_eq`]) matters for the interned single-character
/// strings handed out by `get_char` and `char_to_str`.
#[derive(Clone)]
pub struct Str(Rc<str>);

impl Str {
    pub fn ptr_eq(&self, other: &Str) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Number of characters. String indexing is character-based, so this is
    /// what `str_len` reports, not the byte length.
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn char_at(&self, idx: usize) -> Option<char> {
        self.0.chars().nth(idx)
    }

    pub fn concat(a: &Str, b: &Str) -> Str {
        let mut s = String::with_capacity(a.0.len() + b.0.len());
        s.push_str(&a.0);
        s.push_str(&b.0);
        Str::from(s)
    }
}

impl Deref for Str {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Str {
    fn from(s: &str) -> Str {
        Str(Rc::from(s))
    }
}

impl From<String> for Str {
    fn from(s: String) -> Str {
        Str(Rc::from(s.as_str()))
    }
}

impl From<char> for Str {
    fn from(c: char) -> Str {
        let mut buf = [0u8; 4];
        Str::from(&*c.encode_utf8(&mut buf))
    }
}

impl PartialEq for Str {
    fn eq(&self, other: &Str) -> bool {
        self.0 == other.0
    }
}

impl Eq for Str {}

impl PartialEq<str> for Str {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl fmt::Display for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// Type tag carried by every [`Val`], retrievable at runtime via `get_tag`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Tag {
    Undef,
    Bool,
    Int32,
    Float32,
    Str,
    Obj,
    Arr,
    HostFn,
    Raw,
}

static TAG_BY_NAME: Lazy<FxHashMap<&'static str, Tag>> = Lazy::new(|| {
    let mut m = FxHashMap::default();
    m.insert("undef", Tag::Undef);
    m.insert("bool", Tag::Bool);
    m.insert("int32", Tag::Int32);
    m.insert("float32", Tag::Float32);
    m.insert("string", Tag::Str);
    m.insert("object", Tag::Obj);
    m.insert("array", Tag::Arr);
    m.insert("hostfn", Tag::HostFn);
    m.insert("rawptr", Tag::Raw);
    m
});

impl Tag {
    pub fn name(self) -> &'static str {
        match self {
            Tag::Undef => "undef",
            Tag::Bool => "bool",
            Tag::Int32 => "int32",
            Tag::Float32 => "float32",
            Tag::Str => "string",
            Tag::Obj => "object",
            Tag::Arr => "array",
            Tag::HostFn => "hostfn",
            Tag::Raw => "rawptr",
        }
    }

    pub fn parse(name: &str) -> Option<Tag> {
        TAG_BY_NAME.get(name).copied()
    }
}

/// Saved interpreter state stored on the value stack as a tagged raw
/// pointer. Stack slots, return versions and code addresses each get their
/// own shape so that a corrupted frame is detected instead of misread.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RawRef {
    /// Saved stack or frame index.
    Slot(usize),
    /// Return continuation version; `None` marks the top-level frame.
    Ret(Option<BlockId>),
    /// Saved instruction address, used by re-entrant `call_fun`.
    Code(usize),
}

/// A tagged runtime value.
///
/// Heap variants (`Str`, `Obj`, `Arr`, `HostFn`) are shared by refcount; the
/// VM is single-threaded, so sharing is `Rc`-based. `Raw` never escapes the
/// interpreter: it only appears in saved frame metadata on the value stack.
#[derive(Clone, Default)]
pub enum Val {
    #[default]
    Undef,
    Bool(bool),
    Int32(i32),
    Float32(f32),
    Str(Str),
    Obj(Obj),
    Arr(Arr),
    HostFn(Rc<HostFn>),
    Raw(RawRef),
}

impl Val {
    pub const TRUE: Val = Val::Bool(true);
    pub const FALSE: Val = Val::Bool(false);

    pub fn tag(&self) -> Tag {
        match self {
            Val::Undef => Tag::Undef,
            Val::Bool(_) => Tag::Bool,
            Val::Int32(_) => Tag::Int32,
            Val::Float32(_) => Tag::Float32,
            Val::Str(_) => Tag::Str,
            Val::Obj(_) => Tag::Obj,
            Val::Arr(_) => Tag::Arr,
            Val::HostFn(_) => Tag::HostFn,
            Val::Raw(_) => Tag::Raw,
        }
    }

    pub fn is_obj(&self) -> bool {
        matches!(self, Val::Obj(_))
    }

    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Val::Obj(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&Str> {
        match self {
            Val::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Word equality: scalars by value, heap values by identity. This is the
    /// semantics of `eq_obj`, which compares arbitrary values without
    /// looking through container contents.
    pub fn identical(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Undef, Val::Undef) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int32(a), Val::Int32(b)) => a == b,
            (Val::Float32(a), Val::Float32(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a.ptr_eq(b),
            (Val::Obj(a), Val::Obj(b)) => a.ptr_eq(b),
            (Val::Arr(a), Val::Arr(b)) => a.ptr_eq(b),
            (Val::HostFn(a), Val::HostFn(b)) => Rc::ptr_eq(a, b),
            (Val::Raw(a), Val::Raw(b)) => a == b,
            _ => false,
        }
    }
}

// Structural equality for assertions and host code: strings compare by
// content, containers and host functions by identity.
impl PartialEq for Val {
    fn eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Str(a), Val::Str(b)) => a == b,
            _ => self.identical(other),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Undef => f.write_str("undef"),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Int32(i) => write!(f, "{}", i),
            Val::Float32(x) => write!(f, "{:.6}", x),
            Val::Str(s) => f.write_str(s),
            Val::Obj(_) => f.write_str("object"),
            Val::Arr(_) => f.write_str("array"),
            Val::HostFn(_) => f.write_str("hostfn"),
            Val::Raw(_) => f.write_str("rawptr"),
        }
    }
}

impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Str(s) => write!(f, "{:?}", s),
            Val::Obj(o) => write!(f, "object@{:x}", o.addr()),
            Val::Arr(a) => write!(f, "array[{}]", a.len()),
            Val::Raw(r) => write!(f, "raw {:?}", r),
            other => write!(f, "{}", other),
        }
    }
}
