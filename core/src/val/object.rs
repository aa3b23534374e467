use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::{Str, Val};

/// Heap object: insertion-ordered fields addressed by name.
///
/// Every field name is bound to a small slot index that stays stable for the
/// lifetime of the object, which is what makes the in-stream `get_field`
/// caches and the per-name compile-time caches sound.
#[derive(Clone, Default)]
pub struct Obj(Rc<RefCell<ObjData>>);

#[derive(Default)]
struct ObjData {
    names: Vec<Str>,
    vals: Vec<Val>,
}

impl Obj {
    pub fn new() -> Obj {
        Obj::with_capacity(0)
    }

    pub fn with_capacity(cap: usize) -> Obj {
        Obj(Rc::new(RefCell::new(ObjData {
            names: Vec::with_capacity(cap),
            vals: Vec::with_capacity(cap),
        })))
    }

    /// Identity of the object, usable as a cache key.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(&self, other: &Obj) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.0.borrow().names.iter().any(|n| &**n == name)
    }

    pub fn get_field(&self, name: &str) -> Option<Val> {
        let mut slot = 0;
        self.get_field_slot(name, &mut slot)
    }

    /// Slot-cached field read: `slot` is checked first and rewritten on a
    /// miss, so a warmed-up call site never scans the name list.
    pub fn get_field_slot(&self, name: &str, slot: &mut usize) -> Option<Val> {
        let data = self.0.borrow();
        if let Some(n) = data.names.get(*slot) {
            if &**n == name {
                return Some(data.vals[*slot].clone());
            }
        }
        for (i, n) in data.names.iter().enumerate() {
            if &**n == name {
                *slot = i;
                return Some(data.vals[i].clone());
            }
        }
        None
    }

    /// Overwrites an existing field in place (keeping its slot) or appends a
    /// new one at the next slot.
    pub fn set_field<N: Into<Str>>(&self, name: N, val: Val) {
        let name = name.into();
        let mut guard = self.0.borrow_mut();
        let data = &mut *guard;
        for (i, n) in data.names.iter().enumerate() {
            if *n == name {
                data.vals[i] = val;
                return;
            }
        }
        data.names.push(name);
        data.vals.push(val);
    }

    /// Field names in iteration (insertion) order.
    pub fn field_names(&self) -> Vec<Str> {
        self.0.borrow().names.clone()
    }

    pub fn num_fields(&self) -> usize {
        self.0.borrow().names.len()
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Obj@{:x}({} fields)", self.addr(), self.num_fields())
    }
}

/// Heap array: shared, growable, with a logical length distinct from its
/// backing capacity.
#[derive(Clone, Default)]
pub struct Arr(Rc<RefCell<Vec<Val>>>);

impl Arr {
    /// An array of logical length `len`, undef-filled.
    pub fn new(len: usize) -> Arr {
        Arr(Rc::new(RefCell::new(vec![Val::Undef; len])))
    }

    pub fn from_vec(vals: Vec<Val>) -> Arr {
        Arr(Rc::new(RefCell::new(vals)))
    }

    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(&self, other: &Arr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<Val> {
        self.0.borrow().get(idx).cloned()
    }

    /// Writes in place; returns false when `idx` is out of bounds.
    pub fn set(&self, idx: usize, val: Val) -> bool {
        let mut vals = self.0.borrow_mut();
        match vals.get_mut(idx) {
            Some(slot) => {
                *slot = val;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, val: Val) {
        self.0.borrow_mut().push(val);
    }
}

impl fmt::Debug for Arr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arr@{:x}[{}]", self.addr(), self.len())
    }
}
