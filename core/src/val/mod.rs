//! Runtime values: the tagged [`Val`] scalar and its shared containers.

mod hostfn;
mod object;
mod values;

pub use hostfn::{Host0, Host1, Host2, Host3, HostFn};
pub use object::{Arr, Obj};
pub use values::{RawRef, Str, Tag, Val};
