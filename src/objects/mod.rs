//! Contract types for every collectable object kind (§3 entity table).
//!
//! Each type carries exactly the fields the mark/sweep/barrier engines need
//! to visit; application-level payload (bytecode semantics, table hashing
//! strategy, string interning policy) is out of scope and left as opaque
//! blobs or host callbacks.

mod closure;
mod proto;
mod string;
mod table;
mod thread;
mod upvalue;
mod userdata;

pub use closure::{LuaClosure, NativeClosure};
pub use proto::Prototype;
pub use string::{LongString, ShortString};
pub use table::{Table, WeakMode};
pub use thread::Thread;
pub use upvalue::{Upvalue, UpvalueState};
pub use userdata::UserData;
