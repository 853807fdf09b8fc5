use crate::header::GcHeader;
use crate::id::{PrototypeId, ShortStringId};
use crate::value::Value;

/// A function prototype: the GC only needs to see its string/constant/child
/// references (§4.4 "mark source string, constants, upvalue-name strings,
/// nested protos, local-var-name strings"); bytecode itself is opaque.
#[derive(Debug)]
pub struct Prototype {
    pub header: GcHeader,
    pub source: Option<ShortStringId>,
    pub constants: Vec<Value>,
    pub nested: Vec<PrototypeId>,
    pub upvalue_names: Vec<ShortStringId>,
    pub local_names: Vec<ShortStringId>,
    /// Debug-info string table; freed at sweep unless the prototype is fixed.
    pub debug_info: Vec<ShortStringId>,
}

impl Prototype {
    pub fn new(header: GcHeader) -> Self {
        Prototype {
            header,
            source: None,
            constants: Vec::new(),
            nested: Vec::new(),
            upvalue_names: Vec::new(),
            local_names: Vec::new(),
            debug_info: Vec::new(),
        }
    }
}
