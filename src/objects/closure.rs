use crate::header::GcHeader;
use crate::id::{PrototypeId, UpvalueId};
use crate::value::Value;

#[derive(Debug)]
pub struct LuaClosure {
    pub header: GcHeader,
    pub proto: PrototypeId,
    pub upvalues: Vec<UpvalueId>,
}

impl LuaClosure {
    pub fn new(header: GcHeader, proto: PrototypeId, upvalues: Vec<UpvalueId>) -> Self {
        LuaClosure {
            header,
            proto,
            upvalues,
        }
    }
}

/// A closure over a host-provided native function. The function pointer
/// itself carries no GC-visible state; only its captured upvalue *values*
/// (not cells) are traced (§4.4 "Closure (native): mark each upvalue value").
#[derive(Debug)]
pub struct NativeClosure {
    pub header: GcHeader,
    pub upvalues: Vec<Value>,
}

impl NativeClosure {
    pub fn new(header: GcHeader, upvalues: Vec<Value>) -> Self {
        NativeClosure { header, upvalues }
    }
}
