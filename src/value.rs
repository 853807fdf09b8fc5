//! The tagged value type the collector traces through tables, upvalues,
//! stacks and closures. Non-collectable variants are always considered
//! black/marked; only the `Gc*` variants carry a traceable id.

use crate::id::{
    GcId, LongStringId, LuaClosureId, NativeClosureId, ShortStringId, TableId, ThreadId,
    UserDataId,
};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy)]
pub enum Value {
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    ShortString(ShortStringId),
    LongString(LongStringId),
    Table(TableId),
    UserData(UserDataId),
    LuaClosure(LuaClosureId),
    NativeClosure(NativeClosureId),
    Thread(ThreadId),
}

impl Value {
    /// Whether this value is backed by a collectable object at all; the
    /// mark engine only needs to visit values for which this is `Some`.
    #[inline]
    pub fn as_gc_id(self) -> Option<GcId> {
        match self {
            Value::Nil | Value::Bool(_) | Value::Integer(_) | Value::Float(_) => None,
            Value::ShortString(id) => Some(GcId::ShortString(id)),
            Value::LongString(id) => Some(GcId::LongString(id)),
            Value::Table(id) => Some(GcId::Table(id)),
            Value::UserData(id) => Some(GcId::UserData(id)),
            Value::LuaClosure(id) => Some(GcId::LuaClosure(id)),
            Value::NativeClosure(id) => Some(GcId::NativeClosure(id)),
            Value::Thread(id) => Some(GcId::Thread(id)),
        }
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn is_collectable(self) -> bool {
        self.as_gc_id().is_some()
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

/// Table keys hash/compare by bit pattern for floats (so `t[0.0/0.0]` is at
/// least self-consistent) rather than by `PartialEq`, matching how Lua
/// tables treat numbers as hashable keys.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::ShortString(a), Value::ShortString(b)) => a == b,
            (Value::LongString(a), Value::LongString(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::UserData(a), Value::UserData(b)) => a == b,
            (Value::LuaClosure(a), Value::LuaClosure(b)) => a == b,
            (Value::NativeClosure(a), Value::NativeClosure(b)) => a == b,
            (Value::Thread(a), Value::Thread(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Nil => {}
            Value::Bool(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::ShortString(id) => id.hash(state),
            Value::LongString(id) => id.hash(state),
            Value::Table(id) => id.hash(state),
            Value::UserData(id) => id.hash(state),
            Value::LuaClosure(id) => id.hash(state),
            Value::NativeClosure(id) => id.hash(state),
            Value::Thread(id) => id.hash(state),
        }
    }
}
