//! Typed handles into the heap's per-kind arenas.
//!
//! Every collectable object is addressed through one of these newtypes
//! rather than a raw pointer. [`Arena`](crate::pool::Arena) slots are
//! reused on free, so an id can go stale across a sweep; callers that hold
//! one across a collection step must re-validate through [`crate::pool::ObjectPool`].

use std::fmt;

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

typed_id!(ShortStringId);
typed_id!(LongStringId);
typed_id!(TableId);
typed_id!(UserDataId);
typed_id!(PrototypeId);
typed_id!(LuaClosureId);
typed_id!(NativeClosureId);
typed_id!(UpvalueId);
typed_id!(ThreadId);

/// Type tag shared by every collectable object, stored in [`crate::header::GcHeader`]
/// and used to dispatch mark/sweep/barrier logic without a vtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    ShortString,
    LongString,
    Table,
    UserData,
    Prototype,
    LuaClosure,
    NativeClosure,
    Upvalue,
    Thread,
}

impl Tag {
    pub const ALL: [Tag; 9] = [
        Tag::ShortString,
        Tag::LongString,
        Tag::Table,
        Tag::UserData,
        Tag::Prototype,
        Tag::LuaClosure,
        Tag::NativeClosure,
        Tag::Upvalue,
        Tag::Thread,
    ];

    /// Objects that can only ever be black or white: they have no outgoing
    /// references a barrier would need to chase, so `reallymark` blackens
    /// them on the spot instead of queuing them on the gray list.
    pub fn is_leaf(self) -> bool {
        matches!(self, Tag::ShortString | Tag::LongString)
    }

    /// Whether this kind can participate in a metatable's weak mode as a
    /// table (only tables carry `__mode`; other gray kinds are always strong).
    pub fn is_table(self) -> bool {
        matches!(self, Tag::Table)
    }
}

/// A type-erased handle to any collectable object, used on gray/weak lists
/// and anywhere the mark/sweep engine must hold "some object" generically.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcId {
    ShortString(ShortStringId),
    LongString(LongStringId),
    Table(TableId),
    UserData(UserDataId),
    Prototype(PrototypeId),
    LuaClosure(LuaClosureId),
    NativeClosure(NativeClosureId),
    Upvalue(UpvalueId),
    Thread(ThreadId),
}

impl GcId {
    pub fn tag(self) -> Tag {
        match self {
            GcId::ShortString(_) => Tag::ShortString,
            GcId::LongString(_) => Tag::LongString,
            GcId::Table(_) => Tag::Table,
            GcId::UserData(_) => Tag::UserData,
            GcId::Prototype(_) => Tag::Prototype,
            GcId::LuaClosure(_) => Tag::LuaClosure,
            GcId::NativeClosure(_) => Tag::NativeClosure,
            GcId::Upvalue(_) => Tag::Upvalue,
            GcId::Thread(_) => Tag::Thread,
        }
    }
}

impl From<TableId> for GcId {
    fn from(id: TableId) -> Self {
        GcId::Table(id)
    }
}
impl From<ThreadId> for GcId {
    fn from(id: ThreadId) -> Self {
        GcId::Thread(id)
    }
}
impl From<UpvalueId> for GcId {
    fn from(id: UpvalueId) -> Self {
        GcId::Upvalue(id)
    }
}
impl From<UserDataId> for GcId {
    fn from(id: UserDataId) -> Self {
        GcId::UserData(id)
    }
}
impl From<PrototypeId> for GcId {
    fn from(id: PrototypeId) -> Self {
        GcId::Prototype(id)
    }
}
impl From<LuaClosureId> for GcId {
    fn from(id: LuaClosureId) -> Self {
        GcId::LuaClosure(id)
    }
}
impl From<NativeClosureId> for GcId {
    fn from(id: NativeClosureId) -> Self {
        GcId::NativeClosure(id)
    }
}
impl From<ShortStringId> for GcId {
    fn from(id: ShortStringId) -> Self {
        GcId::ShortString(id)
    }
}
impl From<LongStringId> for GcId {
    fn from(id: LongStringId) -> Self {
        GcId::LongString(id)
    }
}
