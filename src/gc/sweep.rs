//! Sweep engine: bounded-work freeing with two-white alternation (§4.5).

use crate::gc::finalize::FinalizerHost;
use crate::gc::heap::{GcMode, Heap};
use crate::header::Age;
use crate::id::GcId;
use crate::objects::UpvalueState;

/// Recommended default from §4.5: "20 per step is a recommended constant".
pub const GC_SWEEP_MAX: usize = 20;

/// Collects every currently-live id belonging to `list`, across all nine
/// arenas, as a flat snapshot a cursor can consume a bounded slice of per
/// step without indices shifting under it (§9 arena+index scheme).
pub fn collect_list(heap: &Heap, list: crate::header::ObjList) -> Vec<GcId> {
    let mut out = Vec::new();
    for (idx, obj) in heap.pool.short_strings.iter() {
        if obj.header.list == list {
            out.push(GcId::ShortString(crate::id::ShortStringId(idx)));
        }
    }
    for (idx, obj) in heap.pool.long_strings.iter() {
        if obj.header.list == list {
            out.push(GcId::LongString(crate::id::LongStringId(idx)));
        }
    }
    for (idx, obj) in heap.pool.tables.iter() {
        if obj.header.list == list {
            out.push(GcId::Table(crate::id::TableId(idx)));
        }
    }
    for (idx, obj) in heap.pool.userdata.iter() {
        if obj.header.list == list {
            out.push(GcId::UserData(crate::id::UserDataId(idx)));
        }
    }
    for (idx, obj) in heap.pool.prototypes.iter() {
        if obj.header.list == list {
            out.push(GcId::Prototype(crate::id::PrototypeId(idx)));
        }
    }
    for (idx, obj) in heap.pool.lua_closures.iter() {
        if obj.header.list == list {
            out.push(GcId::LuaClosure(crate::id::LuaClosureId(idx)));
        }
    }
    for (idx, obj) in heap.pool.native_closures.iter() {
        if obj.header.list == list {
            out.push(GcId::NativeClosure(crate::id::NativeClosureId(idx)));
        }
    }
    for (idx, obj) in heap.pool.upvalues.iter() {
        if obj.header.list == list {
            out.push(GcId::Upvalue(crate::id::UpvalueId(idx)));
        }
    }
    for (idx, obj) in heap.pool.threads.iter() {
        if obj.header.list == list {
            out.push(GcId::Thread(crate::id::ThreadId(idx)));
        }
    }
    out
}

fn header_is_dead(heap: &Heap, id: GcId, other_white: u8) -> bool {
    use GcId::*;
    match id {
        ShortString(i) => heap.pool.short_strings.get(i.0).map(|o| o.header.is_dead(other_white)),
        LongString(i) => heap.pool.long_strings.get(i.0).map(|o| o.header.is_dead(other_white)),
        Table(i) => heap.pool.tables.get(i.0).map(|o| o.header.is_dead(other_white)),
        UserData(i) => heap.pool.userdata.get(i.0).map(|o| o.header.is_dead(other_white)),
        Prototype(i) => heap.pool.prototypes.get(i.0).map(|o| o.header.is_dead(other_white)),
        LuaClosure(i) => heap.pool.lua_closures.get(i.0).map(|o| o.header.is_dead(other_white)),
        NativeClosure(i) => heap.pool.native_closures.get(i.0).map(|o| o.header.is_dead(other_white)),
        Upvalue(i) => heap.pool.upvalues.get(i.0).map(|o| o.header.is_dead(other_white)),
        Thread(i) => heap.pool.threads.get(i.0).map(|o| o.header.is_dead(other_white)),
    }
    .unwrap_or(true)
}

fn estimated_size(heap: &Heap, id: GcId) -> usize {
    use crate::alloc::estimate_object_size;
    match id {
        GcId::Table(i) => {
            let t = heap.pool.tables.get(i.0).unwrap();
            estimate_object_size(id.tag(), t.array.len(), t.hash.len(), 0)
        }
        GcId::LongString(i) => {
            let s = heap.pool.long_strings.get(i.0).unwrap();
            estimate_object_size(id.tag(), 0, 0, s.content.len())
        }
        _ => estimate_object_size(id.tag(), 0, 0, 0),
    }
}

/// Removes a dead object from its arena, running its release callback if it
/// carries external payload (§5). Returns its estimated freed byte count.
fn free_object(heap: &mut Heap, id: GcId, host: &mut dyn FinalizerHost) -> usize {
    let size = estimated_size(heap, id);
    match id {
        GcId::ShortString(i) => {
            heap.pool.short_strings.remove(i.0);
        }
        GcId::LongString(i) => {
            if let Some(s) = heap.pool.long_strings.remove(i.0) {
                if s.external {
                    host.release_external(&s.content);
                }
            }
        }
        GcId::Table(i) => {
            heap.pool.tables.remove(i.0);
        }
        GcId::UserData(i) => {
            heap.pool.userdata.remove(i.0);
        }
        GcId::Prototype(i) => {
            heap.pool.prototypes.remove(i.0);
        }
        GcId::LuaClosure(i) => {
            heap.pool.lua_closures.remove(i.0);
        }
        GcId::NativeClosure(i) => {
            heap.pool.native_closures.remove(i.0);
        }
        GcId::Upvalue(i) => {
            heap.pool.upvalues.remove(i.0);
        }
        GcId::Thread(i) => {
            heap.pool.threads.remove(i.0);
        }
    }
    heap.allocator.free(size);
    size
}

fn set_header_age(heap: &mut Heap, id: GcId, age: Age) {
    use GcId::*;
    match id {
        ShortString(i) => heap.pool.short_strings.get_mut(i.0).unwrap().header.set_age(age),
        LongString(i) => heap.pool.long_strings.get_mut(i.0).unwrap().header.set_age(age),
        Table(i) => heap.pool.tables.get_mut(i.0).unwrap().header.set_age(age),
        UserData(i) => heap.pool.userdata.get_mut(i.0).unwrap().header.set_age(age),
        Prototype(i) => heap.pool.prototypes.get_mut(i.0).unwrap().header.set_age(age),
        LuaClosure(i) => heap.pool.lua_closures.get_mut(i.0).unwrap().header.set_age(age),
        NativeClosure(i) => heap.pool.native_closures.get_mut(i.0).unwrap().header.set_age(age),
        Upvalue(i) => heap.pool.upvalues.get_mut(i.0).unwrap().header.set_age(age),
        Thread(i) => heap.pool.threads.get_mut(i.0).unwrap().header.set_age(age),
    }
}

fn make_header_white(heap: &mut Heap, id: GcId, current_white: u8) {
    use GcId::*;
    match id {
        ShortString(i) => heap.pool.short_strings.get_mut(i.0).unwrap().header.make_white(current_white),
        LongString(i) => heap.pool.long_strings.get_mut(i.0).unwrap().header.make_white(current_white),
        Table(i) => heap.pool.tables.get_mut(i.0).unwrap().header.make_white(current_white),
        UserData(i) => heap.pool.userdata.get_mut(i.0).unwrap().header.make_white(current_white),
        Prototype(i) => heap.pool.prototypes.get_mut(i.0).unwrap().header.make_white(current_white),
        LuaClosure(i) => heap.pool.lua_closures.get_mut(i.0).unwrap().header.make_white(current_white),
        NativeClosure(i) => heap.pool.native_closures.get_mut(i.0).unwrap().header.make_white(current_white),
        Upvalue(i) => heap.pool.upvalues.get_mut(i.0).unwrap().header.make_white(current_white),
        Thread(i) => heap.pool.threads.get_mut(i.0).unwrap().header.make_white(current_white),
    }
}

fn header_age(heap: &Heap, id: GcId) -> Age {
    use GcId::*;
    match id {
        ShortString(i) => heap.pool.short_strings.get(i.0).unwrap().header.age(),
        LongString(i) => heap.pool.long_strings.get(i.0).unwrap().header.age(),
        Table(i) => heap.pool.tables.get(i.0).unwrap().header.age(),
        UserData(i) => heap.pool.userdata.get(i.0).unwrap().header.age(),
        Prototype(i) => heap.pool.prototypes.get(i.0).unwrap().header.age(),
        LuaClosure(i) => heap.pool.lua_closures.get(i.0).unwrap().header.age(),
        NativeClosure(i) => heap.pool.native_closures.get(i.0).unwrap().header.age(),
        Upvalue(i) => heap.pool.upvalues.get(i.0).unwrap().header.age(),
        Thread(i) => heap.pool.threads.get(i.0).unwrap().header.age(),
    }
}

/// Advances the shared cursor by at most `GCSWEEPMAX` objects. Returns
/// `true` once the cursor has been fully drained.
pub fn sweep_step(heap: &mut Heap, max: usize, host: &mut dyn FinalizerHost) -> bool {
    let other_white = heap.other_white();
    let current_white = heap.current_white;
    let generational = heap.mode != GcMode::Incremental;
    let mut processed = 0;
    while processed < max {
        if heap.sweep_cursor.is_done() {
            return true;
        }
        let id = heap.sweep_cursor.pending[heap.sweep_cursor.position];
        heap.sweep_cursor.position += 1;
        processed += 1;

        if header_is_dead(heap, id, other_white) {
            let freed = free_object(heap, id, host);
            heap.accounting.record_free(freed);
        } else if generational {
            let age = header_age(heap, id).advance();
            set_header_age(heap, id, age);
        } else {
            set_header_age(heap, id, Age::New);
            make_header_white(heap, id, current_white);
        }
    }
    heap.sweep_cursor.is_done()
}

/// `sweep2old` / `atomic2gen`: forces every survivor straight to `Old` when
/// entering generational mode, so the next minor cycle has a stable
/// old-generation baseline to barrier against.
pub fn sweep_to_old(heap: &mut Heap, list: crate::header::ObjList, host: &mut dyn FinalizerHost) {
    let ids = collect_list(heap, list);
    let other_white = heap.other_white();
    for id in ids {
        if header_is_dead(heap, id, other_white) {
            let freed = free_object(heap, id, host);
            heap.accounting.record_free(freed);
            continue;
        }
        match id {
            GcId::Thread(_) => {
                heap.grayagain.push(id);
            }
            GcId::Upvalue(uid) => {
                let is_open = heap
                    .pool
                    .upvalues
                    .get(uid.0)
                    .map(|u| matches!(u.state, UpvalueState::Open { .. }))
                    .unwrap_or(false);
                if !is_open {
                    set_black(heap, id);
                }
            }
            _ => set_black(heap, id),
        }
        set_header_age(heap, id, Age::Old);
    }
}

fn set_black(heap: &mut Heap, id: GcId) {
    use GcId::*;
    match id {
        ShortString(i) => heap.pool.short_strings.get_mut(i.0).unwrap().header.make_black(),
        LongString(i) => heap.pool.long_strings.get_mut(i.0).unwrap().header.make_black(),
        Table(i) => heap.pool.tables.get_mut(i.0).unwrap().header.make_black(),
        UserData(i) => heap.pool.userdata.get_mut(i.0).unwrap().header.make_black(),
        Prototype(i) => heap.pool.prototypes.get_mut(i.0).unwrap().header.make_black(),
        LuaClosure(i) => heap.pool.lua_closures.get_mut(i.0).unwrap().header.make_black(),
        NativeClosure(i) => heap.pool.native_closures.get_mut(i.0).unwrap().header.make_black(),
        Upvalue(i) => heap.pool.upvalues.get_mut(i.0).unwrap().header.make_black(),
        Thread(i) => heap.pool.threads.get_mut(i.0).unwrap().header.make_black(),
    }
}
