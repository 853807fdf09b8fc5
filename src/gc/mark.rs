//! Tri-color mark/propagation engine (§4.4).

use crate::alloc::estimate_object_size;
use crate::gc::heap::{GcPhase, Heap};
use crate::id::GcId;
use crate::objects::WeakMode;
use crate::value::Value;

/// Marks a value if it refers to a collectable, white object.
pub fn mark_value(heap: &mut Heap, value: Value) {
    if let Some(id) = value.as_gc_id() {
        mark_id(heap, id);
    }
}

pub fn mark_id(heap: &mut Heap, id: GcId) {
    if is_white(heap, id) {
        really_mark(heap, id);
    }
}

fn is_white(heap: &Heap, id: GcId) -> bool {
    header_of(heap, id).map(|h| h.is_white()).unwrap_or(false)
}

fn header_of(heap: &Heap, id: GcId) -> Option<&crate::header::GcHeader> {
    match id {
        GcId::ShortString(i) => heap.pool.short_strings.get(i.0).map(|o| &o.header),
        GcId::LongString(i) => heap.pool.long_strings.get(i.0).map(|o| &o.header),
        GcId::Table(i) => heap.pool.tables.get(i.0).map(|o| &o.header),
        GcId::UserData(i) => heap.pool.userdata.get(i.0).map(|o| &o.header),
        GcId::Prototype(i) => heap.pool.prototypes.get(i.0).map(|o| &o.header),
        GcId::LuaClosure(i) => heap.pool.lua_closures.get(i.0).map(|o| &o.header),
        GcId::NativeClosure(i) => heap.pool.native_closures.get(i.0).map(|o| &o.header),
        GcId::Upvalue(i) => heap.pool.upvalues.get(i.0).map(|o| &o.header),
        GcId::Thread(i) => heap.pool.threads.get(i.0).map(|o| &o.header),
    }
}

/// `reallymark`: §4.4. Leaf kinds are blackened immediately; everything
/// else joins the gray list for later propagation.
fn really_mark(heap: &mut Heap, id: GcId) {
    let tag = id.tag();
    let size = match id {
        GcId::Table(t) => {
            let t = heap.pool.tables.get(t.0).unwrap();
            estimate_object_size(tag, t.array.len(), t.hash.len(), 0)
        }
        _ => estimate_object_size(tag, 0, 0, 0),
    };
    heap.accounting.gc_marked += size as i64;

    match id {
        GcId::ShortString(i) => {
            heap.pool.short_strings.get_mut(i.0).unwrap().header.make_black();
        }
        GcId::LongString(i) => {
            heap.pool.long_strings.get_mut(i.0).unwrap().header.make_black();
        }
        GcId::Upvalue(i) => {
            let value = match heap.pool.upvalues.get(i.0).unwrap().state {
                crate::objects::UpvalueState::Open { .. } => None,
                crate::objects::UpvalueState::Closed(v) => Some(v),
            };
            let is_open = heap.pool.upvalues.get(i.0).unwrap().is_open();
            let upvalue = heap.pool.upvalues.get_mut(i.0).unwrap();
            if is_open {
                upvalue.header.make_gray();
            } else {
                upvalue.header.make_black();
            }
            if let Some(v) = value {
                mark_value(heap, v);
            }
        }
        GcId::UserData(i) => {
            let (metatable, has_values) = {
                let ud = heap.pool.userdata.get(i.0).unwrap();
                (ud.metatable, !ud.user_values.is_empty())
            };
            if has_values {
                heap.pool.userdata.get_mut(i.0).unwrap().header.make_gray();
                heap.gray.push(id);
            } else {
                if let Some(mt) = metatable {
                    mark_id(heap, GcId::Table(mt));
                }
                heap.pool.userdata.get_mut(i.0).unwrap().header.make_black();
            }
        }
        GcId::Table(_) | GcId::LuaClosure(_) | GcId::NativeClosure(_) | GcId::Prototype(_) | GcId::Thread(_) => {
            set_gray(heap, id);
            // §7 InvariantViolation / §4.2: an object must not be queued on
            // two gray lists at once.
            debug_assert!(!heap.grayagain.contains(&id), "object queued on gray while already on grayagain");
            heap.gray.push(id);
        }
    }
}

fn set_gray(heap: &mut Heap, id: GcId) {
    match id {
        GcId::Table(i) => heap.pool.tables.get_mut(i.0).unwrap().header.make_gray(),
        GcId::LuaClosure(i) => heap.pool.lua_closures.get_mut(i.0).unwrap().header.make_gray(),
        GcId::NativeClosure(i) => heap.pool.native_closures.get_mut(i.0).unwrap().header.make_gray(),
        GcId::Prototype(i) => heap.pool.prototypes.get_mut(i.0).unwrap().header.make_gray(),
        GcId::Thread(i) => heap.pool.threads.get_mut(i.0).unwrap().header.make_gray(),
        _ => {}
    }
}

/// Marks every root the collector knows about at cycle start (§4.4): the
/// host-registered roots (registry, global metatables, running thread) plus
/// any objects already parked in `tobefnz` (so their finalizer sees a
/// consistent graph rather than half-collected children).
pub fn mark_roots(heap: &mut Heap) {
    let roots = heap.roots.clone();
    for id in roots {
        mark_id(heap, id);
    }
    let pending_fnz = heap.tobefnz.clone();
    for id in pending_fnz {
        mark_id(heap, id);
    }
}

/// Pops one gray object and traverses it, returning a work-unit estimate
/// for pacing (§9: "heuristic, not measured"). Returns 0 if gray is empty.
pub fn propagate_one(heap: &mut Heap) -> usize {
    let Some(id) = heap.gray.pop() else {
        return 0;
    };
    blacken(heap, id)
}

pub fn propagate_all(heap: &mut Heap) {
    while !heap.gray.is_empty() {
        propagate_one(heap);
    }
}

fn blacken(heap: &mut Heap, id: GcId) -> usize {
    match id {
        GcId::Table(table_id) => traverse_table(heap, table_id),
        GcId::LuaClosure(cid) => {
            let (proto, upvalues) = {
                let c = heap.pool.lua_closures.get(cid.0).unwrap();
                (c.proto, c.upvalues.clone())
            };
            mark_id(heap, GcId::Prototype(proto));
            for uv in &upvalues {
                mark_id(heap, GcId::Upvalue(*uv));
            }
            heap.pool.lua_closures.get_mut(cid.0).unwrap().header.make_black();
            1 + upvalues.len()
        }
        GcId::NativeClosure(cid) => {
            let values = heap.pool.native_closures.get(cid.0).unwrap().upvalues.clone();
            for v in &values {
                mark_value(heap, *v);
            }
            heap.pool.native_closures.get_mut(cid.0).unwrap().header.make_black();
            1 + values.len()
        }
        GcId::Prototype(pid) => {
            let (source, constants, nested, upvalue_names, local_names, debug_info) = {
                let p = heap.pool.prototypes.get(pid.0).unwrap();
                (
                    p.source,
                    p.constants.clone(),
                    p.nested.clone(),
                    p.upvalue_names.clone(),
                    p.local_names.clone(),
                    p.debug_info.clone(),
                )
            };
            if let Some(s) = source {
                mark_id(heap, GcId::ShortString(s));
            }
            for c in &constants {
                mark_value(heap, *c);
            }
            for n in &nested {
                mark_id(heap, GcId::Prototype(*n));
            }
            for names in [&upvalue_names, &local_names, &debug_info] {
                for s in names {
                    mark_id(heap, GcId::ShortString(*s));
                }
            }
            heap.pool.prototypes.get_mut(pid.0).unwrap().header.make_black();
            1 + constants.len() + nested.len()
        }
        GcId::Thread(tid) => traverse_thread(heap, tid),
        GcId::UserData(uid) => {
            let (metatable, user_values) = {
                let u = heap.pool.userdata.get(uid.0).unwrap();
                (u.metatable, u.user_values.clone())
            };
            if let Some(mt) = metatable {
                mark_id(heap, GcId::Table(mt));
            }
            for v in &user_values {
                mark_value(heap, *v);
            }
            heap.pool.userdata.get_mut(uid.0).unwrap().header.make_black();
            1 + user_values.len()
        }
        GcId::ShortString(_) | GcId::LongString(_) | GcId::Upvalue(_) => 1,
    }
}

/// Dispatches a table into strong/weak-value/weak-key/all-weak traversal
/// per its `__mode` (§4.6).
fn traverse_table(heap: &mut Heap, id: crate::id::TableId) -> usize {
    let (metatable, weak_mode, array_len, hash_len) = {
        let t = heap.pool.tables.get(id.0).unwrap();
        (t.metatable, t.weak_mode, t.array.len(), t.hash.len())
    };
    if let Some(mt) = metatable {
        mark_id(heap, GcId::Table(mt));
    }

    match weak_mode {
        WeakMode::AllWeak => {
            heap.allweak.push(id);
        }
        WeakMode::WeakKeys => {
            heap.ephemeron.push(id);
        }
        WeakMode::WeakValues => {
            // Keys are strong; mark them now and revisit values at atomic.
            let keys: Vec<Value> = heap.pool.tables.get(id.0).unwrap().hash.keys().copied().collect();
            for k in keys {
                mark_value(heap, k);
            }
            heap.weak.push(id);
            heap.grayagain.push(GcId::Table(id));
        }
        WeakMode::Strong => {
            let array: Vec<Value> = heap.pool.tables.get(id.0).unwrap().array.clone();
            for v in &array {
                mark_value(heap, *v);
            }
            let entries: Vec<(Value, Value)> = heap
                .pool
                .tables
                .get(id.0)
                .unwrap()
                .hash
                .iter()
                .map(|(k, v)| (*k, *v))
                .collect();
            for (k, v) in entries {
                mark_value(heap, k);
                mark_value(heap, v);
            }
        }
    }

    heap.pool.tables.get_mut(id.0).unwrap().header.make_black();
    1 + 2 * hash_len + array_len
}

/// Thread traversal (§4.4). During `Propagate` a thread is re-queued on
/// `grayagain` for a final revisit at atomic, since its stack can still
/// change between steps; old threads get the same treatment so a barrier
/// doesn't need to fire for every stack write.
fn traverse_thread(heap: &mut Heap, id: crate::id::ThreadId) -> usize {
    let requeue = {
        let t = heap.pool.threads.get(id.0).unwrap();
        t.header.is_old() || heap.phase == GcPhase::Propagate
    };
    if requeue {
        heap.grayagain.push(GcId::Thread(id));
    }

    let (stack, open_upvalues) = {
        let t = heap.pool.threads.get(id.0).unwrap();
        (t.live_stack().to_vec(), t.open_upvalues.clone())
    };
    for v in &stack {
        mark_value(heap, *v);
    }
    for uv in &open_upvalues {
        mark_id(heap, GcId::Upvalue(*uv));
    }

    if heap.phase == GcPhase::Atomic {
        shrink_dead_stack_region(heap, id);
        if !open_upvalues.is_empty() && !heap.pool.threads.get(id.0).unwrap().in_twups {
            heap.pool.threads.get_mut(id.0).unwrap().in_twups = true;
            heap.twups.push(id);
        }
    }

    if !requeue {
        heap.pool.threads.get_mut(id.0).unwrap().header.make_black();
    }
    1 + stack.len() + open_upvalues.len()
}

fn shrink_dead_stack_region(heap: &mut Heap, id: crate::id::ThreadId) {
    if heap.emergency {
        return;
    }
    let thread = heap.pool.threads.get_mut(id.0).unwrap();
    let top = thread.top;
    for slot in thread.stack.iter_mut().skip(top) {
        *slot = Value::Nil;
    }
}

/// `remarkupvals` (§4.4): walks `twups`, dropping threads that no longer
/// have open upvalues and re-marking the upvalue values of threads that are
/// reachable only through those upvalues but haven't been traced this pass.
pub fn remark_open_upvalues(heap: &mut Heap) {
    let threads = std::mem::take(&mut heap.twups);
    let mut kept = Vec::with_capacity(threads.len());
    for tid in threads {
        let Some(thread) = heap.pool.threads.get(tid.0) else {
            continue;
        };
        if thread.open_upvalues.is_empty() {
            heap.pool.threads.get_mut(tid.0).unwrap().in_twups = false;
            continue;
        }
        let marked = header_of(heap, GcId::Thread(tid)).map(|h| !h.is_white()).unwrap_or(false);
        if !marked {
            let upvalues = heap.pool.threads.get(tid.0).unwrap().open_upvalues.clone();
            for uv in upvalues {
                if let Some(Some(v)) = heap.pool.upvalues.get(uv.0).map(|u| match u.state {
                    crate::objects::UpvalueState::Closed(v) => Some(v),
                    crate::objects::UpvalueState::Open { .. } => None,
                }) {
                    mark_value(heap, v);
                }
            }
        }
        kept.push(tid);
    }
    heap.twups = kept;
}
