//! Finalizer subsystem (§4.7): separation, resurrection, `GCTM` dispatch.

use crate::error::FinalizerError;
use crate::gc::heap::{GcMode, Heap};
use crate::gc::mark::mark_id;
use crate::gc::sweep;
use crate::header::{Age, ObjList};
use crate::id::GcId;

/// Work-unit cost of one finalizer call, for the driver's step budget (§4.7).
pub const CWUFIN: usize = 10;

/// Contract the host must implement to actually run a `__gc` metamethod.
/// The collector core never calls Lua code itself (out of scope, §1); it
/// only decides *when* and *on what* to call it.
pub trait FinalizerHost {
    /// `heap` is passed through so a finalizer can resurrect its argument
    /// (e.g. by pushing it back onto `heap.roots`, §8 S5) without the
    /// collector needing a callback-into-interpreter of its own.
    fn invoke_finalizer(&mut self, heap: &mut Heap, obj: GcId) -> Result<(), String>;

    /// Atomic step 12 (§4.8): gives the host's string interner a chance to
    /// drop entries whose only reference was the table itself, now that
    /// mark is complete. Default no-op so hosts that don't intern strings
    /// need not implement it.
    fn trim_string_cache(&mut self) {}

    /// `SweepEnd` (§4.8 "Shrink string table if <= 1/4 full"): distinct from
    /// [`trim_string_cache`](Self::trim_string_cache) — this is a resize of
    /// the interner's own hash table, decided by the host's load factor.
    fn shrink_string_table(&mut self) {}

    /// Release callback for an externally-allocated long string's payload
    /// (§3 "LongString... optionally externally allocated + dealloc
    /// callback", §5 "externally malloc'd long strings receive a release
    /// callback invocation before their header is freed"). Called once,
    /// right before the `LongString`'s arena slot is dropped, only when
    /// that string was constructed with `external = true`. Default no-op
    /// for hosts whose long strings are always crate-owned.
    fn release_external(&mut self, _content: &[u8]) {}
}

fn header_mut_tag(heap: &mut Heap, id: GcId) -> &mut crate::header::GcHeader {
    use GcId::*;
    match id {
        ShortString(i) => &mut heap.pool.short_strings.get_mut(i.0).unwrap().header,
        LongString(i) => &mut heap.pool.long_strings.get_mut(i.0).unwrap().header,
        Table(i) => &mut heap.pool.tables.get_mut(i.0).unwrap().header,
        UserData(i) => &mut heap.pool.userdata.get_mut(i.0).unwrap().header,
        Prototype(i) => &mut heap.pool.prototypes.get_mut(i.0).unwrap().header,
        LuaClosure(i) => &mut heap.pool.lua_closures.get_mut(i.0).unwrap().header,
        NativeClosure(i) => &mut heap.pool.native_closures.get_mut(i.0).unwrap().header,
        Upvalue(i) => &mut heap.pool.upvalues.get_mut(i.0).unwrap().header,
        Thread(i) => &mut heap.pool.threads.get_mut(i.0).unwrap().header,
    }
}

/// `check_finalizer(L, obj, mt)`: called by the mutator when it sets a
/// metatable with `__gc` on a not-yet-finalized object. `has_gc` stands in
/// for "mt has a non-nil __gc entry", which is the host's concern to resolve.
pub fn check_finalizer(heap: &mut Heap, obj: GcId, has_gc: bool) {
    if !has_gc || heap.stop.contains(crate::gc::heap::StopFlags::CLOSING) {
        return;
    }
    {
        let header = header_mut_tag(heap, obj);
        if header.to_finalize() {
            return;
        }
        header.set_finalized();
    }

    if heap.phase.is_sweep_phase() {
        let cw = heap.current_white;
        header_mut_tag(heap, obj).make_white(cw);
    }

    header_mut_tag(heap, obj).list = ObjList::FinObj;
}

/// `separate_to_be_fnz(all?)`: moves finalizable objects that are
/// unreachable (or every one, if `all`) from `finobj` into `tobefnz`.
pub fn separate_to_be_fnz(heap: &mut Heap, all: bool) {
    let candidates = sweep::collect_list(heap, ObjList::FinObj);
    for id in candidates {
        let white = header_mut_tag(heap, id).is_white();
        if all || white {
            header_mut_tag(heap, id).list = ObjList::ToBeFnz;
            heap.tobefnz.push(id);
        }
    }
}

/// `mark_being_fnz`: every object about to be finalized is marked so its
/// finalizer observes a fully-live object graph, supporting resurrection.
pub fn mark_being_fnz(heap: &mut Heap) {
    let pending = heap.tobefnz.clone();
    for id in pending {
        mark_id(heap, id);
    }
}

/// `GCTM`: pops and runs exactly one pending finalizer, under a reentrancy
/// guard, swallowing and recording any error (§7 FinalizerError policy).
/// Returns `true` if a finalizer ran.
pub fn call_one_finalizer(heap: &mut Heap, host: &mut dyn FinalizerHost) -> bool {
    if heap.emergency {
        return false;
    }
    let Some(id) = heap.tobefnz.first().copied() else {
        return false;
    };
    heap.tobefnz.remove(0);

    header_mut_tag(heap, id).list = ObjList::AllGc;
    header_mut_tag(heap, id).clear_finalized();
    if heap.mode == GcMode::Incremental {
        let cw = heap.current_white;
        header_mut_tag(heap, id).make_white(cw);
    } else {
        header_mut_tag(heap, id).set_age(Age::Old1);
    }

    heap.stop.insert(crate::gc::heap::StopFlags::FINALIZER);
    let result = host.invoke_finalizer(heap, id);
    heap.stop.remove(crate::gc::heap::StopFlags::FINALIZER);

    if let Err(message) = result {
        heap.finalizer_warnings.push(FinalizerError { object: id, message });
    }
    true
}
