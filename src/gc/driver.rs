//! Collector driver: the phase state machine and the public operations the
//! host calls (§4.8, §4.9).

use crate::alloc::estimate_object_size;
use crate::error::{FinalizerError, GcError, GcResult};
use crate::gc::barrier;
use crate::gc::finalize::{self, FinalizerHost, CWUFIN};
use crate::gc::heap::{GcMode, GcPhase, Heap, SweepCursor};
use crate::gc::mark;
use crate::gc::sweep::{self, GC_SWEEP_MAX};
use crate::gc::weak;
use crate::header::{GcHeader, ObjList};
use crate::id::{GcId, Tag};
use crate::objects::*;

pub struct Collector {
    pub heap: Heap,
}

impl Collector {
    pub fn new() -> Self {
        Collector { heap: Heap::new() }
    }

    pub fn with_allocator(allocator: Box<dyn crate::alloc::Allocator>) -> Self {
        Collector { heap: Heap::with_allocator(allocator) }
    }

    // ---- §4.9 new_object -------------------------------------------------

    fn next_header(&mut self, tag: Tag) -> GcHeader {
        GcHeader::new(tag, self.heap.current_white)
    }

    /// Clears `size` bytes against the host allocator before committing an
    /// object, retrying once after an emergency collection (§4.1
    /// "Allocation failure triggers an emergency full collection and
    /// retry; persistent failure raises a memory error").
    fn try_alloc(&mut self, host: &mut dyn FinalizerHost, size: usize) -> GcResult<()> {
        if self.heap.allocator.alloc(size) {
            return Ok(());
        }
        self.on_allocation_failure(host)?;
        if self.heap.allocator.alloc(size) {
            Ok(())
        } else {
            Err(GcError::OutOfMemory)
        }
    }

    pub fn new_short_string(
        &mut self,
        host: &mut dyn FinalizerHost,
        content: impl Into<smol_str::SmolStr>,
        hash: u64,
    ) -> GcResult<crate::id::ShortStringId> {
        let size = estimate_object_size(Tag::ShortString, 0, 0, 0);
        self.try_alloc(host, size)?;
        let header = self.next_header(Tag::ShortString);
        self.heap.accounting.record_alloc(size);
        Ok(self.heap.pool.insert_short_string(ShortString::new(header, content, hash)))
    }

    pub fn new_long_string(&mut self, host: &mut dyn FinalizerHost, content: Box<[u8]>, external: bool) -> GcResult<crate::id::LongStringId> {
        let size = estimate_object_size(Tag::LongString, 0, 0, content.len());
        self.try_alloc(host, size)?;
        let header = self.next_header(Tag::LongString);
        self.heap.accounting.record_alloc(size);
        Ok(self.heap.pool.insert_long_string(LongString::new(header, content, external)))
    }

    pub fn new_table(&mut self, host: &mut dyn FinalizerHost) -> GcResult<crate::id::TableId> {
        let size = estimate_object_size(Tag::Table, 0, 0, 0);
        self.try_alloc(host, size)?;
        let header = self.next_header(Tag::Table);
        self.heap.accounting.record_alloc(size);
        Ok(self.heap.pool.insert_table(Table::new(header)))
    }

    pub fn new_userdata(
        &mut self,
        host: &mut dyn FinalizerHost,
        payload: Box<[u8]>,
        user_values: Vec<crate::value::Value>,
    ) -> GcResult<crate::id::UserDataId> {
        let size = estimate_object_size(Tag::UserData, 0, 0, payload.len());
        self.try_alloc(host, size)?;
        let header = self.next_header(Tag::UserData);
        self.heap.accounting.record_alloc(size);
        Ok(self.heap.pool.insert_userdata(UserData::new(header, payload, user_values)))
    }

    pub fn new_prototype(&mut self, host: &mut dyn FinalizerHost) -> GcResult<crate::id::PrototypeId> {
        let size = estimate_object_size(Tag::Prototype, 0, 0, 0);
        self.try_alloc(host, size)?;
        let header = self.next_header(Tag::Prototype);
        self.heap.accounting.record_alloc(size);
        Ok(self.heap.pool.insert_prototype(Prototype::new(header)))
    }

    pub fn new_lua_closure(
        &mut self,
        host: &mut dyn FinalizerHost,
        proto: crate::id::PrototypeId,
        upvalues: Vec<crate::id::UpvalueId>,
    ) -> GcResult<crate::id::LuaClosureId> {
        let size = estimate_object_size(Tag::LuaClosure, 0, 0, upvalues.len());
        self.try_alloc(host, size)?;
        let header = self.next_header(Tag::LuaClosure);
        self.heap.accounting.record_alloc(size);
        Ok(self.heap.pool.insert_lua_closure(LuaClosure::new(header, proto, upvalues)))
    }

    pub fn new_native_closure(&mut self, host: &mut dyn FinalizerHost, upvalues: Vec<crate::value::Value>) -> GcResult<crate::id::NativeClosureId> {
        let size = estimate_object_size(Tag::NativeClosure, 0, 0, upvalues.len());
        self.try_alloc(host, size)?;
        let header = self.next_header(Tag::NativeClosure);
        self.heap.accounting.record_alloc(size);
        Ok(self.heap.pool.insert_native_closure(NativeClosure::new(header, upvalues)))
    }

    pub fn new_closed_upvalue(&mut self, host: &mut dyn FinalizerHost, value: crate::value::Value) -> GcResult<crate::id::UpvalueId> {
        let size = estimate_object_size(Tag::Upvalue, 0, 0, 0);
        self.try_alloc(host, size)?;
        let header = self.next_header(Tag::Upvalue);
        self.heap.accounting.record_alloc(size);
        Ok(self.heap.pool.insert_upvalue(Upvalue::closed(header, value)))
    }

    pub fn new_open_upvalue(
        &mut self,
        host: &mut dyn FinalizerHost,
        thread: crate::id::ThreadId,
        stack_index: usize,
    ) -> GcResult<crate::id::UpvalueId> {
        let size = estimate_object_size(Tag::Upvalue, 0, 0, 0);
        self.try_alloc(host, size)?;
        let header = self.next_header(Tag::Upvalue);
        self.heap.accounting.record_alloc(size);
        Ok(self.heap.pool.insert_upvalue(Upvalue::open(header, thread, stack_index)))
    }

    pub fn new_thread(&mut self, host: &mut dyn FinalizerHost) -> GcResult<crate::id::ThreadId> {
        let size = estimate_object_size(Tag::Thread, 0, 0, 0);
        self.try_alloc(host, size)?;
        let header = self.next_header(Tag::Thread);
        self.heap.accounting.record_alloc(size);
        Ok(self.heap.pool.insert_thread(Thread::new(header)))
    }

    // ---- roots -------------------------------------------------------

    pub fn add_root(&mut self, id: GcId) {
        self.heap.roots.push(id);
    }

    pub fn remove_root(&mut self, id: GcId) {
        self.heap.roots.retain(|r| *r != id);
    }

    // ---- §4.3 barriers -------------------------------------------------

    pub fn barrier(&mut self, parent: GcId, child: GcId) {
        if barrier::needs_barrier(&self.heap, parent, Some(child)) {
            barrier::barrier_forward(&mut self.heap, parent, child);
        }
    }

    pub fn barrier_back(&mut self, parent: GcId) {
        barrier::barrier_back(&mut self.heap, parent);
    }

    /// Sets a table's metatable and, from the `__mode` string the host read
    /// out of it (table-keyed lookup is the host's responsibility, §1), its
    /// weak mode (§4.6). `mode: None` means the metatable carries no `__mode`
    /// key, i.e. an ordinary strong table.
    pub fn set_metatable(&mut self, table: crate::id::TableId, metatable: Option<crate::id::TableId>, mode: Option<&str>) {
        if let Some(mt) = metatable {
            self.barrier(GcId::Table(table), GcId::Table(mt));
        }
        if let Some(t) = self.heap.pool.tables.get_mut(table.0) {
            t.metatable = metatable;
            t.weak_mode = mode.map(crate::objects::WeakMode::from_mode_string).unwrap_or_default();
        }
    }

    // ---- §4.7 ------------------------------------------------------------

    pub fn check_finalizer(&mut self, obj: GcId, has_gc: bool) {
        finalize::check_finalizer(&mut self.heap, obj, has_gc);
    }

    pub fn take_finalizer_warnings(&mut self) -> Vec<FinalizerError> {
        std::mem::take(&mut self.heap.finalizer_warnings)
    }

    // ---- §4.9 step / full / changemode / free_all -------------------------

    pub fn step(&mut self, host: &mut dyn FinalizerHost) -> GcResult<()> {
        if self.heap.is_stopped() {
            return Ok(());
        }
        if !self.heap.accounting.should_step() {
            return Ok(());
        }
        match self.heap.mode {
            GcMode::Incremental => self.incremental_step(host),
            GcMode::GenerationalMinor | GcMode::GenerationalMajor => self.young_collection(host),
        }
        Ok(())
    }

    fn incremental_step(&mut self, host: &mut dyn FinalizerHost) {
        let budget = (self.heap.params.step_size as usize * self.heap.params.step_mul as usize) / 100;
        let mut spent = 0usize;
        loop {
            let cost = self.single_step(host);
            spent += cost.max(1);
            if self.heap.phase == GcPhase::Pause || spent >= budget {
                break;
            }
        }
    }

    /// Runs a complete cycle regardless of debt (§4.9 `full`).
    pub fn full(&mut self, host: &mut dyn FinalizerHost, emergency: bool) -> GcResult<()> {
        if self.heap.is_stopped() {
            return Ok(());
        }
        self.heap.emergency = emergency;
        // Finish any cycle already in flight, then run one complete cycle
        // from Pause through CallFin back to Pause.
        while self.heap.phase != GcPhase::Pause {
            self.single_step(host);
        }
        self.single_step(host); // Pause -> Propagate
        while self.heap.phase != GcPhase::Pause {
            self.single_step(host);
        }
        self.heap.emergency = false;
        Ok(())
    }

    /// Runs the emergency full collection §4.1 prescribes when an
    /// allocation is refused; the caller (`try_alloc`) retries against the
    /// allocator afterwards and only then raises [`GcError::OutOfMemory`]
    /// if the retry still fails.
    pub fn on_allocation_failure(&mut self, host: &mut dyn FinalizerHost) -> GcResult<()> {
        self.full(host, true)
    }

    pub fn changemode(&mut self, mode: GcMode) {
        if mode == self.heap.mode {
            return; // §7 BadMode: same-mode is a no-op
        }
        match (self.heap.mode, mode) {
            (GcMode::Incremental, GcMode::GenerationalMinor) | (GcMode::Incremental, GcMode::GenerationalMajor) => {
                self.enter_generational();
            }
            (GcMode::GenerationalMinor, GcMode::Incremental) | (GcMode::GenerationalMajor, GcMode::Incremental) => {
                self.enter_incremental();
            }
            _ => {}
        }
        self.heap.mode = mode;
    }

    fn enter_generational(&mut self) {
        // run to the end of the current atomic cycle, then sweep everything to Old.
        while self.heap.phase != GcPhase::Pause {
            self.single_step(&mut NullFinalizerHost);
        }
        self.single_step(&mut NullFinalizerHost); // Pause -> Propagate
        mark::propagate_all(&mut self.heap);
        self.heap.phase = GcPhase::EnterAtomic;
        self.run_atomic(&mut NullFinalizerHost);
        sweep::sweep_to_old(&mut self.heap, ObjList::AllGc, &mut NullFinalizerHost);
        sweep::sweep_to_old(&mut self.heap, ObjList::FinObj, &mut NullFinalizerHost);
        self.heap.phase = GcPhase::Pause;
        self.heap.accounting.set_debt(0);
    }

    fn enter_incremental(&mut self) {
        self.heap.grayagain.clear();
        self.heap.weak.clear();
        self.heap.allweak.clear();
        self.heap.ephemeron.clear();
        self.heap.phase = GcPhase::SweepAllGC;
        self.heap.sweep_cursor = SweepCursor {
            pending: sweep::collect_list(&self.heap, ObjList::AllGc),
            position: 0,
        };
    }

    /// `free_all`: shutdown path. Separates and runs every finalizer, then
    /// deletes everything (§4.9).
    pub fn free_all(&mut self, host: &mut dyn FinalizerHost) {
        self.heap.stop.insert(crate::gc::heap::StopFlags::CLOSING);
        finalize::separate_to_be_fnz(&mut self.heap, true);
        while finalize::call_one_finalizer(&mut self.heap, host) {}

        for list in [ObjList::AllGc, ObjList::FinObj, ObjList::ToBeFnz] {
            let ids = sweep::collect_list(&self.heap, list);
            for id in ids {
                free_unconditionally(&mut self.heap, id, host);
            }
        }
    }

    // ---- state machine (§4.8) --------------------------------------------

    fn single_step(&mut self, host: &mut dyn FinalizerHost) -> usize {
        match self.heap.phase {
            GcPhase::Pause => {
                self.heap.gray.clear();
                self.heap.grayagain.clear();
                self.heap.weak.clear();
                self.heap.allweak.clear();
                self.heap.ephemeron.clear();
                self.heap.accounting.gc_marked = 0;
                mark::mark_roots(&mut self.heap);
                self.heap.phase = GcPhase::Propagate;
                1
            }
            GcPhase::Propagate => {
                if self.heap.gray.is_empty() {
                    self.heap.phase = GcPhase::EnterAtomic;
                    0
                } else {
                    mark::propagate_one(&mut self.heap)
                }
            }
            GcPhase::EnterAtomic => {
                self.run_atomic(host);
                self.heap.phase = GcPhase::SweepAllGC;
                self.heap.sweep_cursor = SweepCursor {
                    pending: sweep::collect_list(&self.heap, ObjList::AllGc),
                    position: 0,
                };
                1
            }
            GcPhase::SweepAllGC => {
                if sweep::sweep_step(&mut self.heap, GC_SWEEP_MAX, host) {
                    self.heap.phase = GcPhase::SweepFinObj;
                    self.heap.sweep_cursor = SweepCursor {
                        pending: sweep::collect_list(&self.heap, ObjList::FinObj),
                        position: 0,
                    };
                }
                GC_SWEEP_MAX
            }
            GcPhase::SweepFinObj => {
                if sweep::sweep_step(&mut self.heap, GC_SWEEP_MAX, host) {
                    self.heap.phase = GcPhase::SweepToBeFnz;
                    self.heap.sweep_cursor = SweepCursor {
                        pending: sweep::collect_list(&self.heap, ObjList::ToBeFnz),
                        position: 0,
                    };
                }
                GC_SWEEP_MAX
            }
            GcPhase::SweepToBeFnz => {
                if sweep::sweep_step(&mut self.heap, GC_SWEEP_MAX, host) {
                    self.heap.phase = GcPhase::SweepEnd;
                }
                GC_SWEEP_MAX
            }
            GcPhase::SweepEnd => {
                host.shrink_string_table();
                self.heap.phase = GcPhase::CallFin;
                1
            }
            GcPhase::CallFin => {
                if self.heap.emergency || !finalize::call_one_finalizer(&mut self.heap, host) {
                    self.heap.phase = GcPhase::Pause;
                    self.set_pause();
                    1
                } else {
                    CWUFIN
                }
            }
            GcPhase::Atomic => unreachable!("Atomic runs to completion inside EnterAtomic"),
        }
    }

    /// The atomic phase (§4.8 steps 1-13), run uninterruptibly.
    fn run_atomic(&mut self, host: &mut dyn FinalizerHost) {
        self.heap.phase = GcPhase::Atomic;
        let saved_grayagain = std::mem::take(&mut self.heap.grayagain);

        mark::mark_roots(&mut self.heap);
        mark::propagate_all(&mut self.heap);

        mark::remark_open_upvalues(&mut self.heap);
        mark::propagate_all(&mut self.heap);

        self.heap.gray.extend(saved_grayagain);
        mark::propagate_all(&mut self.heap);

        weak::converge_ephemerons(&mut self.heap);

        let weak_tables = self.heap.weak.clone();
        weak::clear_by_values(&mut self.heap, &weak_tables);

        finalize::separate_to_be_fnz(&mut self.heap, false);
        finalize::mark_being_fnz(&mut self.heap);
        mark::propagate_all(&mut self.heap);

        weak::converge_ephemerons(&mut self.heap);

        let ephemeron_and_allweak = self.heap.allweak.clone();
        weak::clear_by_keys(&mut self.heap, &ephemeron_and_allweak);

        let weak_and_allweak: Vec<_> = self
            .heap
            .weak
            .iter()
            .chain(self.heap.allweak.iter())
            .copied()
            .collect();
        weak::clear_by_values(&mut self.heap, &weak_and_allweak);

        host.trim_string_cache();

        self.heap.flip_white();
    }

    fn set_pause(&mut self) {
        self.heap.accounting.set_pause(self.heap.params.pause);
    }

    // ---- §4.8 generational minor collection -------------------------------

    fn young_collection(&mut self, host: &mut dyn FinalizerHost) {
        self.heap.phase = GcPhase::Propagate;
        // Reset per-cycle marked-byte counter so the minor->major check below
        // reflects bytes promoted *this* cycle, not a running total (§4.8).
        self.heap.accounting.gc_marked = 0;
        mark::mark_roots(&mut self.heap);
        mark::propagate_all(&mut self.heap);
        self.run_atomic(host);

        self.heap.sweep_cursor = SweepCursor {
            pending: sweep::collect_list(&self.heap, ObjList::AllGc),
            position: 0,
        };
        sweep::sweep_step(&mut self.heap, usize::MAX, host);
        self.heap.sweep_cursor = SweepCursor {
            pending: sweep::collect_list(&self.heap, ObjList::FinObj),
            position: 0,
        };
        sweep::sweep_step(&mut self.heap, usize::MAX, host);

        finalize::separate_to_be_fnz(&mut self.heap, false);
        while finalize::call_one_finalizer(&mut self.heap, host) {}

        self.heap.phase = GcPhase::Pause;
        self.heap.accounting.set_debt(
            (self.heap.params.minor_mul as i64 * self.heap.accounting.total_bytes) / 100 * -1,
        );

        let added_old = self.heap.accounting.gc_marked;
        if self.heap.params.minor_major > 0
            && added_old >= (self.heap.params.minor_major as i64 * self.heap.accounting.total_bytes) / 100
        {
            self.heap.mode = GcMode::GenerationalMajor;
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Collector::new()
    }
}

fn free_unconditionally(heap: &mut Heap, id: GcId, host: &mut dyn FinalizerHost) {
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
}

/// Used internally while driving a cycle to completion outside of a host
/// call site (e.g. mode transitions); finalizers never fire during these.
struct NullFinalizerHost;
impl FinalizerHost for NullFinalizerHost {
    fn invoke_finalizer(&mut self, _heap: &mut Heap, _obj: GcId) -> Result<(), String> {
        Ok(())
    }
}
