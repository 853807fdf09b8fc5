//! The collector's global state (§2 component 3, §3 "Global collector state").

use crate::alloc::{Allocator, ByteAccounting, InfiniteAllocator};
use crate::config::GcParams;
use crate::id::{GcId, TableId, ThreadId};
use crate::gc::pool::ObjectPool;

/// Collector phase, exact names kept because tests inspect them (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    Pause,
    Propagate,
    EnterAtomic,
    Atomic,
    SweepAllGC,
    SweepFinObj,
    SweepToBeFnz,
    SweepEnd,
    CallFin,
}

impl GcPhase {
    /// `keepinvariant`: the tri-color invariant must hold while this is true,
    /// i.e. every phase up to and including Atomic (§4.3).
    pub fn keeps_invariant(self) -> bool {
        matches!(
            self,
            GcPhase::Pause | GcPhase::Propagate | GcPhase::EnterAtomic | GcPhase::Atomic
        )
    }

    pub fn is_sweep_phase(self) -> bool {
        matches!(
            self,
            GcPhase::SweepAllGC | GcPhase::SweepFinObj | GcPhase::SweepToBeFnz | GcPhase::SweepEnd
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    Incremental,
    GenerationalMinor,
    GenerationalMajor,
}

bitflags::bitflags! {
    /// Control flags (§6): `GCSTPUSR`/`GCSTPGC`/`GCSTPCLS`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StopFlags: u8 {
        const USER = 0b001;
        const FINALIZER = 0b010;
        const CLOSING = 0b100;
    }
}

/// A sweep cursor into one tag's arena. Rebuilt (snapshotted) whenever that
/// list's sweep phase begins, so concurrent `remove` calls during the sweep
/// itself never shift indices out from under the cursor.
#[derive(Debug, Default)]
pub struct SweepCursor {
    pub pending: Vec<crate::id::GcId>,
    pub position: usize,
}

impl SweepCursor {
    pub fn is_done(&self) -> bool {
        self.position >= self.pending.len()
    }
}

pub struct Heap {
    pub pool: ObjectPool,
    pub accounting: ByteAccounting,
    /// Byte-budget gate every `new_*` constructor consults before
    /// committing an allocation (§4.1).
    pub allocator: Box<dyn Allocator>,
    pub params: GcParams,

    pub phase: GcPhase,
    pub mode: GcMode,
    pub current_white: u8,

    /// Objects marked gray, awaiting their first traversal.
    pub gray: Vec<GcId>,
    /// Objects re-queued during atomic (weak-value tables, remarked threads).
    pub grayagain: Vec<GcId>,
    /// Weak-value tables pending clearing at atomic.
    pub weak: Vec<TableId>,
    /// All-weak tables pending key+value clearing at atomic.
    pub allweak: Vec<TableId>,
    /// Weak-key (ephemeron) tables pending fixpoint convergence.
    pub ephemeron: Vec<TableId>,

    /// Explicit per-list membership replaces intrusive `next` pointers.
    pub tobefnz: Vec<GcId>,
    pub twups: Vec<ThreadId>,

    pub sweep_cursor: SweepCursor,

    pub stop: StopFlags,
    pub emergency: bool,

    /// Roots the host registers: registry table, global metatables table,
    /// the running/main thread (§4.4 "Mark roots at cycle start").
    pub roots: Vec<GcId>,

    pub finalizer_warnings: Vec<crate::error::FinalizerError>,
}

impl Heap {
    pub fn new() -> Self {
        Heap::with_allocator(Box::new(InfiniteAllocator))
    }

    pub fn with_allocator(allocator: Box<dyn Allocator>) -> Self {
        Heap {
            pool: ObjectPool::new(),
            accounting: ByteAccounting::new(),
            allocator,
            params: GcParams::default(),
            phase: GcPhase::Pause,
            mode: GcMode::Incremental,
            current_white: 0,
            gray: Vec::new(),
            grayagain: Vec::new(),
            weak: Vec::new(),
            allweak: Vec::new(),
            ephemeron: Vec::new(),
            tobefnz: Vec::new(),
            twups: Vec::new(),
            sweep_cursor: SweepCursor::default(),
            stop: StopFlags::empty(),
            emergency: false,
            roots: Vec::new(),
            finalizer_warnings: Vec::new(),
        }
    }

    #[inline]
    pub fn other_white(&self) -> u8 {
        1 - self.current_white
    }

    #[inline]
    pub fn flip_white(&mut self) {
        self.current_white = self.other_white();
    }

    pub fn is_stopped(&self) -> bool {
        !self.stop.is_empty()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}
