//! Write barriers the mutator calls on every black-to-maybe-white store (§4.3).

use crate::gc::heap::{GcMode, GcPhase, Heap};
use crate::gc::mark::mark_id;
use crate::header::Age;
use crate::id::GcId;

fn header_mut<'h>(heap: &'h mut Heap, id: GcId) -> &'h mut crate::header::GcHeader {
    match id {
        GcId::ShortString(i) => &mut heap.pool.short_strings.get_mut(i.0).unwrap().header,
        GcId::LongString(i) => &mut heap.pool.long_strings.get_mut(i.0).unwrap().header,
        GcId::Table(i) => &mut heap.pool.tables.get_mut(i.0).unwrap().header,
        GcId::UserData(i) => &mut heap.pool.userdata.get_mut(i.0).unwrap().header,
        GcId::Prototype(i) => &mut heap.pool.prototypes.get_mut(i.0).unwrap().header,
        GcId::LuaClosure(i) => &mut heap.pool.lua_closures.get_mut(i.0).unwrap().header,
        GcId::NativeClosure(i) => &mut heap.pool.native_closures.get_mut(i.0).unwrap().header,
        GcId::Upvalue(i) => &mut heap.pool.upvalues.get_mut(i.0).unwrap().header,
        GcId::Thread(i) => &mut heap.pool.threads.get_mut(i.0).unwrap().header,
    }
}

/// `barrier_forward(parent, child)`: parent is black, child is (possibly)
/// white. Called for stores into objects that are rarely mutated after
/// construction (closures, upvalues, prototypes) where re-querying to gray
/// would be wasteful.
pub fn barrier_forward(heap: &mut Heap, parent: GcId, child: GcId) {
    if heap.phase.keeps_invariant() {
        mark_id(heap, child);
        if heap.mode != GcMode::Incremental {
            let parent_old = header_mut(heap, parent).is_old();
            if parent_old {
                header_mut(heap, child).set_age(Age::Old0);
            }
        }
        // §7 InvariantViolation: a black object must never point at a white
        // one once a barrier has run.
        debug_assert!(
            !(header_mut(heap, parent).is_black() && header_mut(heap, child).is_white()),
            "tri-color invariant violated after forward barrier"
        );
    } else if heap.phase.is_sweep_phase() {
        let cw = heap.current_white;
        header_mut(heap, parent).make_white(cw);
    }
}

/// `barrier_back(parent)`: parent is black and was just made to point at a
/// white object by some in-place mutation; re-link it into `grayagain`
/// instead of re-marking every child (§4.3, preferred for tables).
pub fn barrier_back(heap: &mut Heap, parent: GcId) {
    let header = header_mut(heap, parent);
    if header.age() == Age::Touched2 {
        header.make_gray();
    } else {
        header.make_gray();
        if header.is_old() || header.age() == Age::Old {
            header.set_age(Age::Touched1);
        }
    }
    heap.grayagain.push(parent);
}

/// Whether a store from `parent` to `child` needs a barrier at all: only
/// when parent is black and child is white (§4.3 preamble).
pub fn needs_barrier(heap: &Heap, parent: GcId, child: Option<GcId>) -> bool {
    let Some(child) = child else { return false };
    let parent_black = match parent {
        GcId::ShortString(i) => heap.pool.short_strings.get(i.0).map(|o| o.header.is_black()),
        GcId::LongString(i) => heap.pool.long_strings.get(i.0).map(|o| o.header.is_black()),
        GcId::Table(i) => heap.pool.tables.get(i.0).map(|o| o.header.is_black()),
        GcId::UserData(i) => heap.pool.userdata.get(i.0).map(|o| o.header.is_black()),
        GcId::Prototype(i) => heap.pool.prototypes.get(i.0).map(|o| o.header.is_black()),
        GcId::LuaClosure(i) => heap.pool.lua_closures.get(i.0).map(|o| o.header.is_black()),
        GcId::NativeClosure(i) => heap.pool.native_closures.get(i.0).map(|o| o.header.is_black()),
        GcId::Upvalue(i) => heap.pool.upvalues.get(i.0).map(|o| o.header.is_black()),
        GcId::Thread(i) => heap.pool.threads.get(i.0).map(|o| o.header.is_black()),
    }
    .unwrap_or(false);
    let child_white = match child {
        GcId::ShortString(i) => heap.pool.short_strings.get(i.0).map(|o| o.header.is_white()),
        GcId::LongString(i) => heap.pool.long_strings.get(i.0).map(|o| o.header.is_white()),
        GcId::Table(i) => heap.pool.tables.get(i.0).map(|o| o.header.is_white()),
        GcId::UserData(i) => heap.pool.userdata.get(i.0).map(|o| o.header.is_white()),
        GcId::Prototype(i) => heap.pool.prototypes.get(i.0).map(|o| o.header.is_white()),
        GcId::LuaClosure(i) => heap.pool.lua_closures.get(i.0).map(|o| o.header.is_white()),
        GcId::NativeClosure(i) => heap.pool.native_closures.get(i.0).map(|o| o.header.is_white()),
        GcId::Upvalue(i) => heap.pool.upvalues.get(i.0).map(|o| o.header.is_white()),
        GcId::Thread(i) => heap.pool.threads.get(i.0).map(|o| o.header.is_white()),
    }
    .unwrap_or(false);
    parent_black && child_white
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::GcHeader;
    use crate::id::Tag;
    use crate::objects::Table;

    fn fresh_table(heap: &mut Heap) -> GcId {
        let header = GcHeader::new(Tag::Table, heap.current_white);
        let id = heap.pool.insert_table(Table::new(header));
        GcId::Table(id)
    }

    #[test]
    fn forward_barrier_marks_white_child_when_invariant_holds() {
        let mut heap = Heap::new();
        let parent = fresh_table(&mut heap);
        let child = fresh_table(&mut heap);
        header_mut(&mut heap, parent).make_black();
        assert!(header_mut(&mut heap, child).is_white());
        barrier_forward(&mut heap, parent, child);
        assert!(!header_mut(&mut heap, child).is_white());
    }

    #[test]
    fn backward_barrier_requeues_parent_as_gray() {
        let mut heap = Heap::new();
        let parent = fresh_table(&mut heap);
        header_mut(&mut heap, parent).make_black();
        barrier_back(&mut heap, parent);
        assert!(header_mut(&mut heap, parent).is_gray());
        assert_eq!(heap.grayagain.len(), 1);
    }
}
