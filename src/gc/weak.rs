//! Weak-table and ephemeron handling (§4.6).

use crate::gc::heap::Heap;
use crate::gc::mark::{mark_id, mark_value};
use crate::id::TableId;
use crate::value::Value;

/// Reports whether `id` is still white and clearable from a weak table,
/// with one exception: strings are always considered marked (§4.6 "strings
/// always considered marked — strings behave as values"), matching
/// `iscleared`'s special case for `LUA_VSHRSTR`/`LUA_VLNGSTR` in lgc.c. A
/// white string reached this way is marked live as a side effect rather
/// than reported as clearable, so it is never dropped from a weak table.
fn is_white_id(heap: &mut Heap, id: crate::id::GcId) -> bool {
    use crate::id::GcId;
    if matches!(id, GcId::ShortString(_) | GcId::LongString(_)) {
        mark_id(heap, id);
        return false;
    }
    match id {
        GcId::Table(i) => heap.pool.tables.get(i.0).map(|o| o.header.is_white()),
        GcId::UserData(i) => heap.pool.userdata.get(i.0).map(|o| o.header.is_white()),
        GcId::Prototype(i) => heap.pool.prototypes.get(i.0).map(|o| o.header.is_white()),
        GcId::LuaClosure(i) => heap.pool.lua_closures.get(i.0).map(|o| o.header.is_white()),
        GcId::NativeClosure(i) => heap.pool.native_closures.get(i.0).map(|o| o.header.is_white()),
        GcId::Upvalue(i) => heap.pool.upvalues.get(i.0).map(|o| o.header.is_white()),
        GcId::Thread(i) => heap.pool.threads.get(i.0).map(|o| o.header.is_white()),
        GcId::ShortString(_) | GcId::LongString(_) => unreachable!(),
    }
    .unwrap_or(false)
}

/// Runs the ephemeron fixpoint to convergence (§4.6, §8 property 5):
/// repeat over every table in `heap.ephemeron`, marking values whose key is
/// reachable, until a whole pass makes no progress. Traversal direction
/// alternates each pass to help adversarial chains converge faster (§9).
pub fn converge_ephemerons(heap: &mut Heap) {
    let mut forward = true;
    loop {
        let mut progress = false;
        let tables = heap.ephemeron.clone();
        let order: Vec<TableId> = if forward {
            tables
        } else {
            tables.into_iter().rev().collect()
        };
        for table_id in order {
            let entries: Vec<(Value, Value)> = {
                let Some(t) = heap.pool.tables.get(table_id.0) else {
                    continue;
                };
                t.hash.iter().map(|(k, v)| (*k, *v)).collect()
            };
            for (k, v) in entries {
                let key_live = k.as_gc_id().map(|id| !is_white_id(heap, id)).unwrap_or(true);
                if key_live {
                    let value_white = v.as_gc_id().map(|id| is_white_id(heap, id)).unwrap_or(false);
                    if value_white {
                        mark_value(heap, v);
                        progress = true;
                    }
                }
            }
        }
        if !progress {
            break;
        }
        forward = !forward;
    }

    // Partition post-fixpoint: tables with any remaining white key go to
    // allweak (key+value clearing); others are fully resolved and dropped.
    let tables = std::mem::take(&mut heap.ephemeron);
    for table_id in tables {
        let Some(keys) = heap.pool.tables.get(table_id.0).map(|t| t.hash.keys().copied().collect::<Vec<_>>()) else {
            continue;
        };
        let has_white_key = keys
            .into_iter()
            .any(|k| k.as_gc_id().map(|id| is_white_id(heap, id)).unwrap_or(false));
        if has_white_key {
            heap.allweak.push(table_id);
        }
    }
}

/// `clear_by_values`: drops array/hash entries whose value is unmarked.
pub fn clear_by_values(heap: &mut Heap, tables: &[TableId]) {
    for &table_id in tables {
        let Some(array) = heap.pool.tables.get(table_id.0).map(|t| t.array.clone()) else {
            continue;
        };
        let dead_array: Vec<bool> = array
            .iter()
            .map(|v| v.as_gc_id().map(|id| is_white_id(heap, id)).unwrap_or(false))
            .collect();

        let hash_entries: Vec<(Value, Value)> = heap.pool.tables.get(table_id.0).unwrap().hash.iter().map(|(k, v)| (*k, *v)).collect();
        let dead_keys: Vec<Value> = hash_entries
            .into_iter()
            .filter(|(_, v)| v.as_gc_id().map(|id| is_white_id(heap, id)).unwrap_or(false))
            .map(|(k, _)| k)
            .collect();

        let table = heap.pool.tables.get_mut(table_id.0).unwrap();
        for (slot, dead) in table.array.iter_mut().zip(dead_array) {
            if dead {
                *slot = Value::Nil;
            }
        }
        for k in dead_keys {
            table.hash.remove(&k);
        }
    }
}

/// `clear_by_keys`: drops hash entries whose key is unmarked. Array parts
/// have no notion of a weak key (indices are plain integers), so only the
/// hash part is touched.
pub fn clear_by_keys(heap: &mut Heap, tables: &[TableId]) {
    for &table_id in tables {
        let Some(keys) = heap.pool.tables.get(table_id.0).map(|t| t.hash.keys().copied().collect::<Vec<_>>()) else {
            continue;
        };
        let dead_keys: Vec<Value> = keys
            .into_iter()
            .filter(|k| k.as_gc_id().map(|id| is_white_id(heap, id)).unwrap_or(false))
            .collect();

        let table = heap.pool.tables.get_mut(table_id.0).unwrap();
        for k in dead_keys {
            table.hash.remove(&k);
        }
    }
}
