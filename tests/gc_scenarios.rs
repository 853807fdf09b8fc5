//! End-to-end scenarios from spec §8, exercised against the public
//! `Collector` API. Object graphs are wired up by poking the relevant
//! arena slots directly (the mutator-facing table/store API is out of
//! scope for this crate, §1) rather than through write barriers, since
//! every scenario here drives full collections rather than incremental
//! interleaving.

use luagc::gc::finalize::FinalizerHost;
use luagc::gc::heap::Heap;
use luagc::objects::WeakMode;
use luagc::{Age, Collector, GcId, GcMode, Value};

/// A `FinalizerHost` double that records every object it was asked to
/// finalize and, if told to, resurrects one of them by re-rooting it.
#[derive(Default)]
struct RecordingHost {
    invoked: Vec<GcId>,
    resurrect: Option<GcId>,
    released: Vec<Vec<u8>>,
}

impl FinalizerHost for RecordingHost {
    fn invoke_finalizer(&mut self, heap: &mut Heap, obj: GcId) -> Result<(), String> {
        self.invoked.push(obj);
        if self.resurrect == Some(obj) {
            heap.roots.push(obj);
        }
        Ok(())
    }

    fn release_external(&mut self, content: &[u8]) {
        self.released.push(content.to_vec());
    }
}

fn full(collector: &mut Collector, host: &mut RecordingHost) {
    collector.full(host, false).unwrap();
}

// S1 — Acyclic string retention.
#[test]
fn s1_string_survives_while_rooted_then_is_freed() {
    let mut collector = Collector::new();
    let mut host = RecordingHost::default();

    let s = collector.new_short_string(&mut host, "foo", 0xF00).unwrap();
    collector.add_root(GcId::ShortString(s));

    full(&mut collector, &mut host);
    assert!(collector.heap.pool.short_strings.get(s.0).is_some());

    collector.remove_root(GcId::ShortString(s));
    full(&mut collector, &mut host);
    full(&mut collector, &mut host);
    assert!(collector.heap.pool.short_strings.get(s.0).is_none());
}

// S2 — Cyclic table pair.
#[test]
fn s2_cyclic_pair_collected_together_once_unrooted() {
    let mut collector = Collector::new();
    let mut host = RecordingHost::default();

    let t1 = collector.new_table(&mut host).unwrap();
    let t2 = collector.new_table(&mut host).unwrap();
    collector
        .heap
        .pool
        .tables
        .get_mut(t1.0)
        .unwrap()
        .hash
        .insert(Value::Integer(0), Value::Table(t2));
    collector
        .heap
        .pool
        .tables
        .get_mut(t2.0)
        .unwrap()
        .hash
        .insert(Value::Integer(0), Value::Table(t1));
    collector.add_root(GcId::Table(t1));

    full(&mut collector, &mut host);
    assert!(collector.heap.pool.tables.get(t1.0).is_some());
    assert!(collector.heap.pool.tables.get(t2.0).is_some());

    collector.remove_root(GcId::Table(t1));
    full(&mut collector, &mut host);
    assert!(collector.heap.pool.tables.get(t1.0).is_none());
    assert!(collector.heap.pool.tables.get(t2.0).is_none());
}

// S3 — Weak-value table.
#[test]
fn s3_weak_value_table_drops_dead_value_and_entry() {
    let mut collector = Collector::new();
    let mut host = RecordingHost::default();

    let t = collector.new_table(&mut host).unwrap();
    let u = collector.new_userdata(&mut host, Box::new([0u8; 4]), Vec::new()).unwrap();
    {
        let table = collector.heap.pool.tables.get_mut(t.0).unwrap();
        table.weak_mode = WeakMode::WeakValues;
        table.hash.insert(Value::Integer(1), Value::UserData(u));
    }
    collector.add_root(GcId::Table(t));

    full(&mut collector, &mut host);

    assert!(collector.heap.pool.userdata.get(u.0).is_none(), "u should be collected");
    let table = collector.heap.pool.tables.get(t.0).unwrap();
    assert!(
        !table.hash.contains_key(&Value::Integer(1)),
        "dead weak value should be cleared from the table"
    );
}

// S4 — Ephemeron chain.
#[test]
fn s4_ephemeron_chain_retains_all_while_rooted_then_collects_together() {
    let mut collector = Collector::new();
    let mut host = RecordingHost::default();

    let t = collector.new_table(&mut host).unwrap();
    let k1 = collector.new_table(&mut host).unwrap();
    let k2 = collector.new_table(&mut host).unwrap();
    let k3 = collector.new_table(&mut host).unwrap();
    let tail = collector.new_short_string(&mut host, "tail", 0x7A11).unwrap();

    {
        let table = collector.heap.pool.tables.get_mut(t.0).unwrap();
        table.weak_mode = WeakMode::WeakKeys;
        table.hash.insert(Value::Table(k1), Value::Table(k2));
        table.hash.insert(Value::Table(k2), Value::Table(k3));
        table.hash.insert(Value::Table(k3), Value::ShortString(tail));
    }
    collector.add_root(GcId::Table(t));
    collector.add_root(GcId::Table(k1));
    // "tail" is not rooted at all: it is reachable only as an ephemeron
    // value hanging off k3, and strings are always considered marked
    // regardless (§4.6), so it must survive on that rule alone.

    full(&mut collector, &mut host);
    assert!(collector.heap.pool.tables.get(k1.0).is_some());
    assert!(collector.heap.pool.tables.get(k2.0).is_some());
    assert!(collector.heap.pool.tables.get(k3.0).is_some());
    assert!(collector.heap.pool.short_strings.get(tail.0).is_some());

    collector.remove_root(GcId::Table(k1));
    full(&mut collector, &mut host);
    assert!(collector.heap.pool.tables.get(k1.0).is_none());
    assert!(collector.heap.pool.tables.get(k2.0).is_none());
    assert!(collector.heap.pool.tables.get(k3.0).is_none());
    assert!(
        collector.heap.pool.short_strings.get(tail.0).is_some(),
        "strings are always considered marked, even unrooted and otherwise unreachable"
    );
}

// Strings are exempt from weak-value clearing even when unreachable any
// other way (§4.6 "strings always considered marked").
#[test]
fn weak_value_table_never_clears_a_string_value() {
    let mut collector = Collector::new();
    let mut host = RecordingHost::default();

    let t = collector.new_table(&mut host).unwrap();
    let s = collector.new_short_string(&mut host, "ephemeral", 0x5111).unwrap();
    {
        let table = collector.heap.pool.tables.get_mut(t.0).unwrap();
        table.weak_mode = WeakMode::WeakValues;
        table.hash.insert(Value::Integer(1), Value::ShortString(s));
    }
    collector.add_root(GcId::Table(t));
    // `s` is reachable only through this weak-value table's own entry.

    full(&mut collector, &mut host);

    assert!(
        collector.heap.pool.short_strings.get(s.0).is_some(),
        "string values are never cleared from weak tables"
    );
    let table = collector.heap.pool.tables.get(t.0).unwrap();
    assert!(
        table.hash.contains_key(&Value::Integer(1)),
        "entry must survive alongside its exempt string value"
    );
}

// `set_metatable` derives a table's weak mode from a `__mode` string,
// exactly like a host would after reading `__mode` out of the metatable.
#[test]
fn set_metatable_derives_weak_mode_from_mode_string() {
    let mut collector = Collector::new();
    let mut host = RecordingHost::default();

    let t = collector.new_table(&mut host).unwrap();
    let mt = collector.new_table(&mut host).unwrap();
    let u = collector.new_userdata(&mut host, Box::new([0u8; 4]), Vec::new()).unwrap();
    collector
        .heap
        .pool
        .tables
        .get_mut(t.0)
        .unwrap()
        .hash
        .insert(Value::Integer(1), Value::UserData(u));

    collector.set_metatable(t, Some(mt), Some("v"));
    assert_eq!(collector.heap.pool.tables.get(t.0).unwrap().weak_mode, WeakMode::WeakValues);
    assert_eq!(collector.heap.pool.tables.get(t.0).unwrap().metatable, Some(mt));

    collector.add_root(GcId::Table(t));
    full(&mut collector, &mut host);

    assert!(collector.heap.pool.userdata.get(u.0).is_none(), "weak value derived via set_metatable should still clear");
    let table = collector.heap.pool.tables.get(t.0).unwrap();
    assert!(!table.hash.contains_key(&Value::Integer(1)));
}

// S5 — Finalizer with resurrection.
#[test]
fn s5_finalizer_resurrects_once_then_is_not_recalled() {
    let mut collector = Collector::new();
    let mut host = RecordingHost::default();

    let u = collector.new_userdata(&mut host, Box::new([0u8; 8]), Vec::new()).unwrap();
    let id = GcId::UserData(u);
    collector.check_finalizer(id, true);
    host.resurrect = Some(id);

    // Cycle 1: u is unreachable going in, gets finalized, and the host
    // resurrects it by re-rooting it during the finalizer call.
    full(&mut collector, &mut host);
    assert_eq!(host.invoked, vec![id]);
    assert!(collector.heap.pool.userdata.get(u.0).is_some(), "u should survive cycle 1");
    assert!(collector.heap.roots.contains(&id), "host resurrected u into the roots");

    // Cycle 2: drop the resurrecting root. u is unreachable again, but its
    // finalized bit was cleared after the first run, so it is freed
    // directly without being finalized a second time.
    collector.remove_root(id);
    host.resurrect = None;
    full(&mut collector, &mut host);

    assert_eq!(host.invoked.len(), 1, "finalizer must not be called twice");
    assert!(collector.heap.pool.userdata.get(u.0).is_none(), "u should be freed on cycle 2");
}

// S6 — Generational promotion.
#[test]
fn s6_generational_minor_cycles_free_garbage_and_age_survivors() {
    let mut collector = Collector::new();
    let mut host = RecordingHost::default();

    // Switch modes first (on an empty heap, §4.8 "incremental->generational"
    // just runs an empty atomic cycle) so the tables below are allocated,
    // aged, and swept entirely under generational semantics rather than
    // being immediately promoted by the mode-switch's own atomic2gen sweep.
    collector.changemode(GcMode::GenerationalMinor);

    let mut rooted = Vec::new();
    for i in 0..1000 {
        let t = collector.new_table(&mut host).unwrap();
        if i < 100 {
            collector.add_root(GcId::Table(t));
            rooted.push(t);
        }
    }

    for _ in 0..3 {
        // Force each call through regardless of the pacing debt computed
        // by the previous cycle; only the age/liveness outcome is under test.
        collector.heap.accounting.debt = 0;
        collector.step(&mut host).unwrap();
    }

    for &t in &rooted {
        let table = collector.heap.pool.tables.get(t.0).unwrap();
        assert_eq!(table.header.age(), Age::Old, "rooted table should have aged to Old after 3 minor cycles");
    }

    assert_eq!(
        collector.heap.pool.tables.len(),
        rooted.len(),
        "only the 100 rooted tables should survive after young collections"
    );
}

// Externally-allocated long string: release callback fires exactly once,
// at collection time, and not for ordinary (non-external) long strings.
#[test]
fn external_long_string_release_callback_fires_once_on_collection() {
    let mut collector = Collector::new();
    let mut host = RecordingHost::default();

    let external = collector.new_long_string(&mut host, b"payload".to_vec().into_boxed_slice(), true).unwrap();
    let owned = collector.new_long_string(&mut host, b"owned".to_vec().into_boxed_slice(), false).unwrap();
    assert!(host.released.is_empty(), "nothing has been swept yet");

    // Neither string is rooted, so the very first full cycle marks them
    // dead (other-white at sweep time) and frees them.
    full(&mut collector, &mut host);
    assert!(collector.heap.pool.long_strings.get(external.0).is_none());
    assert!(collector.heap.pool.long_strings.get(owned.0).is_none());
    assert_eq!(host.released, vec![b"payload".to_vec()], "only the external string's payload should be released");

    // A second cycle must not call it again — the arena slot is gone.
    full(&mut collector, &mut host);
    assert_eq!(host.released.len(), 1, "release callback must fire exactly once");
}
