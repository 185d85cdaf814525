//! Test Utilities for the gcroot Test Suite
//!
//! Heap fixtures with known answers, plus strict path checks.
//!
//! ============================================================================
//! Every fixture documents the roots and paths it is built to contain.
//! ============================================================================

#![allow(dead_code)]

use gcroot::heap::{HeapSnapshot, HeapSnapshotBuilder, RootKind, StackFrame, ThreadRef};
use gcroot::{Address, HeapGraphView, ObjectPath, ObjectReference, ObjectType, RootRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// First heap segment
pub const SEGMENT_A: (Address, Address) = (0x1000_0000, 0x1010_0000);

/// Second heap segment, far away from the first
pub const SEGMENT_B: (Address, Address) = (0x7f00_0000_0000, 0x7f00_0010_0000);

/// Object stride inside fixtures
pub const OBJECT_STRIDE: u64 = 0x20;

/// Address of the `i`-th fixture object in segment A
pub fn obj(i: u64) -> Address {
    SEGMENT_A.0 + i * OBJECT_STRIDE
}

/// Address of the `i`-th fixture object in segment B
pub fn far_obj(i: u64) -> Address {
    SEGMENT_B.0 + i * OBJECT_STRIDE
}

fn builder() -> HeapSnapshotBuilder {
    HeapSnapshotBuilder::new()
        .segment(SEGMENT_A.0, SEGMENT_A.1)
        .segment(SEGMENT_B.0, SEGMENT_B.1)
}

/// A heap with a known source and target
pub struct Scenario {
    pub heap: Arc<HeapSnapshot>,
    pub source: Address,
    pub target: Address,
}

/// ============================================================================
/// SCENARIOS
/// ============================================================================

/// Target kept alive by a pinned static and by a thread-local variable
///
/// ```text
/// pinned static ─► Holder(0) ─► Object[](1) ─► Target(3)
/// local (tid 7) ─► Request(2) ──────────────► Target(3)
/// weak handle   ─► Unrelated(4)
/// ```
///
/// **Bug this finds:** Root kinds dropped or conflated during enumeration
pub fn root_kind_scenario() -> Scenario {
    let frame = StackFrame::new(0x7ff8_0000_1234, 0x7ffe_0000_0100).with_method("Worker.Run");
    let heap = builder()
        .object(obj(0), "App.Holder", &[obj(1)])
        .object(obj(1), "System.Object[]", &[obj(3)])
        .object(obj(2), "App.Request", &[obj(3)])
        .object(obj(3), "App.Target", &[])
        .object(obj(4), "App.Unrelated", &[])
        .pinned_static_root("App.Holder.s_instance", obj(0))
        .local_root(
            ThreadRef {
                managed_id: 7,
                os_id: 0x1a2b,
            },
            RootKind::local_in(frame),
            "request",
            obj(2),
        )
        .root_of_kind(RootKind::Weak, "weak", obj(4))
        .build_shared()
        .expect("root kind scenario");
    Scenario {
        heap,
        source: obj(0),
        target: obj(3),
    }
}

/// Exactly three simple paths from source(0) to target(4)
///
/// ```text
/// 0 ─► 1 ─► 4
/// 0 ─► 2 ─► 4      (2 references 4 twice)
/// 0 ─► 3 ─► 1 ─► 4
/// 4 ─► 0           (back edge)
/// 4 ─► 5           (beyond the target)
/// ```
///
/// **Bug this finds:** Duplicate or missing paths, cycles followed forever
pub fn three_path_scenario() -> Scenario {
    let heap = builder()
        .object(obj(0), "Graph.Source", &[obj(1), obj(2), obj(3)])
        .object(obj(1), "Graph.Node", &[obj(4)])
        .object(obj(2), "Graph.Node", &[obj(4), obj(4)])
        .object(obj(3), "Graph.Node", &[obj(1)])
        .object(obj(4), "Graph.Target", &[obj(0), obj(5)])
        .object(obj(5), "Graph.Node", &[])
        .static_root("Graph.s_source", obj(0))
        .build_shared()
        .expect("three path scenario");
    Scenario {
        heap,
        source: obj(0),
        target: obj(4),
    }
}

/// Two components; nothing in the first reaches the second
///
/// ```text
/// static ─► 0 ─► 1 ─► 0
///           2 ─► 3        (no root)
/// ```
///
/// **Bug this finds:** Phantom paths, errors instead of empty results
pub fn no_path_scenario() -> Scenario {
    let heap = builder()
        .object(obj(0), "A", &[obj(1)])
        .object(obj(1), "B", &[obj(0)])
        .object(obj(2), "C", &[obj(3)])
        .object(obj(3), "D", &[])
        .static_root("s_a", obj(0))
        .build_shared()
        .expect("no path scenario");
    Scenario {
        heap,
        source: obj(0),
        target: obj(3),
    }
}

/// A ring of `len` objects, one root at object 0, target halfway round
///
/// **Bug this finds:** Infinite loops on cyclic graphs
pub fn ring_scenario(len: u64) -> Scenario {
    let mut b = builder();
    for i in 0..len {
        b = b.object(obj(i), "Ring.Node", &[obj((i + 1) % len)]);
    }
    let heap = b
        .static_root("Ring.s_head", obj(0))
        .build_shared()
        .expect("ring scenario");
    Scenario {
        heap,
        source: obj(0),
        target: obj(len / 2),
    }
}

/// References into nothing, as a damaged dump produces
///
/// ```text
/// static ─► 0 ─► dangling (in segment, no object)
///           0 ─► foreign  (outside every segment)
///           0 ─► 1 ─► 2 (target)
/// ```
///
/// **Bug this finds:** Traversals aborting or panicking on corrupt edges
pub fn corrupt_scenario() -> Scenario {
    let heap = builder()
        .object(obj(0), "Corrupt.Holder", &[obj(90), 0xdead_beef_0000, obj(1)])
        .object(obj(1), "Corrupt.Node", &[obj(2)])
        .object(obj(2), "Corrupt.Target", &[])
        .static_root("Corrupt.s_holder", obj(0))
        .build_shared()
        .expect("corrupt scenario");
    Scenario {
        heap,
        source: obj(0),
        target: obj(2),
    }
}

/// Dangling in-segment address used by [`corrupt_scenario`]
pub fn corrupt_dangling() -> Address {
    obj(90)
}

/// ============================================================================
/// RANDOM HEAPS
/// ============================================================================

/// Random heap spread over both segments
///
/// About 5% of edges dangle. Roots use a mix of kinds and a few repeat an
/// object.
pub fn random_heap(seed: u64, objects: u64, edges_per_object: usize, roots: usize) -> Arc<HeapSnapshot> {
    let mut rng = StdRng::seed_from_u64(seed);
    let address = |i: u64| if i % 3 == 0 { far_obj(i) } else { obj(i) };

    let mut b = builder();
    for i in 0..objects {
        let edge_count = rng.gen_range(0..=edges_per_object);
        let refs: Vec<Address> = (0..edge_count)
            .map(|_| {
                if rng.gen_bool(0.05) {
                    obj(objects + rng.gen_range(0..16))
                } else {
                    address(rng.gen_range(0..objects))
                }
            })
            .collect();
        b = b.object(address(i), "Random.Node", &refs);
    }

    let kinds = [
        RootKind::StaticVar,
        RootKind::local(),
        RootKind::Pinning,
        RootKind::Strong,
        RootKind::Weak,
        RootKind::AsyncPinned,
        RootKind::RefCounted,
    ];
    for r in 0..roots {
        let kind = kinds[r % kinds.len()].clone();
        let target = address(rng.gen_range(0..objects));
        b = b.root_of_kind(kind, &format!("root_{}", r), target);
    }
    b.build_shared().expect("random heap")
}

/// Every object address of a snapshot
pub fn all_objects(heap: &HeapSnapshot) -> Vec<Address> {
    heap.object_addresses().collect()
}

/// ============================================================================
/// ASSERTIONS
/// ============================================================================

/// Assert `path` starts at `source`, ends at `target`, follows real edges
/// and never repeats an object
pub fn assert_valid_path<H: HeapGraphView + ?Sized>(heap: &H, path: &ObjectPath, source: Address, target: Address) {
    assert_eq!(path.source().address, source, "path {} has wrong source", path);
    assert_eq!(path.target().address, target, "path {} has wrong target", path);
    assert!(path.is_valid_in(heap), "path {} follows a missing edge", path);

    let mut addresses = path.addresses();
    let len = addresses.len();
    addresses.sort_unstable();
    addresses.dedup();
    assert_eq!(addresses.len(), len, "path {} repeats an object", path);
}

/// Root slot addresses, sorted, for root-set comparisons
pub fn root_slots(roots: &[RootRecord]) -> Vec<Address> {
    let mut slots: Vec<Address> = roots.iter().map(|r| r.address).collect();
    slots.sort_unstable();
    slots
}

/// Reference view that signals a token after a number of expansions
///
/// Lets tests cancel deterministically in the middle of a traversal.
pub struct CancellingHeap {
    inner: Arc<HeapSnapshot>,
    token: gcroot::CancellationToken,
    after: usize,
    calls: std::sync::atomic::AtomicUsize,
}

impl CancellingHeap {
    pub fn new(inner: Arc<HeapSnapshot>, token: gcroot::CancellationToken, after: usize) -> Self {
        Self {
            inner,
            token,
            after,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl HeapGraphView for CancellingHeap {
    fn segments(&self) -> Vec<gcroot::HeapSegment> {
        self.inner.segments()
    }

    fn enumerate_roots(&self) -> Box<dyn Iterator<Item = RootRecord> + '_> {
        self.inner.enumerate_roots()
    }

    fn enumerate_object_references(&self, address: Address, visit: &mut dyn FnMut(ObjectReference)) {
        let calls = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        if calls >= self.after {
            self.token.cancel();
        }
        self.inner.enumerate_object_references(address, visit)
    }

    fn resolve_type(&self, address: Address) -> Option<ObjectType> {
        self.inner.resolve_type(address)
    }
}
