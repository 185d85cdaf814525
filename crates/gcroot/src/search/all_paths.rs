//! Path Enumeration - Lazy Depth-First Search Between Two Objects
//!
//! The DFS keeps an explicit frame stack so it can pause after every
//! produced path:
//! ```text
//! stack: [source] [obj1] [obj2]      on_path = {source, obj1, obj2}
//!          next=1   next=0  next=2
//! ```
//! The target is never pushed: reaching it as a child yields
//! `stack + target`. Objects on the current stack are skipped, so every
//! path is simple.
//!
//! With `unique_only`, an object is entered at most once over the whole
//! enumeration. The first path through an object claims it; later branches
//! that reach it are cut.

use super::path::ObjectPath;
use super::trace::QueryTrace;
use crate::cancel::CancellationToken;
use crate::error::{GcRootError, Result};
use crate::heap::{Address, Expander, HeapGraphView};
use crate::object_set::segment::SegmentMap;
use crate::object_set::AddressSet;
use std::iter::FusedIterator;
use std::sync::Arc;

pub(crate) const OPERATION: &str = "enumerate_all_paths";

struct Frame {
    address: Address,
    children: Vec<Address>,
    next: usize,
}

/// Lazy sequence of simple paths from a source to a target
///
/// Returned by [`RootSearch::enumerate_all_paths`](super::RootSearch::enumerate_all_paths).
pub struct AllPaths<'a, H: ?Sized> {
    expander: Expander<'a, H>,
    target: Address,
    unique_only: bool,
    stack: Vec<Frame>,
    on_path: AddressSet,
    claimed: AddressSet,
    /// Source is the target: the one-object path is still owed
    pending_single: Option<Address>,
    token: CancellationToken,
    trace: QueryTrace,
    done: bool,
}

impl<'a, H: HeapGraphView + ?Sized> AllPaths<'a, H> {
    pub(crate) fn new(
        expander: Expander<'a, H>,
        map: &Arc<SegmentMap>,
        source: Address,
        target: Address,
        unique_only: bool,
        token: &CancellationToken,
        trace: QueryTrace,
    ) -> Self {
        let mut paths = Self {
            expander,
            target,
            unique_only,
            stack: Vec::new(),
            on_path: AddressSet::with_map(Arc::clone(map)),
            claimed: AddressSet::with_map(Arc::clone(map)),
            pending_single: None,
            token: token.clone(),
            trace,
            done: false,
        };
        if source == target {
            paths.pending_single = Some(source);
        } else {
            paths.enter(source);
        }
        paths
    }

    /// Iterator that yields nothing
    pub(crate) fn empty(
        expander: Expander<'a, H>,
        map: &Arc<SegmentMap>,
        token: &CancellationToken,
        mut trace: QueryTrace,
    ) -> Self {
        trace.finish();
        Self {
            expander,
            target: 0,
            unique_only: false,
            stack: Vec::new(),
            on_path: AddressSet::with_map(Arc::clone(map)),
            claimed: AddressSet::with_map(Arc::clone(map)),
            pending_single: None,
            token: token.clone(),
            trace,
            done: true,
        }
    }

    fn enter(&mut self, address: Address) {
        let mut children = Vec::new();
        self.expander.expand(address, &mut children);
        // Two fields holding the same reference are one edge.
        children.sort_unstable();
        children.dedup();

        self.on_path.add(address);
        self.claimed.add(address);
        self.stack.push(Frame {
            address,
            children,
            next: 0,
        });
    }

    fn emit(&mut self, addresses: &[Address]) -> Option<Result<ObjectPath>> {
        self.trace.record_result();
        Some(Ok(ObjectPath::resolve(self.expander.heap(), addresses)))
    }

    fn fail(&mut self, err: GcRootError) -> Option<Result<ObjectPath>> {
        self.done = true;
        self.stack.clear();
        self.trace.fail(&err);
        Some(Err(err))
    }
}

impl<H: HeapGraphView + ?Sized> Iterator for AllPaths<'_, H> {
    type Item = Result<ObjectPath>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(single) = self.pending_single.take() {
            if let Err(err) = self.token.check(OPERATION) {
                return self.fail(err);
            }
            self.done = true;
            let item = self.emit(&[single]);
            self.trace.finish();
            return item;
        }

        loop {
            if let Err(err) = self.token.check(OPERATION) {
                return self.fail(err);
            }

            let Some(frame) = self.stack.last_mut() else {
                self.done = true;
                self.trace.finish();
                return None;
            };

            if frame.next == frame.children.len() {
                let address = frame.address;
                self.stack.pop();
                self.on_path.remove(address);
                continue;
            }

            let child = frame.children[frame.next];
            frame.next += 1;

            if child == self.target {
                let mut addresses: Vec<Address> = self.stack.iter().map(|f| f.address).collect();
                addresses.push(child);
                return self.emit(&addresses);
            }
            if self.on_path.contains(child) {
                continue;
            }
            if self.unique_only && self.claimed.contains(child) {
                continue;
            }
            self.enter(child);
        }
    }
}

impl<H: HeapGraphView + ?Sized> FusedIterator for AllPaths<'_, H> {}
