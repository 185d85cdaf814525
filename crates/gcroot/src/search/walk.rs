//! Root Walk - Breadth-First Search Toward One Target
//!
//! Each walk gets its own visited set. Two query-wide tables let walks
//! share work:
//! - `known`: objects already proven to reach the target; reaching one
//!   ends the walk and the remembered suffix is stitched on
//! - `dead`: objects proven not to reach it, filled by walks that exhaust
//!   their reachable set

use super::path::{trim_cycles, KnownPaths};
use crate::cancel::CancellationToken;
use crate::error::{GcRootError, Result};
use crate::heap::{Address, Expander, HeapGraphView};
use crate::object_set::segment::SegmentMap;
use crate::object_set::AddressSet;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

pub(crate) struct RootWalker<'w, H: ?Sized> {
    expander: Expander<'w, H>,
    map: &'w Arc<SegmentMap>,
    known: &'w KnownPaths,
    dead: &'w AddressSet,
    operation: &'static str,
}

impl<'w, H: HeapGraphView + ?Sized> RootWalker<'w, H> {
    pub(crate) fn new(
        expander: Expander<'w, H>,
        map: &'w Arc<SegmentMap>,
        known: &'w KnownPaths,
        dead: &'w AddressSet,
        operation: &'static str,
    ) -> Self {
        Self {
            expander,
            map,
            known,
            dead,
            operation,
        }
    }

    /// Path from `start` to the target, `None` if it is unreachable
    pub(crate) fn walk(&self, start: Address, token: &CancellationToken) -> Result<Option<Vec<Address>>> {
        if self.known.is_known(start) {
            return self.stitch(Vec::new(), start).map(Some);
        }
        if self.dead.contains(start) {
            return Ok(None);
        }

        let visited = AddressSet::with_map(Arc::clone(self.map));
        let mut parents: FxHashMap<Address, Address> = FxHashMap::default();
        let mut explored = Vec::new();
        let mut queue = VecDeque::new();
        let mut refs = Vec::new();

        visited.add(start);
        queue.push_back(start);

        while let Some(object) = queue.pop_front() {
            token.check(self.operation)?;
            explored.push(object);
            self.expander.expand(object, &mut refs);

            for &child in &refs {
                if self.dead.contains(child) || !visited.try_add(child) {
                    continue;
                }
                parents.insert(child, object);
                if self.known.is_known(child) {
                    let prefix = self.prefix(&parents, start, object)?;
                    return self.stitch(prefix, child).map(Some);
                }
                queue.push_back(child);
            }
        }

        for object in explored {
            self.dead.add(object);
        }
        Ok(None)
    }

    /// Walk-tree path `start ..= end`
    fn prefix(&self, parents: &FxHashMap<Address, Address>, start: Address, end: Address) -> Result<Vec<Address>> {
        let mut path = vec![end];
        let mut current = end;
        while current != start {
            current = *parents.get(&current).ok_or_else(|| {
                GcRootError::Internal(format!("walk tree lost the parent of {:#x}", current))
            })?;
            path.push(current);
        }
        path.reverse();
        Ok(path)
    }

    /// `prefix` followed by the remembered path from `junction`
    fn stitch(&self, mut prefix: Vec<Address>, junction: Address) -> Result<Vec<Address>> {
        let suffix = self.known.suffix(junction).ok_or_else(|| {
            GcRootError::Internal(format!(
                "no remembered path from {:#x} to {:#x}",
                junction,
                self.known.target()
            ))
        })?;
        prefix.extend(suffix);
        let path = trim_cycles(prefix);
        self.known.record(&path);
        Ok(path)
    }
}
