//! The interprocedural call graph.
//!
//! Edges are appended while routines are analyzed, possibly from several worker threads at once,
//! and are never removed: an edge recorded in an early pass stays valid evidence for the
//! specializers even if the caller later stops reaching the call.
use crate::bound::ExprId;
use crate::common::NodeIx;
use crate::program::RoutineId;
use crate::types::TypeRefMask;

use hashbrown::HashMap;

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type SmallVec<T> = smallvec::SmallVec<[T; 4]>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallEdge {
    pub caller: RoutineId,
    pub callee: RoutineId,
    /// The call expression.
    pub call_site: ExprId,
    /// The caller block containing the call.
    pub block: NodeIx,
    pub arg_exprs: SmallVec<ExprId>,
    /// Types of the actual arguments, accumulated over every analysis of the call site.
    pub arg_types: SmallVec<TypeRefMask>,
}

#[derive(Default, Debug)]
struct Edges {
    edges: Vec<CallEdge>,
    index: HashMap<(RoutineId, RoutineId, ExprId), usize>,
    callers: HashMap<RoutineId /* callee */, SmallVec<usize>>,
    callees: HashMap<RoutineId /* caller */, SmallVec<usize>>,
}

#[derive(Default, Debug)]
pub struct CallGraph {
    inner: RwLock<Edges>,
}

/// What [CallGraph::add_edge] learned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdgeUpdate {
    New,
    /// The call site was known; some argument type grew.
    Widened,
    Unchanged,
}

impl CallGraph {
    pub fn new() -> CallGraph {
        Default::default()
    }

    // Every write leaves the edge set consistent, so a poisoned lock still guards valid data.
    fn read(&self) -> RwLockReadGuard<Edges> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
    fn write(&self) -> RwLockWriteGuard<Edges> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a call from `caller` to `callee` at `call_site`. Repeated calls for the same call
    /// site accumulate argument types into the existing edge.
    pub fn add_edge(
        &self,
        caller: RoutineId,
        callee: RoutineId,
        call_site: ExprId,
        block: NodeIx,
        arg_exprs: &[ExprId],
        arg_types: &[TypeRefMask],
    ) -> EdgeUpdate {
        let key = (caller, callee, call_site);
        {
            let edges = self.read();
            if let Some(ix) = edges.index.get(&key) {
                let e = &edges.edges[*ix];
                if arg_types.len() <= e.arg_types.len()
                    && arg_types
                        .iter()
                        .zip(e.arg_types.iter())
                        .all(|(new, old)| (*old | *new) == *old)
                {
                    return EdgeUpdate::Unchanged;
                }
            }
        }
        let mut edges = self.write();
        if let Some(ix) = edges.index.get(&key).cloned() {
            let e = &mut edges.edges[ix];
            let mut changed = false;
            if e.arg_types.len() < arg_types.len() {
                e.arg_types.resize(arg_types.len(), TypeRefMask::VOID);
            }
            for (old, new) in e.arg_types.iter_mut().zip(arg_types.iter()) {
                let next = *old | *new;
                changed |= next != *old;
                *old = next;
            }
            return if changed {
                EdgeUpdate::Widened
            } else {
                EdgeUpdate::Unchanged
            };
        }
        let ix = edges.edges.len();
        edges.edges.push(CallEdge {
            caller,
            callee,
            call_site,
            block,
            arg_exprs: arg_exprs.iter().cloned().collect(),
            arg_types: arg_types.iter().cloned().collect(),
        });
        edges.index.insert(key, ix);
        edges.callers.entry(callee).or_default().push(ix);
        edges.callees.entry(caller).or_default().push(ix);
        EdgeUpdate::New
    }

    /// Edges into `callee`, in insertion order.
    pub fn get_caller_edges(&self, callee: RoutineId) -> Vec<CallEdge> {
        let edges = self.read();
        match edges.callers.get(&callee) {
            Some(ixs) => ixs.iter().map(|ix| edges.edges[*ix].clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Edges out of `caller`, in insertion order.
    pub fn get_callee_edges(&self, caller: RoutineId) -> Vec<CallEdge> {
        let edges = self.read();
        match edges.callees.get(&caller) {
            Some(ixs) => ixs.iter().map(|ix| edges.edges[*ix].clone()).collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(i: u32) -> RoutineId {
        RoutineId(i)
    }

    #[test]
    fn edges_are_indexed_both_ways() {
        let g = CallGraph::new();
        let b = NodeIx::new(0);
        let l = [TypeRefMask::LONG];
        assert_eq!(g.add_edge(rid(0), rid(1), 3, b, &[4], &l), EdgeUpdate::New);
        assert_eq!(g.add_edge(rid(0), rid(1), 7, b, &[8], &l), EdgeUpdate::New);
        assert_eq!(g.add_edge(rid(2), rid(1), 3, b, &[4], &l), EdgeUpdate::New);
        assert_eq!(g.add_edge(rid(0), rid(1), 3, b, &[4], &l), EdgeUpdate::Unchanged);
        assert_eq!(g.len(), 3);
        let callers: Vec<_> = g
            .get_caller_edges(rid(1))
            .into_iter()
            .map(|e| (e.caller, e.call_site))
            .collect();
        assert_eq!(callers, vec![(rid(0), 3), (rid(0), 7), (rid(2), 3)]);
        assert_eq!(g.get_callee_edges(rid(0)).len(), 2);
        assert!(g.get_callee_edges(rid(1)).is_empty());
    }

    #[test]
    fn repeated_sites_widen() {
        let g = CallGraph::new();
        let b = NodeIx::new(0);
        g.add_edge(rid(0), rid(0), 1, b, &[2], &[TypeRefMask::LONG]);
        assert_eq!(
            g.add_edge(rid(0), rid(0), 1, b, &[2], &[TypeRefMask::STRING]),
            EdgeUpdate::Widened
        );
        let e = &g.get_caller_edges(rid(0))[0];
        assert_eq!(e.arg_types[0], TypeRefMask::LONG | TypeRefMask::STRING);
    }

    #[test]
    fn concurrent_appends() {
        let g = CallGraph::new();
        crossbeam::scope(|s| {
            for t in 0..4u32 {
                let g = &g;
                s.spawn(move |_| {
                    for site in 0..50 {
                        g.add_edge(rid(t), rid(9), site, NodeIx::new(0), &[], &[]);
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(g.get_caller_edges(rid(9)).len(), 200);
    }
}
