//! Join-semilattice constraints over a dependency graph, and the interprocedural flag
//! forwarding built on them.
use crate::common::{Graph, NodeIx, WorkList};
use crate::program::{Program, RoutineFlags, RoutineId};

use hashbrown::HashMap;
use petgraph::Direction;

use std::hash::Hash;
use std::mem;

pub trait JoinSemiLattice {
    fn bottom() -> Self;
    /// `*self = join(self, other)`. Returns whether `self` changed.
    fn join(&mut self, other: &Self) -> bool;
}

/// A value per key, where each key's solution includes the solution of every key it depends on.
pub(crate) struct Analysis<J, K> {
    nodes: HashMap<K, NodeIx>,
    // edges point from a key to the keys it depends on
    graph: Graph<J, ()>,
}

impl<J, K> Default for Analysis<J, K> {
    fn default() -> Analysis<J, K> {
        Analysis {
            nodes: Default::default(),
            graph: Default::default(),
        }
    }
}

impl<K: Eq + Hash, J: JoinSemiLattice> Analysis<J, K> {
    pub(crate) fn add_src(&mut self, k: K, v: J) {
        let ix = self.get_node(k);
        self.graph[ix].join(&v);
    }

    /// `dst` flows from `src`.
    pub(crate) fn add_dep(&mut self, dst: K, src: K) {
        let dst_ix = self.get_node(dst);
        let src_ix = self.get_node(src);
        self.graph.add_edge(dst_ix, src_ix, ());
    }

    fn get_node(&mut self, k: K) -> NodeIx {
        let graph = &mut self.graph;
        *self
            .nodes
            .entry(k)
            .or_insert_with(|| graph.add_node(J::bottom()))
    }

    pub(crate) fn solve(&mut self) {
        let mut wl = WorkList::default();
        wl.extend(self.graph.node_indices());
        while let Some(n) = wl.pop() {
            let mut cur = mem::replace(&mut self.graph[n], J::bottom());
            let mut changed = false;
            for dep in self.graph.neighbors_directed(n, Direction::Outgoing) {
                changed |= cur.join(&self.graph[dep]);
            }
            mem::swap(&mut cur, &mut self.graph[n]);
            if changed {
                wl.extend(self.graph.neighbors_directed(n, Direction::Incoming));
            }
        }
    }

    /// The solution for `k`, once [Analysis::solve] has run.
    pub(crate) fn get(&self, k: &K) -> Option<&J> {
        self.nodes.get(k).map(|ix| &self.graph[*ix])
    }
}

/// Whether a routine can reach a call that inspects or rewrites its caller's frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct ReachesDynamic(bool);

impl JoinSemiLattice for ReachesDynamic {
    fn bottom() -> Self {
        ReachesDynamic(false)
    }
    fn join(&mut self, other: &Self) -> bool {
        let changed = other.0 && !self.0;
        self.0 |= other.0;
        changed
    }
}

/// Sets [RoutineFlags::CALLS_DYNAMIC] on every routine that has a dynamic call or
/// (transitively) calls one that does.
pub(crate) fn forward_dynamic_calls(program: &mut Program) {
    let mut analysis = Analysis::<ReachesDynamic, RoutineId>::default();
    for r in program.routines() {
        let id = r.id();
        analysis.add_src(
            id,
            ReachesDynamic(r.flags().contains(RoutineFlags::HAS_DYNAMIC_CALL)),
        );
        for edge in program.call_graph().get_callee_edges(id) {
            analysis.add_dep(id, edge.callee);
        }
    }
    analysis.solve();
    for r in program.routines.iter_mut() {
        if analysis.get(&r.id).map_or(false, |d| d.0) {
            r.flags.insert(RoutineFlags::CALLS_DYNAMIC);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound::{Expr, RoutineDecl, Stmt};
    use crate::config::AnalysisConfig;

    #[test]
    fn lattice_solution() {
        let mut a = Analysis::<ReachesDynamic, u32>::default();
        a.add_src(0, ReachesDynamic(true));
        a.add_dep(1, 0);
        a.add_dep(2, 1);
        a.add_dep(2, 2);
        a.add_dep(3, 4);
        a.solve();
        let got: Vec<bool> = (0..5u32).map(|i| a.get(&i).unwrap().0).collect();
        assert_eq!(got, vec![true, true, true, false, false]);
        assert!(a.get(&5).is_none());
    }

    fn call(name: &str) -> Stmt {
        Stmt::expr(Expr::call(name, vec![]))
    }

    #[test]
    fn dynamic_calls_reach_callers() {
        let mut p = Program::new();
        let a = p
            .add_routine(RoutineDecl::new("a").body(vec![call("func_get_args")]))
            .unwrap();
        let b = p.add_routine(RoutineDecl::new("b").body(vec![call("a")])).unwrap();
        let c = p.add_routine(RoutineDecl::new("c").body(vec![call("b"), call("c")])).unwrap();
        let d = p.add_routine(RoutineDecl::new("d").body(vec![call("strlen")])).unwrap();
        p.analyze(AnalysisConfig::sequential()).unwrap();
        let flags = |id| p.routine(id).flags();
        assert!(flags(a).contains(RoutineFlags::HAS_DYNAMIC_CALL.union(RoutineFlags::CALLS_DYNAMIC)));
        assert!(!flags(b).contains(RoutineFlags::HAS_DYNAMIC_CALL));
        assert!(flags(b).contains(RoutineFlags::CALLS_DYNAMIC));
        assert!(flags(c).contains(RoutineFlags::CALLS_DYNAMIC));
        assert!(!flags(d).intersects(RoutineFlags::CALLS_DYNAMIC));
    }
}
