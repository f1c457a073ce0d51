//! Control-flow graphs of bound operations, and lowering of structured statements into them.
use crate::bound::{Expr, ExprId, Op, Stmt};
use crate::common::{Graph, Name, NodeIx, Result};
use crate::error::AnalysisError;

use petgraph::visit::EdgeRef;
use petgraph::Direction;

type SmallVec<T> = smallvec::SmallVec<[T; 4]>;

/// How control leaves a basic block.
#[derive(Clone, Debug, PartialEq)]
pub enum Exit {
    /// Continue along the (single) `Always` edge, if there is one.
    Fallthrough,
    /// Evaluate the condition; follow `OnTrue` or `OnFalse`.
    Branch(Expr),
    /// Loop header of a `foreach`: `OnTrue` binds the next key and value, `OnFalse` leaves.
    Iterate {
        source: Expr,
        key: Option<Name>,
        value: Name,
    },
    Return(Option<Expr>),
}

impl Default for Exit {
    fn default() -> Exit {
        Exit::Fallthrough
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasicBlock {
    pub ops: Vec<Op>,
    pub exit: Exit,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Transition {
    Always,
    OnTrue,
    OnFalse,
}

#[derive(Clone, Debug)]
pub struct ControlFlowGraph {
    pub graph: Graph<BasicBlock, Transition>,
    pub entry: NodeIx,
    /// One more than the largest expression id in the graph.
    pub num_exprs: ExprId,
}

impl ControlFlowGraph {
    /// Lowers a routine body.
    pub fn from_stmts(body: &[Stmt]) -> Result<ControlFlowGraph> {
        Builder::default().lower(body)
    }

    pub fn block(&self, ix: NodeIx) -> &BasicBlock {
        &self.graph[ix]
    }

    pub fn successors(&self, ix: NodeIx) -> impl Iterator<Item = (NodeIx, Transition)> + '_ {
        self.graph
            .edges_directed(ix, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
    }

    pub fn blocks(&self) -> impl Iterator<Item = NodeIx> {
        self.graph.node_indices()
    }

    /// Every expression in the graph, pre-order, block by block.
    pub fn exprs(&self) -> Vec<&Expr> {
        let mut res = Vec::new();
        for bb in self.graph.raw_nodes().iter().map(|n| &n.weight) {
            for op in bb.ops.iter() {
                for e in op.exprs() {
                    e.visit(&mut |e| res.push(e));
                }
            }
            match &bb.exit {
                Exit::Fallthrough | Exit::Return(None) => {}
                Exit::Branch(e) | Exit::Return(Some(e)) | Exit::Iterate { source: e, .. } => {
                    e.visit(&mut |e| res.push(e))
                }
            }
        }
        res
    }

    /// Names of every variable the graph mentions, in order of first mention.
    pub fn variables(&self) -> Vec<&Name> {
        fn push<'a>(res: &mut Vec<&'a Name>, n: &'a Name) {
            if !res.contains(&n) {
                res.push(n);
            }
        }
        fn push_expr<'a>(res: &mut Vec<&'a Name>, e: &'a Expr) {
            e.visit(&mut |e| {
                if let Some(n) = e.as_variable() {
                    push(res, n)
                }
            })
        }
        let mut res = Vec::new();
        for bb in self.graph.raw_nodes().iter().map(|n| &n.weight) {
            for op in bb.ops.iter() {
                match op {
                    Op::Static(n, _) => push(&mut res, n),
                    Op::Global(ns) | Op::Unset(ns) => ns.iter().for_each(|n| push(&mut res, n)),
                    Op::Expr(_) => {}
                }
                for e in op.exprs() {
                    push_expr(&mut res, e);
                }
            }
            match &bb.exit {
                Exit::Fallthrough | Exit::Return(None) => {}
                Exit::Branch(e) | Exit::Return(Some(e)) => push_expr(&mut res, e),
                Exit::Iterate { source, key, value } => {
                    push_expr(&mut res, source);
                    if let Some(k) = key {
                        push(&mut res, k);
                    }
                    push(&mut res, value);
                }
            }
        }
        res
    }
}

/// Lowers structured statements into a [ControlFlowGraph], numbering expressions as it goes.
#[derive(Default)]
pub struct Builder {
    cfg: Graph<BasicBlock, Transition>,
    // Stack of the header and footer nodes for the loops within which the current statement is
    // nested.
    loop_ctx: SmallVec<(NodeIx, NodeIx)>,
    next_id: ExprId,
}

impl Builder {
    pub fn lower(mut self, body: &[Stmt]) -> Result<ControlFlowGraph> {
        let entry = self.cfg.add_node(Default::default());
        let end = self.convert_block(body, entry)?;
        // Falling off the end returns null.
        if let Exit::Fallthrough = self.cfg[end].exit {
            self.cfg[end].exit = Exit::Return(None);
        }
        Ok(ControlFlowGraph {
            graph: self.cfg,
            entry,
            num_exprs: self.next_id,
        })
    }

    fn number(&mut self, mut e: Expr) -> Expr {
        e.number(&mut self.next_id);
        e
    }

    fn add_op(&mut self, bb: NodeIx, mut op: Op) {
        op.number(&mut self.next_id);
        self.cfg[bb].ops.push(op);
    }

    fn fresh(&mut self) -> NodeIx {
        self.cfg.add_node(Default::default())
    }

    fn standalone_block(&mut self, stmts: &[Stmt]) -> Result<(NodeIx /*start*/, NodeIx /*end*/)> {
        let start = self.fresh();
        let end = self.convert_block(stmts, start)?;
        Ok((start, end))
    }

    fn convert_block(&mut self, stmts: &[Stmt], mut current_open: NodeIx) -> Result<NodeIx> {
        for s in stmts {
            current_open = self.convert_stmt(s, current_open)?;
        }
        Ok(current_open)
    }

    fn convert_stmt(&mut self, stmt: &Stmt, current_open: NodeIx) -> Result<NodeIx> /*next open*/ {
        use Stmt::*;
        Ok(match stmt {
            Expr(e) => {
                self.add_op(current_open, Op::Expr(e.clone()));
                current_open
            }
            Block(stmts) => self.convert_block(stmts, current_open)?,
            Static(name, init) => {
                self.add_op(current_open, Op::Static(name.clone(), init.clone()));
                current_open
            }
            Global(names) => {
                self.add_op(current_open, Op::Global(names.clone()));
                current_open
            }
            Unset(names) => {
                self.add_op(current_open, Op::Unset(names.clone()));
                current_open
            }
            If(cond, tcase, fcase) => {
                let cond = self.number(cond.clone());
                self.cfg[current_open].exit = Exit::Branch(cond);
                let (t_start, t_end) = self.standalone_block(tcase)?;
                let next = self.fresh();
                self.cfg.add_edge(current_open, t_start, Transition::OnTrue);
                self.cfg.add_edge(t_end, next, Transition::Always);
                if fcase.is_empty() {
                    self.cfg.add_edge(current_open, next, Transition::OnFalse);
                } else {
                    let (f_start, f_end) = self.standalone_block(fcase)?;
                    self.cfg.add_edge(current_open, f_start, Transition::OnFalse);
                    self.cfg.add_edge(f_end, next, Transition::Always);
                }
                next
            }
            While(cond, body) => {
                let h = self.fresh();
                let f = self.fresh();
                self.cfg.add_edge(current_open, h, Transition::Always);
                let cond = self.number(cond.clone());
                self.cfg[h].exit = Exit::Branch(cond);
                self.loop_ctx.push((h, f));
                let (b_start, b_end) = self.standalone_block(body)?;
                self.loop_ctx.pop();
                self.cfg.add_edge(h, b_start, Transition::OnTrue);
                self.cfg.add_edge(h, f, Transition::OnFalse);
                self.cfg.add_edge(b_end, h, Transition::Always);
                f
            }
            Foreach {
                source,
                key,
                value,
                body,
            } => {
                let h = self.fresh();
                let f = self.fresh();
                self.cfg.add_edge(current_open, h, Transition::Always);
                let source = self.number(source.clone());
                self.cfg[h].exit = Exit::Iterate {
                    source,
                    key: key.clone(),
                    value: value.clone(),
                };
                self.loop_ctx.push((h, f));
                let (b_start, b_end) = self.standalone_block(body)?;
                self.loop_ctx.pop();
                self.cfg.add_edge(h, b_start, Transition::OnTrue);
                self.cfg.add_edge(h, f, Transition::OnFalse);
                self.cfg.add_edge(b_end, h, Transition::Always);
                f
            }
            Return(e) => {
                let e = e.clone().map(|e| self.number(e));
                self.cfg[current_open].exit = Exit::Return(e);
                // Anything after a return is unreachable; it gets a block with no predecessors.
                self.fresh()
            }
            Break => match self.loop_ctx.last() {
                Some((_, footer)) => {
                    let footer = *footer;
                    self.cfg.add_edge(current_open, footer, Transition::Always);
                    self.fresh()
                }
                None => {
                    return Err(AnalysisError::Lowering(
                        "break statement must be inside a loop".into(),
                    ))
                }
            },
            Continue => match self.loop_ctx.last() {
                Some((header, _)) => {
                    let header = *header;
                    self.cfg.add_edge(current_open, header, Transition::Always);
                    self.fresh()
                }
                None => {
                    return Err(AnalysisError::Lowering(
                        "continue statement must be inside a loop".into(),
                    ))
                }
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound::{BinaryOp, Expr};

    fn succs(cfg: &ControlFlowGraph, ix: NodeIx) -> Vec<Transition> {
        let mut res: Vec<_> = cfg.successors(ix).map(|(_, t)| t).collect();
        res.sort_by_key(|t| *t as u8);
        res
    }

    #[test]
    fn if_without_else() {
        let cfg = ControlFlowGraph::from_stmts(&[
            Stmt::if_(
                Expr::var("c"),
                vec![Stmt::expr(Expr::assign(Expr::var("x"), Expr::long(1)))],
                vec![],
            ),
            Stmt::ret(Some(Expr::var("x"))),
        ])
        .unwrap();
        assert!(matches!(cfg.block(cfg.entry).exit, Exit::Branch(_)));
        assert_eq!(
            succs(&cfg, cfg.entry),
            vec![Transition::OnTrue, Transition::OnFalse]
        );
        // c, x = 1 (3 nodes), x
        assert_eq!(cfg.num_exprs, 5);
        let mut ids: Vec<_> = cfg.exprs().iter().map(|e| e.id).collect();
        ids.sort();
        assert_eq!(ids, (0..5).collect::<Vec<_>>());
    }

    #[test]
    fn while_loop_shape() {
        let cfg = ControlFlowGraph::from_stmts(&[
            Stmt::expr(Expr::assign(Expr::var("i"), Expr::long(0))),
            Stmt::while_(
                Expr::binary(BinaryOp::Lt, Expr::var("i"), Expr::long(10)),
                vec![Stmt::expr(Expr::post_inc(Expr::var("i")))],
            ),
        ])
        .unwrap();
        let (header, _) = cfg.successors(cfg.entry).next().unwrap();
        assert!(matches!(cfg.block(header).exit, Exit::Branch(_)));
        // the body loops back to the header
        let body = cfg
            .successors(header)
            .find(|(_, t)| *t == Transition::OnTrue)
            .unwrap()
            .0;
        assert_eq!(cfg.successors(body).next(), Some((header, Transition::Always)));
        let footer = cfg
            .successors(header)
            .find(|(_, t)| *t == Transition::OnFalse)
            .unwrap()
            .0;
        assert_eq!(cfg.block(footer).exit, Exit::Return(None));
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let res = ControlFlowGraph::from_stmts(&[Stmt::Break]);
        assert!(matches!(res, Err(AnalysisError::Lowering(_))));
        let res = ControlFlowGraph::from_stmts(&[Stmt::Continue]);
        assert!(matches!(res, Err(AnalysisError::Lowering(_))));
    }

    #[test]
    fn code_after_return_is_unreachable() {
        let cfg = ControlFlowGraph::from_stmts(&[
            Stmt::ret(None),
            Stmt::expr(Expr::var("dead")),
        ])
        .unwrap();
        assert_eq!(cfg.block(cfg.entry).exit, Exit::Return(None));
        assert_eq!(cfg.successors(cfg.entry).count(), 0);
        let dead = cfg.blocks().find(|b| *b != cfg.entry).unwrap();
        assert_eq!(
            cfg.graph
                .neighbors_directed(dead, Direction::Incoming)
                .count(),
            0
        );
    }

    #[test]
    fn variables_cover_ops_and_exits() {
        let cfg = ControlFlowGraph::from_stmts(&[
            Stmt::static_("n", Some(Expr::var("init"))),
            Stmt::Global(vec!["g".into()]),
            Stmt::foreach(
                Expr::var("xs"),
                Some("k"),
                "v",
                vec![Stmt::Unset(vec!["u".into()])],
            ),
            Stmt::ret(Some(Expr::var("n"))),
        ])
        .unwrap();
        let mut vars: Vec<&str> = cfg.variables().into_iter().map(|n| &**n).collect();
        vars.sort();
        assert_eq!(vars, vec!["g", "init", "k", "n", "u", "v", "xs"]);
    }
}
