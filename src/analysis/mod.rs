//! Intraprocedural analysis: walking the blocks of one routine and threading a flow state
//! through their operations.
//!
//! A routine is analyzed by draining its queue of pending blocks. Each block starts from the join
//! of every state that has flowed into it; its outgoing states are joined into its successors'
//! inputs, and a successor is queued again whenever its input changes. Types only grow and the
//! number of variables is finite, so the queue eventually drains.
//!
//! Nothing here touches another routine directly. Calls are resolved against a snapshot of every
//! routine's [Signature], and what a call teaches us about its callee is returned as [Effects]
//! for the driver to apply once the round is over. That is what makes it safe to analyze
//! different routines on different threads.
mod cond;
mod expr;

pub(crate) use cond::Branch;

use crate::bound::Op;
use crate::call_graph::CallGraph;
use crate::cfg::{BasicBlock, ControlFlowGraph, Exit, Transition};
use crate::common::{Name, NodeIx, Result, WorkList};
use crate::flow::{FlowContext, FlowState, VarHandle};
use crate::program::{RoutineAnalysis, RoutineFlags, RoutineId, RoutineStatus, Routine};
use crate::specialize::ParamTuple;
use crate::symbols::{OverloadResolver, Signature, Symbols};
use crate::types::{TypeKind, TypeRefContext, TypeRefMask};

use tracing::trace;

/// Everything shared by all routines analyzed in one round.
pub(crate) struct Env<'a> {
    pub(crate) types: &'a TypeRefContext,
    pub(crate) symbols: &'a Symbols,
    pub(crate) call_graph: &'a CallGraph,
    pub(crate) sigs: &'a [Signature],
    pub(crate) resolver: &'a dyn OverloadResolver,
}

/// Interprocedural facts discovered while analyzing a routine.
#[derive(Default, Debug)]
pub(crate) struct Effects {
    /// Argument types passed to each resolved callee, one entry per analyzed call.
    pub(crate) calls: Vec<(RoutineId, ParamTuple)>,
}

/// The state on entry to `r`: parameters typed by their specialization, declaration, or (for
/// routines whose every call site is known) the arguments observed so far. Those start out void
/// and grow as callers are analyzed.
pub(crate) fn entry_state(r: &Routine) -> FlowState {
    let mut state = FlowState::new(&r.flow);
    for (i, p) in r.params.iter().enumerate() {
        let ty = match &r.specialization {
            Some(tuple) => tuple.get(i).cloned().unwrap_or(TypeRefMask::ANY),
            None => {
                let base = if !p.declared.is_any() {
                    p.declared
                } else if !r.exported {
                    r.observed_args.get(i).cloned().unwrap_or(TypeRefMask::ANY)
                } else {
                    TypeRefMask::ANY
                };
                match p.default_type {
                    Some(d) => base | d,
                    None => base,
                }
            }
        };
        state.set_var(p.handle, ty.without_ref_flag());
    }
    state
}

/// Joins the entry state into the input of the entry block, queueing it if that changed it.
pub(crate) fn seed_entry(r: &mut Routine) -> Result<bool> {
    let entry = r.cfg.entry;
    let state = entry_state(r);
    let changed = match r.analysis.block_inputs.get_mut(&entry) {
        None => {
            r.analysis.block_inputs.insert(entry, state);
            true
        }
        Some(input) => {
            let merged = input.merge(&state)?;
            let changed = merged != *input;
            *input = merged;
            changed
        }
    };
    if changed {
        r.pending.insert(entry);
    }
    Ok(changed)
}

/// Analyzes pending blocks of `r` until none are left.
pub(crate) fn analyze_routine(env: &Env, r: &mut Routine) -> Result<Effects> {
    let mut effects = Effects::default();
    r.status = RoutineStatus::Analyzing;
    let cfg = r.cfg.clone();
    while let Some(block) = r.pending.pop() {
        trace!(routine = %r.name, block = block.index(), "analyzing block");
        let state = match r.analysis.block_inputs.get(&block) {
            Some(s) => s.clone(),
            None => return err!("block {} of {} queued without an input state", block.index(), r.name),
        };
        let mut w = Walker {
            env,
            id: r.id,
            entry: cfg.entry,
            block,
            flow: &mut r.flow,
            analysis: &mut r.analysis,
            flags: &mut r.flags,
            pending: &mut r.pending,
            effects: &mut effects,
            state,
        };
        w.block(&cfg, &cfg.graph[block])?;
    }
    Ok(effects)
}

/// Analyzes one block.
pub(crate) struct Walker<'a, 'r> {
    env: &'r Env<'a>,
    id: RoutineId,
    entry: NodeIx,
    block: NodeIx,
    flow: &'r mut FlowContext,
    analysis: &'r mut RoutineAnalysis,
    flags: &'r mut RoutineFlags,
    pending: &'r mut WorkList<NodeIx>,
    effects: &'r mut Effects,
    state: FlowState,
}

impl<'a, 'r> Walker<'a, 'r> {
    fn block(&mut self, cfg: &ControlFlowGraph, bb: &BasicBlock) -> Result<()> {
        for op in bb.ops.iter() {
            self.op(op)?;
        }
        match &bb.exit {
            Exit::Fallthrough => {
                let out = self.state.clone();
                self.commit(&out)?;
                self.propagate_all(cfg, out.clone(), out)?;
            }
            Exit::Branch(c) => {
                let (t, f) = self.branch_states(c)?;
                self.commit(&t)?;
                self.commit(&f)?;
                self.propagate_all(cfg, t, f)?;
            }
            Exit::Iterate { source, key, value } => {
                let src = self.expr(source)?;
                let types = self.env.types;
                let elem = if src.is_any() || types.can_be(src, TypeKind::Object) {
                    TypeRefMask::ANY
                } else {
                    types.element_type_of(types.restrict(src, TypeKind::Array))
                };
                let done = self.state.clone();
                let mut next = self.state.clone();
                if let Some(k) = key {
                    let h = self.handle(k)?;
                    next.set_var(h, TypeRefMask::LONG | TypeRefMask::STRING);
                }
                let h = self.handle(value)?;
                next.set_var(h, elem);
                self.commit(&next)?;
                self.commit(&done)?;
                self.propagate_all(cfg, next, done)?;
            }
            Exit::Return(e) => {
                let ty = match e {
                    Some(e) => self.expr(e)?,
                    None => TypeRefMask::NULL,
                };
                let out = self.state.clone();
                self.commit(&out)?;
                self.flow.merge_return(ty.without_ref_flag());
            }
        }
        Ok(())
    }

    fn op(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::Expr(e) => {
                self.expr(e)?;
            }
            Op::Static(name, init) => {
                self.flags.insert(RoutineFlags::HAS_STATIC_VARS);
                let h = self.handle(name)?;
                let init = match init {
                    Some(e) => self.expr(e)?,
                    None => TypeRefMask::NULL,
                };
                self.analysis.static_sites.insert(h, self.block);
                // The variable keeps whatever the rest of the routine assigned to it on an
                // earlier invocation.
                let all = init | self.flow.merged_type(h)?.without_ref_flag();
                if self.flow.merge_static(h, all)? {
                    trace!(routine = self.id.index(), block = self.block.index(), "static variable widened");
                    self.pending.insert(self.entry);
                    self.pending.insert(self.block);
                }
                let ty = self.flow.static_type(h).unwrap_or(all);
                self.state.set_var(h, ty);
            }
            Op::Global(names) => {
                self.flags.insert(RoutineFlags::HAS_GLOBALS);
                for n in names.iter() {
                    let h = self.handle(n)?;
                    self.flow.set_reference(h)?;
                    self.state.set_var(h, TypeRefMask::ANY);
                }
            }
            Op::Unset(names) => {
                for n in names.iter() {
                    let h = self.handle(n)?;
                    self.state.set_unset(h);
                }
            }
        }
        Ok(())
    }

    fn handle(&mut self, name: &Name) -> Result<VarHandle> {
        let h = self.flow.get_or_create_handle(name);
        self.flow.mark_used(h)?;
        Ok(h)
    }

    /// Accumulates the variable types of `state` into the routine-wide types.
    fn commit(&mut self, state: &FlowState) -> Result<()> {
        for (h, mask) in state.iter_vars() {
            let mask = if self.flow.is_reference(h) {
                mask.with_ref_flag()
            } else {
                mask
            };
            if self.flow.merge_in(h, mask)? {
                if let Some(site) = self.analysis.static_sites.get(&h) {
                    // A static variable picked up a new type; its declaration must see it.
                    self.pending.insert(*site);
                    self.pending.insert(self.entry);
                }
            }
        }
        Ok(())
    }

    fn propagate_all(
        &mut self,
        cfg: &ControlFlowGraph,
        on_true: FlowState,
        on_false: FlowState,
    ) -> Result<()> {
        for (succ, trans) in cfg.successors(self.block) {
            let state = match trans {
                Transition::Always | Transition::OnTrue => on_true.clone(),
                Transition::OnFalse => on_false.clone(),
            };
            self.propagate(succ, state)?;
        }
        Ok(())
    }

    /// Joins `state` into the input of `to`, queueing `to` if its input changed.
    fn propagate(&mut self, to: NodeIx, state: FlowState) -> Result<()> {
        match self.analysis.block_inputs.get_mut(&to) {
            None => {
                self.analysis.block_inputs.insert(to, state);
                self.pending.insert(to);
            }
            Some(input) => {
                let merged = input.merge(&state)?;
                if merged != *input {
                    *input = merged;
                    self.pending.insert(to);
                }
            }
        }
        Ok(())
    }
}
