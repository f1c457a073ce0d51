//! Per-block flow states.
//!
//! A [FlowState] is the abstract value propagated along CFG edges: a type per variable, which
//! variables are possibly and certainly initialized, and a small set of range notes. States are
//! cheap to clone; the type array is shared until one of the clones writes to it.
use super::context::{FlowContext, VarHandle};
use crate::bitset::{is_tracked, VarMask};
use crate::common::{NumTy, Result};
use crate::types::TypeRefMask;

use std::sync::Arc;

type SmallVec<T> = smallvec::SmallVec<[T; 2]>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NoteKind {
    /// The variable holds an integer strictly below the largest integer: incrementing it
    /// cannot overflow.
    LessThanLongMax,
    /// The variable holds an integer strictly above the smallest integer: decrementing it
    /// cannot overflow.
    GreaterThanLongMin,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Note {
    pub var: VarHandle,
    pub kind: NoteKind,
}

#[derive(Clone, Debug)]
pub struct FlowState {
    ctx: NumTy,
    vars: Arc<Vec<TypeRefMask>>,
    possibly: VarMask,
    certainly: VarMask,
    // sorted, deduplicated
    notes: SmallVec<Note>,
}

impl FlowState {
    /// An empty state: nothing initialized.
    pub fn new(ctx: &FlowContext) -> FlowState {
        FlowState {
            ctx: ctx.id(),
            vars: Arc::new(vec![TypeRefMask::VOID; ctx.num_vars()]),
            possibly: VarMask::empty(),
            certainly: VarMask::empty(),
            notes: Default::default(),
        }
    }

    pub fn context_id(&self) -> NumTy {
        self.ctx
    }

    /// The type of `h` in this state.
    ///
    /// Variables this state was sized for start out void. A handle registered with the context
    /// after the state was created belongs to a variable used by code this state has never
    /// seen, so it is the any-type, as is every variable beyond the bitset fast path.
    pub fn get_var(&self, h: VarHandle) -> TypeRefMask {
        if !is_tracked(h.index()) {
            return TypeRefMask::ANY;
        }
        self.slot_or_any(h.index())
    }

    fn slot_or_any(&self, i: usize) -> TypeRefMask {
        self.vars.get(i).cloned().unwrap_or(TypeRefMask::ANY)
    }

    fn slot(&mut self, h: VarHandle) -> &mut TypeRefMask {
        let vars = Arc::make_mut(&mut self.vars);
        if vars.len() <= h.index() {
            vars.resize(h.index() + 1, TypeRefMask::ANY);
        }
        &mut vars[h.index()]
    }

    /// Assigns `mask` to `h`, marking it initialized. Notes on `h` describe the old value, so
    /// they are dropped.
    pub fn set_var(&mut self, h: VarHandle, mask: TypeRefMask) {
        *self.slot(h) = mask;
        self.possibly.set(h.index());
        self.certainly.set(h.index());
        self.notes.retain(|n| n.var != h);
    }

    /// Replaces the type of `h` without touching what is known about its initialization. Used
    /// when a branch condition tells us something about a value that may still be unset.
    ///
    /// A variable that is possibly but not certainly initialized always keeps null.
    pub fn narrow_var(&mut self, h: VarHandle, mask: TypeRefMask) {
        if !is_tracked(h.index()) {
            return;
        }
        let i = h.index();
        let mask = if self.possibly.get(i) && !self.certainly.get(i) {
            mask | TypeRefMask::NULL
        } else {
            mask
        };
        *self.slot(h) = mask;
    }

    /// `unset($h)`.
    pub fn set_unset(&mut self, h: VarHandle) {
        *self.slot(h) = TypeRefMask::VOID;
        self.possibly.clear(h.index());
        self.certainly.clear(h.index());
        self.notes.retain(|n| n.var != h);
    }

    pub fn is_possibly_initialized(&self, h: VarHandle) -> bool {
        self.possibly.get(h.index())
    }
    pub fn is_certainly_initialized(&self, h: VarHandle) -> bool {
        self.certainly.get(h.index())
    }
    pub fn possibly_initialized(&self) -> VarMask {
        self.possibly
    }
    pub fn certainly_initialized(&self) -> VarMask {
        self.certainly
    }

    pub fn add_note(&mut self, var: VarHandle, kind: NoteKind) {
        let n = Note { var, kind };
        if let Err(ix) = self.notes.binary_search(&n) {
            self.notes.insert(ix, n);
        }
    }
    pub fn remove_note(&mut self, var: VarHandle, kind: NoteKind) {
        let n = Note { var, kind };
        if let Ok(ix) = self.notes.binary_search(&n) {
            self.notes.remove(ix);
        }
    }
    pub fn has_note(&self, var: VarHandle, kind: NoteKind) -> bool {
        self.notes.binary_search(&Note { var, kind }).is_ok()
    }
    pub fn notes(&self) -> &[Note] {
        &self.notes[..]
    }

    /// The join of two states of the same routine.
    ///
    /// Types are unioned pointwise. A variable that may be initialized but is no longer certainly
    /// initialized after the join may also still be unset, so it picks up null. Notes survive
    /// only if both sides agree on them.
    pub fn merge(&self, other: &FlowState) -> Result<FlowState> {
        if self.ctx != other.ctx {
            return err!(
                "merging flow states of different contexts ({} and {})",
                self.ctx,
                other.ctx
            );
        }
        let possibly = self.possibly.union(&other.possibly);
        let certainly = self.certainly.intersect(&other.certainly);
        let len = self.vars.len().max(other.vars.len());
        let mut vars = Vec::with_capacity(len);
        for i in 0..len {
            let l = self.slot_or_any(i);
            let r = other.slot_or_any(i);
            let mut m = l | r;
            if possibly.get(i) && !certainly.get(i) {
                m |= TypeRefMask::NULL;
            }
            vars.push(m);
        }
        let notes = self
            .notes
            .iter()
            .filter(|n| other.notes.binary_search(n).is_ok())
            .cloned()
            .collect();
        Ok(FlowState {
            ctx: self.ctx,
            vars: Arc::new(vars),
            possibly,
            certainly,
            notes,
        })
    }

    /// Whether every variable type of `self` is covered by `other`.
    pub fn is_subsumed_by(&self, other: &FlowState) -> bool {
        (0..self.vars.len()).all(|i| {
            let h = VarHandle(i as NumTy);
            self.get_var(h).is_subset_of(other.get_var(h))
        })
    }

    /// Pairs of (handle, type) for every variable with a non-void type.
    pub fn iter_vars(&self) -> impl Iterator<Item = (VarHandle, TypeRefMask)> + '_ {
        self.vars
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_void())
            .map(|(i, m)| (VarHandle(i as NumTy), *m))
    }
}

impl PartialEq for FlowState {
    fn eq(&self, other: &FlowState) -> bool {
        if self.ctx != other.ctx
            || self.possibly != other.possibly
            || self.certainly != other.certainly
            || self.notes != other.notes
        {
            return false;
        }
        let len = self.vars.len().max(other.vars.len());
        (0..len).all(|i| self.slot_or_any(i) == other.slot_or_any(i))
    }
}

impl Eq for FlowState {}
