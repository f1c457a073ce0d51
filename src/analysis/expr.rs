//! Transfer functions for expressions.
use super::{Branch, Walker};
use crate::bound::{BinaryOp, CastKind, Expr, ExprId, ExprKind, IncDec, Literal, UnaryOp};
use crate::common::{Name, Result};
use crate::flow::NoteKind;
use crate::program::{ReadSite, RoutineFlags, RoutineId};
use crate::specialize::ParamTuple;
use crate::symbols::{CallTarget, Signature};
use crate::types::{TypeKind, TypeRefMask};

use hashbrown::hash_map::Entry;
use smallvec::smallvec;

use std::mem;

type SmallVec<T> = smallvec::SmallVec<[T; 4]>;

impl<'a, 'r> Walker<'a, 'r> {
    /// Analyzes `e` in the current state, records its type, and returns it.
    pub(super) fn expr(&mut self, e: &Expr) -> Result<TypeRefMask> {
        let ty = self.expr_inner(e)?;
        self.record(e.id, ty)?;
        Ok(ty)
    }

    pub(super) fn record(&mut self, id: ExprId, ty: TypeRefMask) -> Result<()> {
        match self.analysis.expr_types.get_mut(id as usize) {
            Some(slot) => {
                *slot |= ty;
                Ok(())
            }
            None => err!("expression id {} out of range", id),
        }
    }

    /// The type recorded for an expression analyzed earlier.
    pub(super) fn type_of(&self, id: ExprId) -> TypeRefMask {
        self.analysis
            .expr_types
            .get(id as usize)
            .cloned()
            .unwrap_or(TypeRefMask::ANY)
    }

    pub(super) fn expr_inner(&mut self, e: &Expr) -> Result<TypeRefMask> {
        use ExprKind::*;
        let types = self.env.types;
        Ok(match &e.kind {
            Literal(l) => literal(l),
            Variable(name) => self.read_var(e.id, name, false)?,
            Assign(target, value) => {
                let v = self.expr(value)?.without_ref_flag();
                self.write(target, v)?;
                v
            }
            CompoundAssign(op, target, value) => {
                let cur = self.expr(target)?;
                let ty = if let BinaryOp::Coalesce = op {
                    let before = self.state.clone();
                    let v = self.expr(value)?;
                    self.state = before.merge(&self.state)?;
                    cur.remove(TypeRefMask::NULL) | v
                } else {
                    let v = self.expr(value)?;
                    self.binary_result(*op, cur, v)
                };
                self.write(target, ty)?;
                ty
            }
            IncDec(kind, target) => self.inc_dec(*kind, target)?,
            Binary(BinaryOp::And, _, _) | Binary(BinaryOp::Or, _, _) | Unary(UnaryOp::Not, _) => {
                self.cond_inner(e, Branch::Any)?
            }
            Binary(BinaryOp::Coalesce, l, r) => {
                let lt = self.read_quiet(l)?;
                let before = self.state.clone();
                let rt = self.expr(r)?;
                self.state = before.merge(&self.state)?;
                lt.remove(TypeRefMask::NULL) | rt
            }
            Binary(op, l, r) => {
                let lt = self.expr(l)?;
                let rt = self.expr(r)?;
                self.binary_result(*op, lt, rt)
            }
            Unary(op, operand) => {
                let t = self.expr(operand)?.without_ref_flag();
                match op {
                    UnaryOp::Not => TypeRefMask::BOOL,
                    UnaryOp::Neg | UnaryOp::Plus => {
                        if t == TypeRefMask::DOUBLE {
                            TypeRefMask::DOUBLE
                        } else {
                            TypeRefMask::NUMBERS
                        }
                    }
                    UnaryOp::BitNot => {
                        if types.is_kind(t, TypeKind::String) {
                            TypeRefMask::STRING
                        } else {
                            TypeRefMask::LONG
                        }
                    }
                    UnaryOp::Silence => t,
                }
            }
            Cast(kind, operand) => {
                let t = self.expr(operand)?.without_ref_flag();
                match kind {
                    CastKind::Long => TypeRefMask::LONG,
                    CastKind::Double => TypeRefMask::DOUBLE,
                    CastKind::Bool => TypeRefMask::BOOL,
                    CastKind::String => TypeRefMask::STRING,
                    CastKind::Array if types.is_kind(t, TypeKind::Array) => t,
                    CastKind::Array => TypeRefMask::ARRAY,
                    CastKind::Object if types.is_kind(t, TypeKind::Object) => t,
                    CastKind::Object => TypeRefMask::OBJECT,
                    CastKind::Unset => TypeRefMask::NULL,
                }
            }
            Conditional(c, t, f) => {
                let (on_true, on_false) = self.branch_states(c)?;
                self.state = on_true;
                let tt = match t {
                    Some(t) => self.expr(t)?,
                    // `c ?: f` yields `c` when it is truthy
                    None => self.type_of(c.id).remove(TypeRefMask::NULL),
                };
                let after_true = mem::replace(&mut self.state, on_false);
                let ft = self.expr(f)?;
                self.state = after_true.merge(&self.state)?;
                (tt | ft).without_ref_flag()
            }
            Call(name, args) => self.call(e.id, name, args)?,
            MethodCall(instance, _, args) => {
                self.expr(instance)?;
                for a in args.iter() {
                    self.expr(a)?;
                }
                // late bound
                TypeRefMask::ANY
            }
            New(class, args) => {
                for a in args.iter() {
                    self.expr(a)?;
                }
                types.class(class)
            }
            FieldAccess(instance, _) => {
                self.expr(instance)?;
                TypeRefMask::ANY
            }
            ArrayItem(array, key) => {
                let at = self.expr(array)?;
                match key {
                    Some(k) => {
                        self.expr(k)?;
                        types.element_type_of(at)
                    }
                    // `$a[]` outside of an assignment
                    None => TypeRefMask::ANY,
                }
            }
            ArrayInit(items) => {
                let mut elems = TypeRefMask::VOID;
                for (k, v) in items.iter() {
                    if let Some(k) = k {
                        self.expr(k)?;
                    }
                    elems |= self.expr(v)?.without_ref_flag();
                }
                types.array_of(elems)
            }
            InstanceOf(operand, _) => {
                self.expr(operand)?;
                TypeRefMask::BOOL
            }
            IsSet(vars) => {
                for v in vars.iter() {
                    self.read_quiet(v)?;
                }
                TypeRefMask::BOOL
            }
            Concat(parts) => {
                for p in parts.iter() {
                    self.expr(p)?;
                }
                TypeRefMask::STRING
            }
        })
    }

    /// Reads a variable. Reads of variables that are not certainly initialized may see null.
    /// `quiet` reads (under `isset`, `??`, or as a by-reference argument) are not reported.
    fn read_var(&mut self, id: ExprId, name: &Name, quiet: bool) -> Result<TypeRefMask> {
        let h = self.handle(name)?;
        let possibly = self.state.is_possibly_initialized(h);
        let certainly = self.state.is_certainly_initialized(h);
        if !quiet {
            match self.analysis.reads.entry(id) {
                Entry::Occupied(mut o) => {
                    let site = o.get_mut();
                    site.possibly |= possibly;
                    site.certainly &= certainly;
                }
                Entry::Vacant(v) => {
                    v.insert(ReadSite {
                        var: h,
                        possibly,
                        certainly,
                    });
                }
            }
        }
        let mut ty = self.state.get_var(h).without_ref_flag();
        if !certainly {
            ty |= TypeRefMask::NULL;
        }
        Ok(ty)
    }

    /// Evaluates `e` without reporting uninitialized variables it reads.
    pub(super) fn read_quiet(&mut self, e: &Expr) -> Result<TypeRefMask> {
        let ty = match &e.kind {
            ExprKind::Variable(name) => self.read_var(e.id, name, true)?,
            ExprKind::ArrayItem(array, Some(key)) => {
                let at = self.read_quiet(array)?;
                self.expr(key)?;
                self.env.types.element_type_of(at)
            }
            _ => return self.expr(e),
        };
        self.record(e.id, ty)?;
        Ok(ty)
    }

    /// Assigns `value` to `target`.
    pub(super) fn write(&mut self, target: &Expr, value: TypeRefMask) -> Result<()> {
        match &target.kind {
            ExprKind::Variable(name) => {
                let h = self.handle(name)?;
                self.state.set_var(h, value);
            }
            ExprKind::ArrayItem(array, key) => {
                if let Some(k) = key {
                    self.expr(k)?;
                }
                // Writing into an unset variable creates the array.
                let cur = self.read_quiet(array)?;
                let updated = self.updated_array(cur, value);
                self.write(array, updated)?;
            }
            ExprKind::FieldAccess(instance, _) => {
                self.expr(instance)?;
            }
            _ => {
                self.expr(target)?;
                return Ok(());
            }
        }
        self.record(target.id, value)
    }

    /// The type of `cur` after storing a `value` into one of its elements.
    fn updated_array(&self, cur: TypeRefMask, value: TypeRefMask) -> TypeRefMask {
        let types = self.env.types;
        if cur.is_any() {
            return TypeRefMask::ANY;
        }
        let arrays = types.restrict(cur, TypeKind::Array);
        let mut res = types.array_of(types.array_elements(arrays) | value);
        // string offsets and array-like objects keep their shape
        if types.can_be(cur, TypeKind::String) {
            res |= TypeRefMask::STRING;
        }
        res | types.restrict(cur, TypeKind::Object)
    }

    fn inc_dec(&mut self, kind: IncDec, target: &Expr) -> Result<TypeRefMask> {
        let cur = self.expr(target)?.without_ref_flag();
        let note = if kind.is_increment() {
            NoteKind::LessThanLongMax
        } else {
            NoteKind::GreaterThanLongMin
        };
        let proven = match target.as_variable() {
            Some(name) => {
                let h = self.handle(name)?;
                self.env.types.is_kind(cur, TypeKind::Long) && self.state.has_note(h, note)
            }
            None => false,
        };
        let next = if cur == TypeRefMask::DOUBLE {
            TypeRefMask::DOUBLE
        } else if proven {
            // cannot overflow: stays a plain integer
            TypeRefMask::LONG
        } else {
            TypeRefMask::NUMBERS
        };
        self.write(target, next)?;
        Ok(if kind.is_prefix() { next } else { cur })
    }

    /// Result types of binary operators on operands of the given types.
    pub(super) fn binary_result(
        &self,
        op: BinaryOp,
        l: TypeRefMask,
        r: TypeRefMask,
    ) -> TypeRefMask {
        use BinaryOp::*;
        let types = self.env.types;
        let (l, r) = (l.without_ref_flag(), r.without_ref_flag());
        let numeric = |l: TypeRefMask, r: TypeRefMask| {
            if l == TypeRefMask::DOUBLE || r == TypeRefMask::DOUBLE {
                TypeRefMask::DOUBLE
            } else {
                TypeRefMask::NUMBERS
            }
        };
        match op {
            Add => {
                if types.is_kind(l, TypeKind::Array) && types.is_kind(r, TypeKind::Array) {
                    // array union
                    l | r
                } else if types.is_kind(l, TypeKind::Numeric)
                    && types.is_kind(r, TypeKind::Numeric)
                {
                    numeric(l, r)
                } else if l.is_any() || r.is_any() {
                    TypeRefMask::NUMBERS | TypeRefMask::ARRAY
                } else {
                    TypeRefMask::NUMBERS
                }
            }
            Sub | Mul | Div | Pow => {
                if types.is_kind(l, TypeKind::Numeric) && types.is_kind(r, TypeKind::Numeric) {
                    numeric(l, r)
                } else {
                    TypeRefMask::NUMBERS
                }
            }
            Mod | Shl | Shr => TypeRefMask::LONG,
            BitAnd | BitOr | BitXor => {
                if types.is_kind(l, TypeKind::String) && types.is_kind(r, TypeKind::String) {
                    TypeRefMask::STRING
                } else {
                    TypeRefMask::LONG
                }
            }
            Concat => TypeRefMask::STRING,
            And | Or | Xor | Eq | NotEq | Identical | NotIdentical | Lt | Le | Gt | Ge => {
                TypeRefMask::BOOL
            }
            Coalesce => l.remove(TypeRefMask::NULL) | r,
        }
    }

    fn call(&mut self, id: ExprId, name: &Name, args: &[Expr]) -> Result<TypeRefMask> {
        let env = self.env;
        let cands: SmallVec<&Signature> = env
            .symbols
            .candidates(name)
            .iter()
            .filter_map(|c| env.sigs.get(c.index()))
            .collect();
        let by_ref = |i: usize| cands.iter().any(|s| s.by_ref.get(i).cloned().unwrap_or(false));
        let mut arg_types: ParamTuple = SmallVec::with_capacity(args.len());
        let mut arg_ids: SmallVec<ExprId> = SmallVec::with_capacity(args.len());
        for (i, a) in args.iter().enumerate() {
            let t = if by_ref(i) {
                self.read_quiet(a)?
            } else {
                self.expr(a)?
            };
            arg_types.push(t.without_ref_flag());
            arg_ids.push(a.id);
        }

        if cands.is_empty() {
            let (target, ty) = match env.symbols.library(name) {
                Some(lib) => {
                    if lib.dynamic {
                        self.flags.insert(RoutineFlags::HAS_DYNAMIC_CALL);
                    }
                    (CallTarget::Library(name.clone()), lib.returns)
                }
                None => (CallTarget::Unresolved, TypeRefMask::ANY),
            };
            self.analysis.call_targets.insert(id, target);
            return Ok(ty);
        }

        let target = env.resolver.resolve(env.types, &cands[..], &arg_types[..]);
        let callees: SmallVec<RoutineId> = match &target {
            CallTarget::Resolved(c) => smallvec![*c],
            CallTarget::Ambiguous(cs) => cs.iter().cloned().collect(),
            CallTarget::Library(_) | CallTarget::Unresolved => SmallVec::new(),
        };
        let mut ty = if callees.is_empty() {
            TypeRefMask::ANY
        } else {
            TypeRefMask::VOID
        };
        for callee in callees.into_iter() {
            let sig = match env.sigs.get(callee.index()) {
                Some(sig) => sig,
                None => return err!("call to {} resolved to unknown routine {:?}", name, callee),
            };
            env.call_graph
                .add_edge(self.id, callee, id, self.block, &arg_ids[..], &arg_types[..]);
            self.effects.calls.push((callee, arg_types.clone()));
            ty |= sig.return_type;
            for (i, a) in args.iter().enumerate() {
                if !sig.by_ref.get(i).cloned().unwrap_or(false) {
                    continue;
                }
                // the callee may store anything through the reference
                if let Some(v) = a.as_variable() {
                    let h = self.handle(v)?;
                    self.flow.set_reference(h)?;
                    self.state.set_var(h, TypeRefMask::ANY);
                }
            }
        }
        self.analysis.call_targets.insert(id, target);
        Ok(ty)
    }
}

fn literal(l: &Literal) -> TypeRefMask {
    match l {
        Literal::Null => TypeRefMask::NULL,
        Literal::Bool(_) => TypeRefMask::BOOL,
        Literal::Long(_) => TypeRefMask::LONG,
        Literal::Double(_) => TypeRefMask::DOUBLE,
        Literal::Str(_) => TypeRefMask::STRING,
    }
}
