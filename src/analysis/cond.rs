//! Branch-conditioned analysis of conditions.
//!
//! A condition can be analyzed under the hypothesis that it evaluates to true, to false, or
//! without caring. The hypotheses matter for short-circuit operators, whose right operand only
//! runs under one outcome of the left, and for narrowing: `is_int($x)` tells us something about
//! `$x` only in one of the branches.
use super::Walker;
use crate::bound::{BinaryOp, Expr, ExprKind, Literal, UnaryOp};
use crate::common::Result;
use crate::flow::{FlowState, NoteKind, VarHandle};
use crate::types::{TypeKind, TypeRefMask};

use std::mem;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Branch {
    /// The state after the condition, whatever it evaluated to.
    Any,
    /// The state in which the condition evaluated to true.
    True,
    False,
}

impl Branch {
    fn negate(self) -> Branch {
        match self {
            Branch::Any => Branch::Any,
            Branch::True => Branch::False,
            Branch::False => Branch::True,
        }
    }
}

impl<'a, 'r> Walker<'a, 'r> {
    /// Analyzes `e` as a condition. Afterwards the current state is the one in which `e`
    /// evaluated to `branch`.
    pub(super) fn cond(&mut self, e: &Expr, branch: Branch) -> Result<TypeRefMask> {
        let ty = self.cond_inner(e, branch)?;
        self.record(e.id, ty)?;
        Ok(ty)
    }

    pub(super) fn cond_inner(&mut self, e: &Expr, branch: Branch) -> Result<TypeRefMask> {
        match &e.kind {
            ExprKind::Binary(op @ BinaryOp::And, l, r) | ExprKind::Binary(op @ BinaryOp::Or, l, r) => {
                self.short_circuit(*op, l, r, branch)?;
                Ok(TypeRefMask::BOOL)
            }
            ExprKind::Unary(UnaryOp::Not, operand) => {
                self.cond(operand, branch.negate())?;
                Ok(TypeRefMask::BOOL)
            }
            _ => {
                let ty = self.expr_inner(e)?;
                if branch != Branch::Any {
                    self.narrow(e, branch == Branch::True)?;
                }
                Ok(ty)
            }
        }
    }

    /// The states in which `e` evaluated to true and to false.
    pub(super) fn branch_states(&mut self, e: &Expr) -> Result<(FlowState, FlowState)> {
        let start = self.state.clone();
        self.cond(e, Branch::True)?;
        let on_true = mem::replace(&mut self.state, start);
        self.cond(e, Branch::False)?;
        Ok((on_true, self.state.clone()))
    }

    /// `l && r` and `l || r`. The right operand only runs when `l` did not already decide the
    /// outcome, so it is analyzed under that hypothesis alone; the outcomes that `l` decides on
    /// its own are joined back in afterwards.
    fn short_circuit(&mut self, op: BinaryOp, l: &Expr, r: &Expr, branch: Branch) -> Result<()> {
        let and = op == BinaryOp::And;
        // the outcome of `l` that makes `r` run
        let (runs_r, decides) = if and {
            (Branch::True, Branch::False)
        } else {
            (Branch::False, Branch::True)
        };
        match (and, branch) {
            // both operands must have produced the requested outcome
            (true, Branch::True) | (false, Branch::False) => {
                self.cond(l, runs_r)?;
                self.cond(r, branch)?;
            }
            // `l` decides on its own, or `r` runs and produces the outcome
            (true, Branch::False) | (false, Branch::True) | (_, Branch::Any) => {
                let start = self.state.clone();
                self.cond(l, decides)?;
                let decided = mem::replace(&mut self.state, start);
                self.cond(l, runs_r)?;
                self.cond(r, branch)?;
                self.state = decided.merge(&self.state)?;
            }
        }
        Ok(())
    }

    /// The type of `h` as a read would see it.
    fn current(&self, h: VarHandle) -> TypeRefMask {
        let ty = self.state.get_var(h).without_ref_flag();
        if self.state.is_certainly_initialized(h) {
            ty
        } else {
            ty | TypeRefMask::NULL
        }
    }

    fn var_of(&mut self, e: &Expr) -> Result<Option<VarHandle>> {
        match e.as_variable() {
            Some(name) => Ok(Some(self.handle(name)?)),
            None => Ok(None),
        }
    }

    /// The value of `h` is known to be non-null, so it is defined.
    fn assume_not_null(&mut self, h: VarHandle) {
        let ty = self.current(h).remove(TypeRefMask::NULL);
        self.state.set_var(h, ty);
    }

    /// Narrows the current state given that `e` evaluated to `outcome`.
    fn narrow(&mut self, e: &Expr, outcome: bool) -> Result<()> {
        use BinaryOp::*;
        let types = self.env.types;
        match &e.kind {
            // a truthy value is not null
            ExprKind::Variable(_) | ExprKind::Assign(..) if outcome => {
                let target = match &e.kind {
                    ExprKind::Assign(target, _) => &**target,
                    _ => e,
                };
                if let Some(h) = self.var_of(target)? {
                    self.assume_not_null(h);
                }
            }
            ExprKind::IsSet(vars) => {
                if outcome {
                    for v in vars.iter() {
                        if let Some(h) = self.var_of(v)? {
                            self.assume_not_null(h);
                        }
                    }
                } else if let [v] = &vars[..] {
                    if let Some(h) = self.var_of(v)? {
                        self.state.narrow_var(h, TypeRefMask::NULL);
                    }
                }
            }
            ExprKind::Call(name, args) if args.len() == 1 => {
                let kind = match self.env.symbols.library(name).and_then(|l| l.checks) {
                    Some(kind) => kind,
                    None => return Ok(()),
                };
                let h = match self.var_of(&args[0])? {
                    Some(h) => h,
                    None => return Ok(()),
                };
                let cur = self.current(h);
                if outcome {
                    let narrowed = types.restrict(cur, kind);
                    let narrowed = if narrowed.is_void() || narrowed.is_any() {
                        kind.representative()
                    } else {
                        narrowed
                    };
                    if kind == TypeKind::Null {
                        self.state.narrow_var(h, narrowed);
                    } else {
                        self.state.set_var(h, narrowed);
                    }
                } else if kind == TypeKind::Null {
                    self.assume_not_null(h);
                } else {
                    let rest = cur.remove(types.kind_mask(kind));
                    self.state.narrow_var(h, rest);
                }
            }
            ExprKind::InstanceOf(operand, class) if outcome => {
                if let Some(h) = self.var_of(operand)? {
                    self.state.set_var(h, types.class(class));
                }
            }
            ExprKind::Binary(op @ Identical, l, r)
            | ExprKind::Binary(op @ NotIdentical, l, r)
            | ExprKind::Binary(op @ Eq, l, r)
            | ExprKind::Binary(op @ NotEq, l, r) => {
                let var = match (is_null_literal(l), is_null_literal(r)) {
                    (false, true) => self.var_of(l)?,
                    (true, false) => self.var_of(r)?,
                    _ => None,
                };
                let h = match var {
                    Some(h) => h,
                    None => return Ok(()),
                };
                match (op, outcome) {
                    (Identical, true) | (NotIdentical, false) => {
                        self.state.narrow_var(h, TypeRefMask::NULL)
                    }
                    (Identical, false) | (NotIdentical, true) | (Eq, false) | (NotEq, true) => {
                        self.assume_not_null(h)
                    }
                    // loose equality with null also holds for false, 0, "" and []
                    _ => {}
                }
            }
            ExprKind::Binary(op @ Lt, l, r) | ExprKind::Binary(op @ Gt, l, r) if outcome => {
                // x < n and n > x put x below an integer; x > n and n < x put it above one.
                let (below, above) = if *op == Lt { (l, r) } else { (r, l) };
                if types.is_kind(self.type_of(above.id), TypeKind::Long) {
                    if let Some(h) = self.var_of(below)? {
                        self.state.add_note(h, NoteKind::LessThanLongMax);
                    }
                }
                if types.is_kind(self.type_of(below.id), TypeKind::Long) {
                    if let Some(h) = self.var_of(above)? {
                        self.state.add_note(h, NoteKind::GreaterThanLongMin);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn is_null_literal(e: &Expr) -> bool {
    matches!(e.kind, ExprKind::Literal(Literal::Null))
}

#[cfg(test)]
mod tests {
    use crate::bound::{BinaryOp, Expr, ExprKind, Param, RoutineDecl, Stmt};
    use crate::config::AnalysisConfig;
    use crate::program::{Program, Routine};
    use crate::types::{TypeHint, TypeRefMask};

    fn nullable_int() -> TypeHint {
        TypeHint::Nullable(Box::new(TypeHint::Int))
    }

    /// The type of the value stored by the assignment to `var`. Unlike the routine-wide type of
    /// `var`, this is what the branch saw.
    fn assigned(r: &Routine, var: &str) -> TypeRefMask {
        let e = r
            .cfg()
            .exprs()
            .into_iter()
            .find(|e| match &e.kind {
                ExprKind::Assign(target, _) => target.as_variable().map_or(false, |n| &**n == var),
                _ => false,
            })
            .unwrap()
            .id;
        r.expr_type(e)
    }

    /// Analyzes `f(?int $x) { if (<cond>) { $t = $x; } else { $f = $x; } }` and returns the
    /// types `$x` had in each branch.
    fn narrowed(cond: Expr) -> (TypeRefMask, TypeRefMask) {
        let mut p = Program::new();
        let id = p
            .add_routine(
                RoutineDecl::new("f")
                    .param(Param::new("x").hint(nullable_int()))
                    .body(vec![Stmt::if_(
                        cond,
                        vec![Stmt::expr(Expr::assign(Expr::var("t"), Expr::var("x")))],
                        vec![Stmt::expr(Expr::assign(Expr::var("f"), Expr::var("x")))],
                    )]),
            )
            .unwrap();
        p.analyze(AnalysisConfig::sequential()).unwrap();
        let r = p.routine(id);
        (assigned(r, "t"), assigned(r, "f"))
    }

    const INT_OR_NULL: TypeRefMask = TypeRefMask::from_bits(
        TypeRefMask::LONG.bits() | TypeRefMask::NULL.bits(),
    );

    #[test]
    fn truthiness_and_null_checks() {
        assert_eq!(narrowed(Expr::var("x")), (TypeRefMask::LONG, INT_OR_NULL));
        assert_eq!(
            narrowed(Expr::isset(vec![Expr::var("x")])),
            (TypeRefMask::LONG, TypeRefMask::NULL)
        );
        assert_eq!(
            narrowed(Expr::binary(BinaryOp::Identical, Expr::var("x"), Expr::null())),
            (TypeRefMask::NULL, TypeRefMask::LONG)
        );
        assert_eq!(
            narrowed(Expr::binary(BinaryOp::NotIdentical, Expr::null(), Expr::var("x"))),
            (TypeRefMask::LONG, TypeRefMask::NULL)
        );
        // loose equality does not prove null
        assert_eq!(
            narrowed(Expr::binary(BinaryOp::Eq, Expr::var("x"), Expr::null())),
            (INT_OR_NULL, TypeRefMask::LONG)
        );
    }

    #[test]
    fn negation_swaps_branches() {
        assert_eq!(
            narrowed(Expr::not(Expr::var("x"))),
            (INT_OR_NULL, TypeRefMask::LONG)
        );
    }

    #[test]
    fn type_checks() {
        assert_eq!(
            narrowed(Expr::call("is_int", vec![Expr::var("x")])),
            (TypeRefMask::LONG, TypeRefMask::NULL)
        );
        assert_eq!(
            narrowed(Expr::call("is_null", vec![Expr::var("x")])),
            (TypeRefMask::NULL, TypeRefMask::LONG)
        );
    }
}
