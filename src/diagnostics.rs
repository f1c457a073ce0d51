//! Diagnostics derived from a converged analysis.
use crate::bound::{ExprId, ExprKind};
use crate::common::Name;
use crate::program::{Routine, RoutineId};
use crate::symbols::CallTarget;

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticKind {
    /// Read on a path where the variable was never assigned.
    UninitializedVariable(Name),
    /// Read on a path where the variable may not have been assigned.
    MaybeUninitializedVariable(Name),
    UnresolvedCall(Name),
    AmbiguousCall(Name),
    /// The fixpoint loop gave up; results must not be used.
    IterationBudgetExceeded(usize),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Diagnostic {
    /// `None` for diagnostics about the whole program.
    pub routine: Option<RoutineId>,
    pub expr: Option<ExprId>,
    pub kind: DiagnosticKind,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DiagnosticKind::*;
        match &self.kind {
            UninitializedVariable(v) => write!(f, "variable ${} is used before it is assigned", v),
            MaybeUninitializedVariable(v) => {
                write!(f, "variable ${} may be used before it is assigned", v)
            }
            UnresolvedCall(n) => write!(f, "call to undefined function {}()", n),
            AmbiguousCall(n) => write!(f, "call to {}() is ambiguous; dispatch is late bound", n),
            IterationBudgetExceeded(n) => {
                write!(f, "type analysis did not converge within {} iterations", n)
            }
        }
    }
}

/// Diagnostics for one routine, sorted. Clones report nothing: they share the body of their
/// origin, which reports for them.
pub(crate) fn routine_diagnostics(r: &Routine) -> Vec<Diagnostic> {
    if r.origin().is_some() {
        return Vec::new();
    }
    let mut res = Vec::new();
    for (expr, site) in r.read_sites() {
        if site.certainly {
            continue;
        }
        let name = match r.flow().name(site.var) {
            Ok(n) => n.clone(),
            Err(_) => continue,
        };
        let kind = if site.possibly {
            DiagnosticKind::MaybeUninitializedVariable(name)
        } else {
            DiagnosticKind::UninitializedVariable(name)
        };
        res.push(Diagnostic {
            routine: Some(r.id()),
            expr: Some(expr),
            kind,
        });
    }
    for e in r.cfg().exprs() {
        let name = match &e.kind {
            ExprKind::Call(name, _) => name,
            _ => continue,
        };
        let kind = match r.call_target(e.id) {
            Some(CallTarget::Unresolved) => DiagnosticKind::UnresolvedCall(name.clone()),
            Some(CallTarget::Ambiguous(_)) => DiagnosticKind::AmbiguousCall(name.clone()),
            _ => continue,
        };
        res.push(Diagnostic {
            routine: Some(r.id()),
            expr: Some(e.id),
            kind,
        });
    }
    res.sort();
    res
}

/// Sorts and removes duplicates.
pub(crate) fn normalize(diags: &mut Vec<Diagnostic>) {
    diags.sort();
    diags.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_order() {
        let a = Diagnostic {
            routine: Some(RoutineId(1)),
            expr: Some(3),
            kind: DiagnosticKind::UnresolvedCall("nope".into()),
        };
        let b = Diagnostic {
            routine: None,
            expr: None,
            kind: DiagnosticKind::IterationBudgetExceeded(4),
        };
        assert_eq!(format!("{}", a), "call to undefined function nope()");
        let mut v = vec![a.clone(), b.clone(), a.clone()];
        normalize(&mut v);
        assert_eq!(v, vec![b, a]);
    }
}
