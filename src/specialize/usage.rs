//! Specialization from how a routine uses its own parameters.
use super::{narrow_any, SpecializationSet, Specializer};
use crate::bound::{BinaryOp, Expr, ExprKind, Literal};
use crate::common::Name;
use crate::program::{Program, Routine};
use crate::symbols::Symbols;
use crate::types::{TypeKind, TypeRefMask};

/// An operation on a parameter that reveals what type the body expects it to have.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Usage {
    /// `is_int($p)` and friends.
    Checked(TypeKind),
    InstanceOf(Name),
    /// `$p->member` or `$p->member()`.
    Member(Name),
    /// `$p[...]`
    Subscript,
    /// `$p . ...`
    Concat,
    /// `$p === null` and the like.
    NullCompare,
}

/// Calls `f` with the parameter index and usage of every revealing use of a parameter.
pub(crate) fn scan_usages(symbols: &Symbols, routine: &Routine, mut f: impl FnMut(usize, Usage)) {
    let param = |e: &Expr| -> Option<usize> {
        let name = e.as_variable()?;
        routine.params().iter().position(|p| &p.name == name)
    };
    for e in routine.cfg().exprs() {
        match &e.kind {
            ExprKind::Call(name, args) if args.len() == 1 => {
                let kind = symbols.library(name).and_then(|l| l.checks);
                if let (Some(kind), Some(i)) = (kind, param(&args[0])) {
                    f(i, Usage::Checked(kind));
                }
            }
            ExprKind::InstanceOf(operand, class) => {
                if let Some(i) = param(operand) {
                    f(i, Usage::InstanceOf(class.clone()));
                }
            }
            ExprKind::MethodCall(instance, member, _) | ExprKind::FieldAccess(instance, member) => {
                if let Some(i) = param(instance) {
                    f(i, Usage::Member(member.clone()));
                }
            }
            ExprKind::ArrayItem(array, _) => {
                if let Some(i) = param(array) {
                    f(i, Usage::Subscript);
                }
            }
            ExprKind::Concat(parts) => {
                for i in parts.iter().filter_map(|p| param(p)) {
                    f(i, Usage::Concat);
                }
            }
            ExprKind::Binary(BinaryOp::Concat, l, r)
            | ExprKind::CompoundAssign(BinaryOp::Concat, l, r) => {
                for i in [&**l, &**r].iter().filter_map(|p| param(*p)) {
                    f(i, Usage::Concat);
                }
            }
            ExprKind::Binary(op, l, r)
                if matches!(
                    op,
                    BinaryOp::Identical | BinaryOp::NotIdentical | BinaryOp::Eq | BinaryOp::NotEq
                ) =>
            {
                let other = match (param(l), param(r)) {
                    (Some(i), None) => Some((i, &**r)),
                    (None, Some(i)) => Some((i, &**l)),
                    _ => None,
                };
                if let Some((i, other)) = other {
                    if let ExprKind::Literal(Literal::Null) = other.kind {
                        f(i, Usage::NullCompare);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Proposes, for each untyped parameter, the union of the types its uses are consistent with.
#[derive(Debug)]
pub struct UsageSpecializer {
    max_class_candidates: usize,
}

impl UsageSpecializer {
    pub fn new(max_class_candidates: usize) -> UsageSpecializer {
        UsageSpecializer {
            max_class_candidates,
        }
    }
}

#[derive(Default, Clone)]
struct Evidence {
    mask: TypeRefMask,
    classes: Vec<Name>,
    // a member access no declared class has
    unknown_member: bool,
}

impl Specializer for UsageSpecializer {
    fn name(&self) -> &'static str {
        "usage"
    }

    fn gather(&self, program: &Program, routine: &Routine, set: &mut SpecializationSet) {
        let types = program.types();
        let mut evidence = vec![Evidence::default(); routine.params().len()];
        scan_usages(program.symbols(), routine, |i, usage| {
            let ev = &mut evidence[i];
            match usage {
                Usage::Checked(kind) => ev.mask |= kind.representative(),
                Usage::InstanceOf(class) => ev.classes.push(class),
                Usage::Member(member) => {
                    let owners = program.symbols().classes_with_member(&member);
                    if owners.is_empty() {
                        ev.unknown_member = true;
                    }
                    ev.classes.extend(owners);
                }
                Usage::Subscript => ev.mask |= TypeRefMask::ARRAY,
                Usage::Concat => ev.mask |= TypeRefMask::STRING,
                Usage::NullCompare => ev.mask |= TypeRefMask::NULL | TypeRefMask::OBJECT,
            }
        });
        let proposed: Vec<Option<TypeRefMask>> = evidence
            .into_iter()
            .map(|mut ev| {
                ev.classes.sort();
                ev.classes.dedup();
                if ev.unknown_member || ev.classes.len() > self.max_class_candidates {
                    ev.mask |= TypeRefMask::OBJECT;
                } else {
                    for c in ev.classes.iter() {
                        ev.mask |= types.class(c);
                    }
                }
                if ev.mask.is_void() {
                    None
                } else {
                    Some(ev.mask)
                }
            })
            .collect();
        if let Some(tuple) = narrow_any(&routine.param_types()[..], &proposed[..]) {
            set.insert(types, tuple);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound::{Param, RoutineDecl, Stmt};
    use crate::config::{AnalysisConfig, SpecializerKinds};
    use crate::types::TypeRefMask;

    fn usage_only() -> AnalysisConfig {
        AnalysisConfig::sequential().with_specializers(SpecializerKinds {
            usage: true,
            ..SpecializerKinds::none()
        })
    }

    #[test]
    fn members_and_subscripts() {
        let mut p = Program::new();
        p.declare_class("Point", &["x", "y"]);
        p.declare_class("Vec3", &["x", "y", "z"]);
        let f = p
            .add_routine(
                RoutineDecl::new("f")
                    .param(Param::new("p"))
                    .param(Param::new("xs"))
                    .param(Param::new("n"))
                    .body(vec![Stmt::ret(Some(Expr::binary(
                        BinaryOp::Add,
                        Expr::field(Expr::var("p"), "z"),
                        Expr::item(Expr::var("xs"), Some(Expr::long(0))),
                    )))]),
            )
            .unwrap();
        p.analyze(usage_only()).unwrap();
        let r = p.routine(f);
        let vec3 = p.types().class("Vec3");
        let want = [vec3, TypeRefMask::ARRAY, TypeRefMask::ANY];
        assert!(r.specialization_candidates().contains(&want[..]));
        let clone = p.results().unwrap().clones_of(f);
        assert_eq!(clone.len(), 1);
        assert_eq!(p.routine(clone[0]).specialization(), Some(&want[..]));
    }

    #[test]
    fn too_many_classes_fall_back_to_object() {
        let mut p = Program::new();
        for c in ["A", "B", "C"].iter() {
            p.declare_class(c, &["run"]);
        }
        let f = p
            .add_routine(
                RoutineDecl::new("f")
                    .param(Param::new("o"))
                    .body(vec![Stmt::expr(Expr::method_call(
                        Expr::var("o"),
                        "run",
                        vec![],
                    ))]),
            )
            .unwrap();
        p.analyze(usage_only().with_max_class_candidates(2)).unwrap();
        assert!(p
            .routine(f)
            .specialization_candidates()
            .contains(&[TypeRefMask::OBJECT]));
    }
}
