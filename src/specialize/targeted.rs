//! String specialization backed by both usage and call-site evidence.
use super::usage::{scan_usages, Usage};
use super::{SpecializationSet, Specializer};
use crate::program::{Program, Routine};
use crate::types::{TypeKind, TypeRefMask};

/// Proposes `string` for untyped parameters that the body treats as strings and that at least
/// one call site actually passes a string to.
#[derive(Debug, Default)]
pub struct TargetedSpecializer;

impl Specializer for TargetedSpecializer {
    fn name(&self) -> &'static str {
        "targeted"
    }

    fn gather(&self, program: &Program, routine: &Routine, set: &mut SpecializationSet) {
        let base = routine.param_types();
        let mut stringy = vec![false; base.len()];
        scan_usages(program.symbols(), routine, |i, usage| match usage {
            Usage::Concat | Usage::Checked(TypeKind::String) => stringy[i] = true,
            _ => {}
        });
        if !stringy.iter().any(|s| *s) {
            return;
        }
        let edges = program.call_graph().get_caller_edges(routine.id());
        let mut tuple = base.clone();
        let mut narrowed = false;
        for (i, slot) in tuple.iter_mut().enumerate() {
            if !stringy[i] || !slot.is_any() {
                continue;
            }
            let corroborated = edges
                .iter()
                .any(|e| e.arg_types.get(i).map(|t| t.without_ref_flag()) == Some(TypeRefMask::STRING));
            if corroborated {
                *slot = TypeRefMask::STRING;
                narrowed = true;
            }
        }
        if narrowed {
            set.insert(program.types(), tuple);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bound::{Expr, Param, RoutineDecl, Stmt};
    use crate::config::{AnalysisConfig, SpecializerKinds};
    use crate::program::Program;
    use crate::types::TypeRefMask;

    fn program(arg: Expr) -> (Program, crate::program::RoutineId) {
        let mut p = Program::new();
        let greet = p
            .add_routine(
                RoutineDecl::new("greet")
                    .param(Param::new("name"))
                    .body(vec![Stmt::ret(Some(Expr::concat(vec![
                        Expr::string("hello "),
                        Expr::var("name"),
                    ])))]),
            )
            .unwrap();
        p.add_routine(RoutineDecl::new("main").body(vec![Stmt::expr(Expr::call("greet", vec![arg]))]))
            .unwrap();
        let config = AnalysisConfig::sequential().with_specializers(SpecializerKinds {
            targeted: true,
            ..SpecializerKinds::none()
        });
        p.analyze(config).unwrap();
        (p, greet)
    }

    #[test]
    fn needs_a_string_call_site() {
        let (p, greet) = program(Expr::string("bob"));
        assert!(p
            .routine(greet)
            .specialization_candidates()
            .contains(&[TypeRefMask::STRING]));
        assert_eq!(p.results().unwrap().clones_of(greet).len(), 1);

        // usage alone is not enough
        let (p, greet) = program(Expr::long(7));
        assert!(p.routine(greet).specialization_candidates().is_empty());
        assert!(p.results().unwrap().clones_of(greet).is_empty());
    }
}
