//! Specialization from the argument types observed at call sites.
use super::{narrow_any, SpecializationSet, Specializer};
use crate::program::{Program, Routine};
use crate::types::TypeRefMask;

/// Proposes one tuple per call site whose arguments are narrower than the parameters.
#[derive(Debug, Default)]
pub struct CallSiteSpecializer;

impl Specializer for CallSiteSpecializer {
    fn name(&self) -> &'static str {
        "call-site"
    }

    fn gather(&self, program: &Program, routine: &Routine, set: &mut SpecializationSet) {
        let base = routine.param_types();
        for edge in program.call_graph().get_caller_edges(routine.id()) {
            let args: Vec<Option<TypeRefMask>> = edge.arg_types.iter().cloned().map(Some).collect();
            if let Some(tuple) = narrow_any(&base[..], &args[..]) {
                set.insert(program.types(), tuple);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bound::{Expr, Param, RoutineDecl, Stmt};
    use crate::config::{AnalysisConfig, SpecializerKinds};
    use crate::program::Program;
    use crate::types::TypeRefMask;

    #[test]
    fn one_tuple_per_argument_shape() {
        let mut p = Program::new();
        let f = p
            .add_routine(
                RoutineDecl::new("f")
                    .param(Param::new("x"))
                    .body(vec![Stmt::ret(Some(Expr::var("x")))]),
            )
            .unwrap();
        p.add_routine(RoutineDecl::new("main").body(vec![
            Stmt::expr(Expr::call("f", vec![Expr::string("s")])),
            Stmt::expr(Expr::call("f", vec![Expr::long(1)])),
            Stmt::expr(Expr::call("f", vec![Expr::call("mystery", vec![])])),
        ]))
        .unwrap();
        let config = AnalysisConfig::sequential().with_specializers(SpecializerKinds {
            call_site: true,
            ..SpecializerKinds::none()
        });
        p.analyze(config).unwrap();
        let set = p.routine(f).specialization_candidates();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&[TypeRefMask::STRING]));
        assert!(set.contains(&[TypeRefMask::LONG]));
        assert!(!set.contains(&[TypeRefMask::ANY]));
    }
}
