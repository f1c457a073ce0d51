//! Specialization from documentation types.
use super::{narrow_any, SpecializationSet, Specializer};
use crate::program::{Program, Routine};
use crate::types::TypeRefMask;

/// Proposes the documented types of untyped parameters.
#[derive(Debug, Default)]
pub struct PhpDocSpecializer;

impl Specializer for PhpDocSpecializer {
    fn name(&self) -> &'static str {
        "phpdoc"
    }

    fn gather(&self, program: &Program, routine: &Routine, set: &mut SpecializationSet) {
        let docs: Vec<Option<TypeRefMask>> = routine.params().iter().map(|p| p.doc).collect();
        if let Some(tuple) = narrow_any(&routine.param_types()[..], &docs[..]) {
            set.insert(program.types(), tuple);
        }
    }
}
