//! Routine specialization.
//!
//! After each analysis pass, specializers look at the evidence gathered so far (call sites,
//! how a routine uses its parameters, documentation types) and propose parameter tuples
//! narrower than the declared ones. An accepted tuple becomes a clone of the routine: a sibling
//! overload that shares the original's graph but is analyzed with the narrower parameter types.
//! Overload resolution then binds call sites whose arguments fit the clone to it.
mod call_site;
mod phpdoc;
mod targeted;
mod usage;

pub use call_site::CallSiteSpecializer;
pub use phpdoc::PhpDocSpecializer;
pub use targeted::TargetedSpecializer;
pub use usage::UsageSpecializer;

use crate::analysis;
use crate::common::Result;
use crate::config::AnalysisConfig;
use crate::program::{Program, Routine, RoutineFlags, RoutineId};
use crate::types::{TypeRefContext, TypeRefMask};

use itertools::Itertools;
use tracing::{info, trace};

use std::cmp::Ordering;

/// Types of the parameters of a routine, in order.
pub type ParamTuple = smallvec::SmallVec<[TypeRefMask; 4]>;

/// Candidate tuples for one routine, without duplicates, in a deterministic order: tuples are
/// compared by the names of their types rather than by their (interning-order dependent) bits.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpecializationSet {
    entries: Vec<(Vec<Vec<String>>, ParamTuple)>,
}

impl SpecializationSet {
    pub fn insert(&mut self, types: &TypeRefContext, tuple: ParamTuple) -> bool {
        let key: Vec<Vec<String>> = tuple.iter().map(|t| types.names(*t)).collect();
        let pos = self.entries.binary_search_by(|(k, t)| match k.cmp(&key) {
            Ordering::Equal => t[..].iter().map(|m| m.bits()).cmp(tuple.iter().map(|m| m.bits())),
            o => o,
        });
        match pos {
            Ok(_) => false,
            Err(ix) => {
                self.entries.insert(ix, (key, tuple));
                true
            }
        }
    }
    pub fn iter(&self) -> impl Iterator<Item = &ParamTuple> + '_ {
        self.entries.iter().map(|(_, t)| t)
    }
    pub fn contains(&self, tuple: &[TypeRefMask]) -> bool {
        self.iter().any(|t| &t[..] == tuple)
    }
    pub fn first(&self) -> Option<&ParamTuple> {
        self.iter().next()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An evidence-gathering strategy.
pub trait Specializer: Send + Sync {
    fn name(&self) -> &'static str;
    /// Adds the tuples `routine`'s evidence supports to `set`. Only called for routines with at
    /// least one parameter.
    fn gather(&self, program: &Program, routine: &Routine, set: &mut SpecializationSet);
}

/// Replaces parameters of `base` that are the any-type with the concrete types of `evidence`.
/// Returns `None` if nothing was narrowed.
pub(crate) fn narrow_any(base: &[TypeRefMask], evidence: &[Option<TypeRefMask>]) -> Option<ParamTuple> {
    let mut res: ParamTuple = base.iter().cloned().collect();
    let mut narrowed = false;
    for (slot, ev) in res.iter_mut().zip(evidence.iter()) {
        let ev = match ev {
            Some(ev) => ev.without_ref_flag(),
            None => continue,
        };
        if slot.is_any() && !ev.is_any() && !ev.is_void() {
            *slot = ev;
            narrowed = true;
        }
    }
    if narrowed {
        Some(res)
    } else {
        None
    }
}

/// Whether `tuple` may replace the parameter types `base`: it must narrow at least one
/// parameter from the any-type to something concrete, and widen none.
fn accepts(base: &[TypeRefMask], tuple: &[TypeRefMask]) -> bool {
    base.len() == tuple.len()
        && tuple
            .iter()
            .zip(base.iter())
            .all(|(t, b)| t.is_subset_of(*b))
        && tuple
            .iter()
            .zip(base.iter())
            .any(|(t, b)| b.is_any() && !t.is_any() && !t.is_void())
}

/// The configured strategies, run in order.
pub(crate) struct Specializers {
    strategies: Vec<Box<dyn Specializer>>,
    incremental: bool,
    max_per_routine: usize,
}

impl Specializers {
    pub(crate) fn from_config(config: &AnalysisConfig) -> Specializers {
        let kinds = &config.specializers;
        let mut strategies: Vec<Box<dyn Specializer>> = Vec::new();
        if kinds.call_site {
            strategies.push(Box::new(CallSiteSpecializer));
        }
        if kinds.usage {
            strategies.push(Box::new(UsageSpecializer::new(config.max_class_candidates)));
        }
        if kinds.targeted {
            strategies.push(Box::new(TargetedSpecializer));
        }
        if kinds.phpdoc {
            strategies.push(Box::new(PhpDocSpecializer));
        }
        Specializers {
            strategies,
            incremental: config.incremental_specialization,
            max_per_routine: config.max_specializations_per_routine,
        }
    }

    pub(crate) fn push(&mut self, s: Box<dyn Specializer>) {
        self.strategies.push(s)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Routines that frame-inspecting calls depend on must keep their exact parameters.
    pub(crate) fn is_eligible(&self, r: &Routine) -> bool {
        !r.params.is_empty()
            && (r.origin.is_none() || self.incremental)
            && !r.flags.contains(RoutineFlags::HAS_DYNAMIC_CALL)
            && r.applied.len() < self.max_per_routine
    }

    /// Runs every strategy over `r`.
    pub(crate) fn on_after_analysis(&self, program: &Program, r: &Routine) -> SpecializationSet {
        let mut set = SpecializationSet::default();
        for s in self.strategies.iter() {
            let before = set.len();
            s.gather(program, r, &mut set);
            if set.len() > before {
                trace!(
                    routine = %r.name,
                    specializer = s.name(),
                    proposed = set.len() - before,
                    "specialization candidates"
                );
            }
        }
        set
    }

    /// The first candidate of `r` that is acceptable and not yet applied.
    pub(crate) fn try_get_specialization(&self, r: &Routine) -> Option<ParamTuple> {
        let base = r.param_types();
        r.candidates
            .iter()
            .find(|t| accepts(&base[..], &t[..]) && !r.applied.iter().any(|a| a == *t))
            .cloned()
    }
}

/// Clones `origin` with its parameters fixed to `tuple` and schedules everything that has to
/// see the new overload.
pub(crate) fn apply(program: &mut Program, origin: RoutineId, tuple: ParamTuple) -> Result<RoutineId> {
    let rendered = tuple.iter().map(|t| program.types.display(*t)).join(", ");
    let id = program.push_clone(origin, tuple.clone())?;
    program.routines[origin.index()].applied.push(tuple);
    analysis::seed_entry(&mut program.routines[id.index()])?;
    // Call sites bind again, now with the clone among the candidates.
    for edge in program.call_graph.get_caller_edges(origin) {
        let caller = &mut program.routines[edge.caller.index()];
        if caller.analysis.block_inputs.contains_key(&edge.block) {
            caller.pending.insert(edge.block);
        }
    }
    info!(
        routine = %program.routines[origin.index()].name,
        clone = id.index(),
        params = %rendered,
        "specialized routine"
    );
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn sets_are_ordered_by_name() {
        let types = TypeRefContext::new();
        let mut set = SpecializationSet::default();
        assert!(set.insert(&types, smallvec![TypeRefMask::STRING]));
        assert!(set.insert(&types, smallvec![TypeRefMask::LONG]));
        assert!(!set.insert(&types, smallvec![TypeRefMask::STRING]));
        let got: Vec<ParamTuple> = set.iter().cloned().collect();
        let want: Vec<ParamTuple> = vec![smallvec![TypeRefMask::LONG], smallvec![TypeRefMask::STRING]];
        assert_eq!(got, want);
        assert!(set.contains(&[TypeRefMask::STRING]));
    }

    #[test]
    fn strategies_follow_the_config() {
        use crate::config::SpecializerKinds;
        let names = |kinds| {
            Specializers::from_config(&AnalysisConfig::sequential().with_specializers(kinds))
                .strategies
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
        };
        assert_eq!(
            names(SpecializerKinds::all()),
            vec!["call-site", "usage", "targeted", "phpdoc"]
        );
        assert_eq!(names(SpecializerKinds::default()), vec!["call-site", "targeted", "phpdoc"]);
        assert!(names(SpecializerKinds::none()).is_empty());
    }

    #[test]
    fn acceptance() {
        let any = TypeRefMask::ANY;
        assert!(accepts(&[any, any], &[TypeRefMask::STRING, any]));
        assert!(!accepts(&[any], &[any]));
        assert!(!accepts(&[TypeRefMask::LONG], &[TypeRefMask::LONG]));
        assert!(!accepts(&[TypeRefMask::LONG], &[TypeRefMask::STRING]));
        assert!(!accepts(&[any], &[TypeRefMask::VOID]));
        assert_eq!(
            narrow_any(&[any, TypeRefMask::LONG], &[Some(TypeRefMask::STRING), Some(any)]),
            Some(smallvec![TypeRefMask::STRING, TypeRefMask::LONG])
        );
        assert_eq!(narrow_any(&[any], &[Some(any)]), None);
    }
}
