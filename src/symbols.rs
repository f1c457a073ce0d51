//! The symbol table the analysis consults: user routines and their overloads, class members,
//! and the handful of library functions whose result types we know.
use crate::common::Name;
use crate::program::RoutineId;
use crate::types::{TypeKind, TypeRefContext, TypeRefMask};

use hashbrown::HashMap;

type SmallVec<T> = smallvec::SmallVec<[T; 4]>;

/// A library (non-user) function.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LibraryFunction {
    pub returns: TypeRefMask,
    /// Type-check functions (`is_int($x)` and friends) narrow their argument in the true branch.
    pub checks: Option<TypeKind>,
    /// Functions that inspect or rewrite the caller's frame, or call back into arbitrary code.
    pub dynamic: bool,
}

impl LibraryFunction {
    const fn returns(returns: TypeRefMask) -> LibraryFunction {
        LibraryFunction {
            returns,
            checks: None,
            dynamic: false,
        }
    }
    const fn check(kind: TypeKind) -> LibraryFunction {
        LibraryFunction {
            returns: TypeRefMask::BOOL,
            checks: Some(kind),
            dynamic: false,
        }
    }
    const fn dynamic(returns: TypeRefMask) -> LibraryFunction {
        LibraryFunction {
            returns,
            checks: None,
            dynamic: true,
        }
    }
}

static_map!(
    LIBRARY<&'static str, LibraryFunction>,
    ["is_int", LibraryFunction::check(TypeKind::Long)],
    ["is_integer", LibraryFunction::check(TypeKind::Long)],
    ["is_long", LibraryFunction::check(TypeKind::Long)],
    ["is_float", LibraryFunction::check(TypeKind::Double)],
    ["is_double", LibraryFunction::check(TypeKind::Double)],
    ["is_string", LibraryFunction::check(TypeKind::String)],
    ["is_bool", LibraryFunction::check(TypeKind::Bool)],
    ["is_array", LibraryFunction::check(TypeKind::Array)],
    ["is_object", LibraryFunction::check(TypeKind::Object)],
    ["is_null", LibraryFunction::check(TypeKind::Null)],
    ["is_numeric", LibraryFunction::returns(TypeRefMask::BOOL)],
    ["strlen", LibraryFunction::returns(TypeRefMask::LONG)],
    ["count", LibraryFunction::returns(TypeRefMask::LONG)],
    ["intval", LibraryFunction::returns(TypeRefMask::LONG)],
    ["ord", LibraryFunction::returns(TypeRefMask::LONG)],
    ["floatval", LibraryFunction::returns(TypeRefMask::DOUBLE)],
    ["sqrt", LibraryFunction::returns(TypeRefMask::DOUBLE)],
    ["abs", LibraryFunction::returns(TypeRefMask::NUMBERS)],
    ["strval", LibraryFunction::returns(TypeRefMask::STRING)],
    ["substr", LibraryFunction::returns(TypeRefMask::STRING)],
    ["str_repeat", LibraryFunction::returns(TypeRefMask::STRING)],
    ["strtolower", LibraryFunction::returns(TypeRefMask::STRING)],
    ["strtoupper", LibraryFunction::returns(TypeRefMask::STRING)],
    ["trim", LibraryFunction::returns(TypeRefMask::STRING)],
    ["implode", LibraryFunction::returns(TypeRefMask::STRING)],
    ["sprintf", LibraryFunction::returns(TypeRefMask::STRING)],
    ["chr", LibraryFunction::returns(TypeRefMask::STRING)],
    ["explode", LibraryFunction::returns(TypeRefMask::ARRAY)],
    ["array_keys", LibraryFunction::returns(TypeRefMask::ARRAY)],
    ["array_values", LibraryFunction::returns(TypeRefMask::ARRAY)],
    ["in_array", LibraryFunction::returns(TypeRefMask::BOOL)],
    ["func_get_args", LibraryFunction::dynamic(TypeRefMask::ARRAY)],
    ["func_num_args", LibraryFunction::dynamic(TypeRefMask::LONG)],
    ["compact", LibraryFunction::dynamic(TypeRefMask::ARRAY)],
    ["extract", LibraryFunction::dynamic(TypeRefMask::LONG)],
    ["get_defined_vars", LibraryFunction::dynamic(TypeRefMask::ARRAY)],
    ["call_user_func", LibraryFunction::dynamic(TypeRefMask::ANY)],
    ["call_user_func_array", LibraryFunction::dynamic(TypeRefMask::ANY)]
);

/// How a call site was bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallTarget {
    Resolved(RoutineId),
    /// Several overloads apply and none is most specific; dispatch happens at run time.
    Ambiguous(Vec<RoutineId>),
    Library(Name),
    /// No routine of that name is known; the call is late bound.
    Unresolved,
}

/// What overload resolution needs to know about a routine. The analysis works from a snapshot
/// of these taken at the start of every round.
#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub id: RoutineId,
    /// Entry types of the parameters: declared types, or the specialized types of a clone.
    pub params: SmallVec<TypeRefMask>,
    pub by_ref: SmallVec<bool>,
    /// Parameters without a default value.
    pub required: usize,
    pub return_type: TypeRefMask,
    pub specialized: bool,
}

/// Picks the routine a call binds to.
pub trait OverloadResolver: Send + Sync {
    fn resolve(
        &self,
        types: &TypeRefContext,
        candidates: &[&Signature],
        args: &[TypeRefMask],
    ) -> CallTarget;
}

/// Picks the most specific applicable candidate.
///
/// A candidate applies if enough arguments are supplied and every argument type is covered by
/// the corresponding parameter type. If exactly one applicable candidate is covered by every
/// other one, it wins. A lone candidate always wins: there is nothing else to dispatch to.
#[derive(Default, Debug)]
pub struct DefaultResolver;

impl DefaultResolver {
    fn applies(sig: &Signature, args: &[TypeRefMask]) -> bool {
        if args.len() < sig.required {
            return false;
        }
        sig.params
            .iter()
            .zip(args.iter())
            .all(|(p, a)| a.without_ref_flag().is_subset_of(*p))
    }

    fn at_least_as_specific(l: &Signature, r: &Signature) -> bool {
        l.params
            .iter()
            .zip(r.params.iter())
            .all(|(lp, rp)| lp.is_subset_of(*rp))
    }
}

impl OverloadResolver for DefaultResolver {
    fn resolve(
        &self,
        _types: &TypeRefContext,
        candidates: &[&Signature],
        args: &[TypeRefMask],
    ) -> CallTarget {
        match candidates {
            [] => return CallTarget::Unresolved,
            [only] => return CallTarget::Resolved(only.id),
            _ => {}
        }
        let applicable: SmallVec<&Signature> = candidates
            .iter()
            .cloned()
            .filter(|s| Self::applies(s, args))
            .collect();
        let best: SmallVec<&Signature> = applicable
            .iter()
            .cloned()
            .filter(|l| {
                applicable
                    .iter()
                    .all(|r| Self::at_least_as_specific(l, r))
            })
            .collect();
        match &best[..] {
            [one] => CallTarget::Resolved(one.id),
            _ => {
                let mut ids: Vec<RoutineId> = if applicable.is_empty() {
                    candidates.iter().map(|s| s.id).collect()
                } else {
                    applicable.iter().map(|s| s.id).collect()
                };
                ids.sort();
                CallTarget::Ambiguous(ids)
            }
        }
    }
}

#[derive(Default, Debug, Clone)]
struct ClassInfo {
    members: Vec<Name>,
}

#[derive(Default, Debug, Clone)]
pub struct Symbols {
    // keyed by lowercased name
    routines: HashMap<String, SmallVec<RoutineId>>,
    classes: HashMap<Name, ClassInfo>,
}

impl Symbols {
    /// Adds `id` to the overloads of `name`. Routine names are case-insensitive.
    pub fn declare_routine(&mut self, name: &str, id: RoutineId) {
        let ids = self.routines.entry(name.to_ascii_lowercase()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// The overloads of `name`: the declared routine followed by its specialized clones.
    pub fn candidates(&self, name: &str) -> &[RoutineId] {
        match self.routines.get(&name.to_ascii_lowercase()) {
            Some(ids) => &ids[..],
            None => &[],
        }
    }

    pub fn library(&self, name: &str) -> Option<LibraryFunction> {
        LIBRARY.get(name.to_ascii_lowercase().as_str()).cloned()
    }

    /// Declares a class with the given fields and methods.
    pub fn declare_class(&mut self, name: &str, members: &[&str]) {
        let info = self.classes.entry(name.into()).or_default();
        for m in members {
            if !info.members.iter().any(|x| &**x == *m) {
                info.members.push((*m).into());
            }
        }
    }

    /// Classes declaring a field or method called `member`, sorted by name.
    pub fn classes_with_member(&self, member: &str) -> Vec<Name> {
        let mut res: Vec<Name> = self
            .classes
            .iter()
            .filter(|(_, info)| info.members.iter().any(|m| &**m == member))
            .map(|(name, _)| name.clone())
            .collect();
        res.sort();
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn sig(id: u32, params: &[TypeRefMask]) -> Signature {
        Signature {
            id: RoutineId(id),
            params: params.iter().cloned().collect(),
            by_ref: smallvec![false; params.len()],
            required: params.len(),
            return_type: TypeRefMask::VOID,
            specialized: id != 0,
        }
    }

    #[test]
    fn picks_most_specific() {
        let ctx = TypeRefContext::new();
        let orig = sig(0, &[TypeRefMask::ANY]);
        let strs = sig(1, &[TypeRefMask::STRING]);
        let ints = sig(2, &[TypeRefMask::LONG]);
        let cands = [&orig, &strs, &ints];
        let r = DefaultResolver;
        assert_eq!(
            r.resolve(&ctx, &cands, &[TypeRefMask::STRING]),
            CallTarget::Resolved(RoutineId(1))
        );
        assert_eq!(
            r.resolve(&ctx, &cands, &[TypeRefMask::DOUBLE]),
            CallTarget::Resolved(RoutineId(0))
        );
        // a union only fits the original
        assert_eq!(
            r.resolve(&ctx, &cands, &[TypeRefMask::STRING | TypeRefMask::LONG]),
            CallTarget::Resolved(RoutineId(0))
        );
    }

    #[test]
    fn incomparable_candidates_are_ambiguous() {
        let ctx = TypeRefContext::new();
        let a = sig(3, &[TypeRefMask::LONG | TypeRefMask::STRING]);
        let b = sig(4, &[TypeRefMask::LONG | TypeRefMask::DOUBLE]);
        assert_eq!(
            DefaultResolver.resolve(&ctx, &[&a, &b], &[TypeRefMask::LONG]),
            CallTarget::Ambiguous(vec![RoutineId(3), RoutineId(4)])
        );
        assert_eq!(
            DefaultResolver.resolve(&ctx, &[], &[TypeRefMask::LONG]),
            CallTarget::Unresolved
        );
        // a lone candidate is taken even when arguments do not fit
        assert_eq!(
            DefaultResolver.resolve(&ctx, &[&a], &[TypeRefMask::ARRAY]),
            CallTarget::Resolved(RoutineId(3))
        );
    }

    #[test]
    fn library_and_members() {
        let mut syms = Symbols::default();
        assert_eq!(syms.library("STRLEN").unwrap().returns, TypeRefMask::LONG);
        assert_eq!(syms.library("is_null").unwrap().checks, Some(TypeKind::Null));
        assert!(syms.library("func_get_args").unwrap().dynamic);
        assert!(syms.library("no_such_function").is_none());
        syms.declare_class("B", &["run", "name"]);
        syms.declare_class("A", &["run"]);
        assert_eq!(syms.classes_with_member("run"), vec![Name::from("A"), Name::from("B")]);
        syms.declare_routine("Foo", RoutineId(0));
        syms.declare_routine("foo", RoutineId(2));
        syms.declare_routine("foo", RoutineId(2));
        assert_eq!(syms.candidates("FOO"), &[RoutineId(0), RoutineId(2)]);
    }
}
