//! Routines and the compilation unit that owns them.
use crate::bound::{ExprId, ExprKind, Literal, RoutineDecl};
use crate::call_graph::CallGraph;
use crate::cfg::ControlFlowGraph;
use crate::common::{Name, NodeIx, NumTy, Result, WorkList};
use crate::config::AnalysisConfig;
use crate::diagnostics::Diagnostic;
use crate::error::AnalysisError;
use crate::flow::{FlowContext, FlowState, VarHandle};
use crate::specialize::{ParamTuple, SpecializationSet};
use crate::symbols::{CallTarget, DefaultResolver, OverloadResolver, Signature, Symbols};
use crate::types::{TypeRefContext, TypeRefMask};
use crate::worklist::{Driver, Outcome};

use hashbrown::HashMap;

use std::fmt;
use std::sync::Arc;

/// Index of a routine in its [Program]. Specialized clones get their own ids.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutineId(pub(crate) NumTy);

impl RoutineId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RoutineStatus {
    Unanalyzed,
    Analyzing,
    Stable,
    Invalidated,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct RoutineFlags(u8);

impl RoutineFlags {
    /// The routine itself calls something that can inspect its frame or call arbitrary code.
    pub const HAS_DYNAMIC_CALL: RoutineFlags = RoutineFlags(1 << 0);
    pub const HAS_STATIC_VARS: RoutineFlags = RoutineFlags(1 << 1);
    pub const HAS_GLOBALS: RoutineFlags = RoutineFlags(1 << 2);
    /// Some routine reachable through the call graph has a dynamic call.
    pub const CALLS_DYNAMIC: RoutineFlags = RoutineFlags(1 << 3);

    pub fn empty() -> RoutineFlags {
        RoutineFlags(0)
    }
    pub fn contains(self, other: RoutineFlags) -> bool {
        self.0 & other.0 == other.0
    }
    pub fn intersects(self, other: RoutineFlags) -> bool {
        self.0 & other.0 != 0
    }
    pub fn insert(&mut self, other: RoutineFlags) {
        self.0 |= other.0
    }
    pub fn union(self, other: RoutineFlags) -> RoutineFlags {
        RoutineFlags(self.0 | other.0)
    }
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RoutineFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (RoutineFlags::HAS_DYNAMIC_CALL, "HAS_DYNAMIC_CALL"),
            (RoutineFlags::HAS_STATIC_VARS, "HAS_STATIC_VARS"),
            (RoutineFlags::HAS_GLOBALS, "HAS_GLOBALS"),
            (RoutineFlags::CALLS_DYNAMIC, "CALLS_DYNAMIC"),
        ]
        .iter()
        {
            if self.contains(*flag) {
                names.push(*name);
            }
        }
        write!(f, "RoutineFlags({})", names.join("|"))
    }
}

#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: Name,
    pub handle: VarHandle,
    /// The type hint, or the any-type for untyped parameters.
    pub declared: TypeRefMask,
    /// The type from a documentation comment.
    pub doc: Option<TypeRefMask>,
    pub by_ref: bool,
    /// Type of the default value, for optional parameters.
    pub default_type: Option<TypeRefMask>,
}

/// Whether a variable read was initialized on the paths reaching it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadSite {
    pub var: VarHandle,
    pub possibly: bool,
    pub certainly: bool,
}

/// What the analysis has computed for one routine so far.
#[derive(Clone, Debug)]
pub(crate) struct RoutineAnalysis {
    pub(crate) expr_types: Vec<TypeRefMask>,
    pub(crate) call_targets: HashMap<ExprId, CallTarget>,
    /// The join of every state flowing into a block.
    pub(crate) block_inputs: HashMap<NodeIx, FlowState>,
    pub(crate) reads: HashMap<ExprId, ReadSite>,
    /// Blocks declaring static variables.
    pub(crate) static_sites: HashMap<VarHandle, NodeIx>,
}

impl RoutineAnalysis {
    pub(crate) fn new(num_exprs: ExprId) -> RoutineAnalysis {
        RoutineAnalysis {
            expr_types: vec![TypeRefMask::VOID; num_exprs as usize],
            call_targets: Default::default(),
            block_inputs: Default::default(),
            reads: Default::default(),
            static_sites: Default::default(),
        }
    }
}

pub struct Routine {
    pub(crate) id: RoutineId,
    pub(crate) name: Name,
    pub(crate) params: Vec<Parameter>,
    pub(crate) cfg: Arc<ControlFlowGraph>,
    pub(crate) exported: bool,
    pub(crate) origin: Option<RoutineId>,
    pub(crate) specialization: Option<ParamTuple>,
    pub(crate) flow: FlowContext,
    pub(crate) status: RoutineStatus,
    pub(crate) analysis: RoutineAnalysis,
    /// Union of argument types seen at call sites, per parameter.
    pub(crate) observed_args: Vec<TypeRefMask>,
    pub(crate) pending: WorkList<NodeIx>,
    pub(crate) flags: RoutineFlags,
    /// Candidates proposed by the specializers in the last pass.
    pub(crate) candidates: SpecializationSet,
    /// Tuples already turned into clones of this routine.
    pub(crate) applied: Vec<ParamTuple>,
}

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Routine")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("specialization", &self.specialization)
            .field("status", &self.status)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Gives every variable of the body a handle before any flow state is created, so states are
/// sized for all of them.
fn register_variables(flow: &mut FlowContext, cfg: &ControlFlowGraph) -> Result<()> {
    for name in cfg.variables() {
        let h = flow.get_or_create_handle(name);
        flow.mark_used(h)?;
    }
    Ok(())
}

impl Routine {
    fn new(id: RoutineId, decl: RoutineDecl, types: &TypeRefContext) -> Result<Routine> {
        let cfg = Arc::new(ControlFlowGraph::from_stmts(&decl.body)?);
        let mut flow = FlowContext::new();
        let mut params = Vec::with_capacity(decl.params.len());
        for p in decl.params.into_iter() {
            let handle = flow.get_or_create_handle(&p.name);
            if p.by_ref {
                flow.set_reference(handle)?;
            }
            params.push(Parameter {
                handle,
                declared: p
                    .hint
                    .as_ref()
                    .map(|h| types.from_hint(h))
                    .unwrap_or(TypeRefMask::ANY),
                doc: p.doc.as_ref().map(|h| types.from_hint(h)),
                by_ref: p.by_ref,
                default_type: p.default.as_ref().map(|e| match &e.kind {
                    ExprKind::Literal(Literal::Null) => TypeRefMask::NULL,
                    ExprKind::Literal(Literal::Bool(_)) => TypeRefMask::BOOL,
                    ExprKind::Literal(Literal::Long(_)) => TypeRefMask::LONG,
                    ExprKind::Literal(Literal::Double(_)) => TypeRefMask::DOUBLE,
                    ExprKind::Literal(Literal::Str(_)) => TypeRefMask::STRING,
                    ExprKind::ArrayInit(items) if items.is_empty() => {
                        types.array_of(TypeRefMask::VOID)
                    }
                    _ => TypeRefMask::ANY,
                }),
                name: p.name,
            });
        }
        register_variables(&mut flow, &cfg)?;
        let analysis = RoutineAnalysis::new(cfg.num_exprs);
        Ok(Routine {
            id,
            name: decl.name,
            observed_args: vec![TypeRefMask::VOID; params.len()],
            params,
            cfg,
            exported: decl.exported,
            origin: None,
            specialization: None,
            flow,
            status: RoutineStatus::Unanalyzed,
            analysis,
            pending: Default::default(),
            flags: RoutineFlags::empty(),
            candidates: Default::default(),
            applied: Vec::new(),
        })
    }

    /// A structural copy of this routine with its parameters fixed to `tuple`. The graph is
    /// shared; everything learned by the analysis starts over.
    pub(crate) fn specialized_clone(&self, id: RoutineId, tuple: ParamTuple) -> Result<Routine> {
        let mut flow = FlowContext::new();
        let mut params = self.params.clone();
        for p in params.iter_mut() {
            p.handle = flow.get_or_create_handle(&p.name);
            if p.by_ref {
                flow.set_reference(p.handle)?;
            }
        }
        register_variables(&mut flow, &self.cfg)?;
        Ok(Routine {
            id,
            name: self.name.clone(),
            observed_args: vec![TypeRefMask::VOID; params.len()],
            params,
            cfg: self.cfg.clone(),
            exported: false,
            origin: Some(self.origin.unwrap_or(self.id)),
            specialization: Some(tuple),
            flow,
            status: RoutineStatus::Unanalyzed,
            analysis: RoutineAnalysis::new(self.cfg.num_exprs),
            pending: Default::default(),
            flags: RoutineFlags::empty(),
            candidates: Default::default(),
            applied: Vec::new(),
        })
    }

    pub fn id(&self) -> RoutineId {
        self.id
    }
    pub fn name(&self) -> &Name {
        &self.name
    }
    pub fn params(&self) -> &[Parameter] {
        &self.params[..]
    }
    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }
    pub fn is_exported(&self) -> bool {
        self.exported
    }
    /// For a specialized clone, the routine it was cloned from.
    pub fn origin(&self) -> Option<RoutineId> {
        self.origin
    }
    pub fn specialization(&self) -> Option<&[TypeRefMask]> {
        self.specialization.as_ref().map(|t| &t[..])
    }
    pub fn status(&self) -> RoutineStatus {
        self.status
    }
    pub fn flags(&self) -> RoutineFlags {
        self.flags
    }
    pub fn flow(&self) -> &FlowContext {
        &self.flow
    }
    pub fn return_type(&self) -> TypeRefMask {
        self.flow.return_type()
    }
    /// The routine-wide type of a local variable.
    pub fn var_type(&self, name: &str) -> Option<TypeRefMask> {
        let h = self.flow.handle(name)?;
        self.flow.merged_type(h).ok()
    }
    /// The type computed so far for an expression. Use [Program::results] for anything that
    /// feeds code generation.
    pub fn expr_type(&self, id: ExprId) -> TypeRefMask {
        self.analysis
            .expr_types
            .get(id as usize)
            .cloned()
            .unwrap_or(TypeRefMask::VOID)
    }
    pub fn call_target(&self, id: ExprId) -> Option<&CallTarget> {
        self.analysis.call_targets.get(&id)
    }
    /// The state flowing into `block`, if it was reached.
    pub fn block_input(&self, block: NodeIx) -> Option<&FlowState> {
        self.analysis.block_inputs.get(&block)
    }
    /// Tuples the specializers proposed for this routine in the last pass, in order.
    pub fn specialization_candidates(&self) -> &SpecializationSet {
        &self.candidates
    }
    pub fn read_sites(&self) -> impl Iterator<Item = (ExprId, ReadSite)> + '_ {
        self.analysis.reads.iter().map(|(e, r)| (*e, *r))
    }

    /// Parameter types as seen by overload resolution.
    pub(crate) fn param_types(&self) -> ParamTuple {
        match &self.specialization {
            Some(t) => t.clone(),
            None => self.params.iter().map(|p| p.declared).collect(),
        }
    }

    pub(crate) fn signature(&self) -> Signature {
        Signature {
            id: self.id,
            params: self.param_types(),
            by_ref: self.params.iter().map(|p| p.by_ref).collect(),
            required: self
                .params
                .iter()
                .filter(|p| p.default_type.is_none())
                .count(),
            return_type: self.flow.return_type(),
            specialized: self.specialization.is_some(),
        }
    }

    /// Forget everything learned about this routine.
    pub(crate) fn reset(&mut self) {
        self.flow.invalidate();
        self.analysis = RoutineAnalysis::new(self.cfg.num_exprs);
        self.pending.clear();
        self.flags = RoutineFlags::empty();
        for o in self.observed_args.iter_mut() {
            *o = TypeRefMask::VOID;
        }
    }
}

/// One compilation unit.
pub struct Program {
    pub(crate) types: Arc<TypeRefContext>,
    pub(crate) routines: Vec<Routine>,
    pub(crate) symbols: Symbols,
    pub(crate) call_graph: CallGraph,
    pub(crate) resolver: Box<dyn OverloadResolver>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) outcome: Option<Outcome>,
}

impl Default for Program {
    fn default() -> Program {
        Program::new()
    }
}

impl Program {
    pub fn new() -> Program {
        Program {
            types: Arc::new(TypeRefContext::new()),
            routines: Vec::new(),
            symbols: Default::default(),
            call_graph: Default::default(),
            resolver: Box::new(DefaultResolver),
            diagnostics: Vec::new(),
            outcome: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn OverloadResolver>) -> Program {
        self.resolver = resolver;
        self
    }

    pub fn types(&self) -> &TypeRefContext {
        &self.types
    }

    /// Lowers `decl` and registers it. Fails only if the body cannot be lowered.
    pub fn add_routine(&mut self, decl: RoutineDecl) -> Result<RoutineId> {
        let id = RoutineId(self.routines.len() as NumTy);
        let routine = Routine::new(id, decl, &self.types)?;
        self.symbols.declare_routine(&routine.name, id);
        self.routines.push(routine);
        self.outcome = None;
        Ok(id)
    }

    pub(crate) fn push_clone(&mut self, origin: RoutineId, tuple: ParamTuple) -> Result<RoutineId> {
        let id = RoutineId(self.routines.len() as NumTy);
        let clone = self.routine(origin).specialized_clone(id, tuple)?;
        self.symbols.declare_routine(&clone.name, id);
        self.routines.push(clone);
        Ok(id)
    }

    pub fn declare_class(&mut self, name: &str, members: &[&str]) {
        self.symbols.declare_class(name, members);
    }

    pub fn routine(&self, id: RoutineId) -> &Routine {
        &self.routines[id.index()]
    }

    pub fn routines(&self) -> impl Iterator<Item = &Routine> {
        self.routines.iter()
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }

    /// The declared (unspecialized) routine called `name`.
    pub fn lookup(&self, name: &str) -> Option<RoutineId> {
        self.symbols
            .candidates(name)
            .iter()
            .cloned()
            .find(|id| self.routine(*id).origin.is_none())
    }

    /// Every routine called `name`: the declared one and its clones.
    pub fn overloads(&self, name: &str) -> &[RoutineId] {
        self.symbols.candidates(name)
    }

    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics[..]
    }

    /// The outcome of the last run, if any run finished since the program last changed.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub(crate) fn signatures(&self) -> Vec<Signature> {
        self.routines.iter().map(Routine::signature).collect()
    }

    fn check(&self, id: RoutineId) -> Result<()> {
        if id.index() >= self.routines.len() {
            return err!("routine id {} out of range ({} routines)", id.0, self.routines.len());
        }
        Ok(())
    }

    /// Marks `id` as structurally rewritten: everything learned about it is dropped and the next
    /// run analyzes it from scratch.
    pub fn invalidate(&mut self, id: RoutineId) -> Result<()> {
        self.check(id)?;
        let r = &mut self.routines[id.index()];
        r.reset();
        r.status = RoutineStatus::Invalidated;
        let edges = self.call_graph.get_caller_edges(id);
        // Recorded call sites still count, even those that have since been bound to a clone.
        for edge in edges.iter() {
            for (seen, arg) in r.observed_args.iter_mut().zip(edge.arg_types.iter()) {
                *seen |= arg.without_ref_flag();
            }
        }
        // Callers pick up the new return type.
        for edge in edges {
            let caller = &mut self.routines[edge.caller.index()];
            if caller.analysis.block_inputs.contains_key(&edge.block) {
                caller.pending.insert(edge.block);
            }
        }
        self.outcome = None;
        Ok(())
    }

    /// Queues every block of `id` that was reached for another analysis, keeping what was
    /// learned. On a stable routine this reproduces the same states.
    pub fn requeue(&mut self, id: RoutineId) -> Result<()> {
        self.check(id)?;
        let r = &mut self.routines[id.index()];
        let mut blocks: Vec<NodeIx> = r.analysis.block_inputs.keys().cloned().collect();
        blocks.sort();
        r.pending.extend(blocks.into_iter());
        self.outcome = None;
        Ok(())
    }

    /// Runs the analysis to a fixpoint.
    pub fn analyze(&mut self, config: AnalysisConfig) -> Result<Outcome> {
        Driver::new(self, config).run()
    }

    /// Accessors for code generation. Only available after a converged run.
    pub fn results(&self) -> Result<Results> {
        match self.outcome {
            Some(Outcome::Converged { .. }) => Ok(Results { program: self }),
            _ => Err(AnalysisError::NotConverged),
        }
    }
}

/// Final types and call targets of a converged analysis.
pub struct Results<'a> {
    program: &'a Program,
}

impl<'a> Results<'a> {
    pub fn types(&self) -> &'a TypeRefContext {
        &self.program.types
    }
    pub fn expr_type(&self, routine: RoutineId, expr: ExprId) -> TypeRefMask {
        self.program.routine(routine).expr_type(expr)
    }
    /// The bound target of a call expression. `None` if the expression is not a call to a
    /// routine or was never reached.
    pub fn call_target(&self, routine: RoutineId, expr: ExprId) -> Option<&'a CallTarget> {
        self.program.routine(routine).call_target(expr)
    }
    pub fn return_type(&self, routine: RoutineId) -> TypeRefMask {
        self.program.routine(routine).return_type()
    }
    pub fn var_type(&self, routine: RoutineId, name: &str) -> Option<TypeRefMask> {
        self.program.routine(routine).var_type(name)
    }
    pub fn specialization(&self, routine: RoutineId) -> Option<&'a [TypeRefMask]> {
        self.program.routine(routine).specialization()
    }
    pub fn origin(&self, routine: RoutineId) -> Option<RoutineId> {
        self.program.routine(routine).origin()
    }
    /// Specialized clones of `routine`, in creation order.
    pub fn clones_of(&self, routine: RoutineId) -> Vec<RoutineId> {
        self.program
            .routines()
            .filter(|r| r.origin == Some(routine))
            .map(|r| r.id)
            .collect()
    }
    pub fn flags(&self, routine: RoutineId) -> RoutineFlags {
        self.program.routine(routine).flags()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound::{Expr, Param, Stmt};
    use crate::types::TypeHint;

    #[test]
    fn routines_register_params_and_overloads() {
        let mut p = Program::new();
        let id = p
            .add_routine(
                RoutineDecl::new("f")
                    .param(Param::new("a").hint(TypeHint::Int))
                    .param(Param::new("b").default(Expr::string("x")))
                    .param(Param::new("c").by_ref())
                    .body(vec![Stmt::ret(Some(Expr::var("a")))]),
            )
            .unwrap();
        let r = p.routine(id);
        assert_eq!(r.params()[0].declared, TypeRefMask::LONG);
        assert!(r.params()[1].declared.is_any());
        assert_eq!(r.params()[1].default_type, Some(TypeRefMask::STRING));
        assert!(r.flow().is_reference(r.params()[2].handle));
        assert_eq!(r.signature().required, 2);
        assert_eq!(p.lookup("F"), Some(id));
        assert_eq!(r.status(), RoutineStatus::Unanalyzed);
    }

    #[test]
    fn results_require_convergence() {
        let mut p = Program::new();
        let id = p.add_routine(RoutineDecl::new("f")).unwrap();
        assert!(matches!(p.results(), Err(AnalysisError::NotConverged)));
        assert!(p.invalidate(RoutineId(9)).unwrap_err().is_internal());
        p.invalidate(id).unwrap();
        assert_eq!(p.routine(id).status(), RoutineStatus::Invalidated);
    }

    #[test]
    fn flags_debug() {
        let mut f = RoutineFlags::empty();
        f.insert(RoutineFlags::HAS_GLOBALS);
        f.insert(RoutineFlags::CALLS_DYNAMIC);
        assert!(f.contains(RoutineFlags::HAS_GLOBALS));
        assert!(!f.contains(RoutineFlags::HAS_DYNAMIC_CALL));
        assert_eq!(format!("{:?}", f), "RoutineFlags(HAS_GLOBALS|CALLS_DYNAMIC)");
    }
}
