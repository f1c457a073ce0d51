//! The fixpoint driver.
//!
//! One outer iteration analyzes every routine with pending blocks until no routine has any left,
//! marks the analyzed routines stable, runs the specializers, and forwards interprocedural flags.
//! Iterations repeat until an iteration creates no clone and leaves nothing pending.
//!
//! Analysis proceeds in rounds. Every routine with pending blocks is drained by exactly one
//! worker against a snapshot of all signatures taken at the start of the round; what the round
//! learned about callees is applied afterwards, in routine order. Rounds therefore compute the
//! same thing whether they run on one thread or many.
use crate::analysis::{self, Effects, Env};
use crate::common::Result;
use crate::config::AnalysisConfig;
use crate::dataflow;
use crate::diagnostics::{self, Diagnostic, DiagnosticKind};
use crate::program::{Program, Routine, RoutineId, RoutineStatus};
use crate::specialize::{self, Specializer, Specializers};
use crate::symbols::Signature;

use crossbeam_channel::bounded;
use tracing::{debug, info, trace, warn};

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How a run of the driver ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Converged { iterations: usize },
    /// Results are partial and must not be used for code generation.
    Cancelled { iterations: usize },
    /// Results are partial and must not be used for code generation.
    BudgetExceeded { iterations: usize },
}

impl Outcome {
    pub fn iterations(self) -> usize {
        match self {
            Outcome::Converged { iterations }
            | Outcome::Cancelled { iterations }
            | Outcome::BudgetExceeded { iterations } => iterations,
        }
    }
    pub fn is_converged(self) -> bool {
        matches!(self, Outcome::Converged { .. })
    }
}

/// Cooperative cancellation, checked once per outer iteration.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        Default::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release)
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct Driver<'a> {
    program: &'a mut Program,
    config: AnalysisConfig,
    cancel: CancellationToken,
    specializers: Specializers,
}

impl<'a> Driver<'a> {
    pub fn new(program: &'a mut Program, config: AnalysisConfig) -> Driver<'a> {
        let specializers = Specializers::from_config(&config);
        Driver {
            program,
            config,
            cancel: Default::default(),
            specializers,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Driver<'a> {
        self.cancel = token;
        self
    }

    /// Runs `s` after the built-in specializers.
    pub fn with_specializer(mut self, s: Box<dyn Specializer>) -> Driver<'a> {
        self.specializers.push(s);
        self
    }

    fn workers(&self) -> usize {
        self.config.workers()
    }

    pub fn run(mut self) -> Result<Outcome> {
        self.program.diagnostics.clear();
        self.program.outcome = None;
        for r in self.program.routines.iter_mut() {
            match r.status {
                RoutineStatus::Unanalyzed | RoutineStatus::Invalidated => {
                    analysis::seed_entry(r)?;
                }
                RoutineStatus::Analyzing | RoutineStatus::Stable => {}
            }
        }
        let mut iterations = 0;
        let outcome = loop {
            if self.cancel.is_cancelled() {
                info!(iterations, "type analysis cancelled");
                break Outcome::Cancelled { iterations };
            }
            if iterations >= self.config.max_iterations {
                warn!(iterations, "type analysis did not converge; giving up");
                self.program.diagnostics.push(Diagnostic {
                    routine: None,
                    expr: None,
                    kind: DiagnosticKind::IterationBudgetExceeded(iterations),
                });
                break Outcome::BudgetExceeded { iterations };
            }
            iterations += 1;
            debug!(iteration = iterations, pending = self.pending(), "starting iteration");
            let rounds = self.analyze_pending()?;
            self.bind();
            let clones = self.specialize()?;
            self.forward_flags();
            debug!(iteration = iterations, rounds, clones, "finished iteration");
            if clones == 0 && self.pending() == 0 {
                break Outcome::Converged { iterations };
            }
        };
        if outcome.is_converged() {
            self.diagnose()?;
        }
        self.program.outcome = Some(outcome);
        Ok(outcome)
    }

    /// The number of routines with pending blocks.
    fn pending(&self) -> usize {
        self.program
            .routines
            .iter()
            .filter(|r| !r.pending.is_empty())
            .count()
    }

    /// Analyzes rounds until no routine has pending blocks. Returns the number of rounds.
    fn analyze_pending(&mut self) -> Result<usize> {
        let workers = self.workers();
        let mut rounds = 0;
        loop {
            let sigs = self.program.signatures();
            let Program {
                routines,
                types,
                symbols,
                call_graph,
                resolver,
                ..
            } = &mut *self.program;
            let env = Env {
                types: &**types,
                symbols: &*symbols,
                call_graph: &*call_graph,
                sigs: &sigs[..],
                resolver: &**resolver,
            };
            let jobs: Vec<&mut Routine> = routines
                .iter_mut()
                .filter(|r| !r.pending.is_empty())
                .collect();
            if jobs.is_empty() {
                return Ok(rounds);
            }
            rounds += 1;
            let results = run_pool(workers, jobs, |r: &mut Routine| {
                (r.id, analysis::analyze_routine(&env, r))
            })?;
            let mut effects = Vec::with_capacity(results.len());
            for (id, res) in results.into_iter() {
                effects.push((id, res?));
            }
            self.apply_effects(&sigs[..], effects)?;
        }
    }

    /// Feeds what a round learned about callees back into them.
    fn apply_effects(&mut self, sigs: &[Signature], effects: Vec<(RoutineId, Effects)>) -> Result<()> {
        let program = &mut *self.program;
        for (caller, fx) in effects.into_iter() {
            for (callee, args) in fx.calls.into_iter() {
                let r = match program.routines.get_mut(callee.index()) {
                    Some(r) => r,
                    None => return err!("call effect for unknown routine {:?}", callee),
                };
                let mut widened = false;
                for (seen, arg) in r.observed_args.iter_mut().zip(args.iter()) {
                    let next = *seen | arg.without_ref_flag();
                    if next != *seen {
                        *seen = next;
                        widened = true;
                    }
                }
                if widened
                    && !r.exported
                    && r.specialization.is_none()
                    && analysis::seed_entry(r)?
                {
                    trace!(caller = caller.index(), callee = %r.name, "callee re-enqueued");
                }
            }
        }
        // Call results depend on return types; callers of a routine whose return type grew
        // must look again.
        for sig in sigs.iter() {
            let ret = program.routines[sig.id.index()].return_type();
            if ret == sig.return_type {
                continue;
            }
            for edge in program.call_graph.get_caller_edges(sig.id) {
                trace!(
                    callee = sig.id.index(),
                    caller = edge.caller.index(),
                    block = edge.block.index(),
                    "caller re-enqueued"
                );
                program.routines[edge.caller.index()]
                    .pending
                    .insert(edge.block);
            }
        }
        Ok(())
    }

    /// Routines drained in this iteration are stable until something queues them again.
    fn bind(&mut self) {
        for r in self.program.routines.iter_mut() {
            if r.status == RoutineStatus::Analyzing && r.pending.is_empty() {
                r.status = RoutineStatus::Stable;
            }
        }
    }

    /// Gathers specialization candidates and applies the accepted ones. Returns the number of
    /// clones created.
    fn specialize(&mut self) -> Result<usize> {
        if self.specializers.is_empty() {
            return Ok(0);
        }
        let workers = self.workers();
        let specializers = &self.specializers;
        let program = &*self.program;
        let eligible: Vec<&Routine> = program
            .routines()
            .filter(|r| specializers.is_eligible(r))
            .collect();
        let sets = run_pool(workers, eligible, |r: &Routine| {
            (r.id, specializers.on_after_analysis(program, r))
        })?;
        let mut clones = 0;
        for (id, set) in sets.into_iter() {
            self.program.routines[id.index()].candidates = set;
            let tuple = match self
                .specializers
                .try_get_specialization(self.program.routine(id))
            {
                Some(t) => t,
                None => continue,
            };
            specialize::apply(self.program, id, tuple)?;
            clones += 1;
        }
        Ok(clones)
    }

    fn forward_flags(&mut self) {
        dataflow::forward_dynamic_calls(self.program);
    }

    /// Collects diagnostics from every routine on the worker pool.
    fn diagnose(&mut self) -> Result<()> {
        let routines: Vec<&Routine> = self.program.routines().collect();
        let per_routine = run_pool(self.workers(), routines, diagnostics::routine_diagnostics)?;
        let mut diags = mem::take(&mut self.program.diagnostics);
        for ds in per_routine.into_iter() {
            diags.extend(ds);
        }
        diagnostics::normalize(&mut diags);
        self.program.diagnostics = diags;
        Ok(())
    }
}

/// Maps `f` over `jobs` on up to `workers` threads, returning results in job order.
fn run_pool<T, R, F>(workers: usize, jobs: Vec<T>, f: F) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let n = jobs.len();
    if workers <= 1 || n <= 1 {
        return Ok(jobs.into_iter().map(f).collect());
    }
    // Both channels have room for every job, so neither side ever blocks on a send.
    let (job_sender, job_receiver) = bounded(n);
    let (res_sender, res_receiver) = bounded(n);
    for job in jobs.into_iter().enumerate() {
        if job_sender.send(job).is_err() {
            return err!("worker pool job queue closed early");
        }
    }
    mem::drop(job_sender);
    let f = &f;
    let scope_res = crossbeam::scope(|s| {
        for _ in 0..workers.min(n) {
            let jobs = job_receiver.clone();
            let results = res_sender.clone();
            s.spawn(move |_| {
                while let Ok((i, job)) = jobs.recv() {
                    // The receiver outlives every worker.
                    let _ = results.send((i, f(job)));
                }
            });
        }
    });
    mem::drop(res_sender);
    if scope_res.is_err() {
        return err!("error in executing worker thread");
    }
    let mut res: Vec<(usize, R)> = res_receiver.try_iter().collect();
    if res.len() != n {
        return err!("worker pool lost results ({} of {})", res.len(), n);
    }
    res.sort_by_key(|(i, _)| *i);
    Ok(res.into_iter().map(|(_, r)| r).collect())
}
