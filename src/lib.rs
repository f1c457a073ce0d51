//! Flow-sensitive type inference and routine specialization for a dynamically-typed language.
//!
//! A [Program] holds routines lowered into control-flow graphs. [Program::analyze] runs the
//! fixpoint driver: every reachable expression gets a [TypeRefMask], every call gets a
//! [CallTarget], and routines with enough evidence get specialized clones with narrower
//! parameter types. Once the run converges, [Program::results] hands out the final types for
//! code generation and [Program::diagnostics] lists uninitialized reads and unbound calls.
#[macro_use]
pub mod common;
pub mod bitset;
pub mod bound;
pub mod call_graph;
pub mod cfg;
pub mod config;
pub mod dataflow;
pub mod diagnostics;
pub mod error;
pub mod flow;
pub mod program;
pub mod specialize;
pub mod symbols;
pub mod types;
pub mod worklist;

mod analysis;

pub use crate::common::{Name, Result};
pub use crate::config::{AnalysisConfig, SpecializerKinds};
pub use crate::diagnostics::{Diagnostic, DiagnosticKind};
pub use crate::error::AnalysisError;
pub use crate::program::{Program, Results, Routine, RoutineFlags, RoutineId, RoutineStatus};
pub use crate::symbols::CallTarget;
pub use crate::types::{TypeHint, TypeKind, TypeRef, TypeRefContext, TypeRefMask};
pub use crate::worklist::{CancellationToken, Driver, Outcome};
