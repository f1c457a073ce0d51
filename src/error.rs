//! Errors surfaced by the analysis.
//!
//! Only two things are errors: broken invariants inside the engine, and inputs the binder handed
//! us that cannot be lowered. Everything the analysis can answer conservatively (unknown symbols,
//! ambiguous overloads, too many variables for the fast bitsets) is answered with the any-type
//! instead.
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// An internal invariant does not hold. These abort analysis of the whole compilation unit.
    #[error("internal error: {0}")]
    Internal(String),

    /// A structured routine body could not be lowered into a control-flow graph.
    #[error("lowering error: {0}")]
    Lowering(String),

    /// Results were requested from an analysis that did not reach a fixpoint.
    #[error("analysis did not converge; results are not usable for code generation")]
    NotConverged,
}

impl AnalysisError {
    pub fn is_internal(&self) -> bool {
        matches!(self, AnalysisError::Internal(_))
    }
}
