//! Per-routine flow information: the routine-wide [FlowContext] and per-block [FlowState]s.
pub mod context;
pub mod state;

pub use context::{FlowContext, VarHandle};
pub use state::{FlowState, Note, NoteKind};
