//! Resumable, backtracking step engine.
//!
//! A run is a stack of step frames. Each step returns a [`StepOutcome`]; the
//! [`Navigator`] commits its state, pushes the successor the step registered,
//! unwinds on Back to the last step that actually showed the user something,
//! and persists a [`ResumeDocument`] after every change so an interrupted run
//! replays to the same point without asking again.

pub mod module;
pub mod navigator;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod step;

pub use module::{CallNext, MissingInfo, Module, StepContext};
pub use navigator::{
    Navigator, ResumeDecision, RunOutcome, RunReport, MSG_BACK_ON_INITIAL, MSG_BACK_ON_RESUME,
    MSG_CANCELLED, MSG_FATAL,
};
pub use registry::Registry;
pub use session::Session;
pub use snapshot::{MemoryStore, ResumeDocument, ResumeFile, SnapshotStore};
pub use step::{Frame, ModuleId, StepId, StepKind, StepOutcome, StepState};
