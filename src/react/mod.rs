//! 认知层：Oracle、决策解码、动作分发、终止判定、主循环

pub mod decision;
pub mod dispatcher;
pub mod loop_;
pub mod oracle;
pub mod termination;

pub use decision::{decode_json, strip_fencing, ActionKind, Decision};
pub use dispatcher::{Dispatch, Dispatcher, Signal, ToolResult, Toolset};
pub use loop_::{LoopController, LoopSettings, RunOutcome, RunReport, RunStatus};
pub use oracle::Oracle;
pub use termination::{CommitmentPolicy, TerminationDetector, FORCED_COMMITMENT_MARKER};
