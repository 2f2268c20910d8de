pub mod config;
pub mod diagnostic;
pub mod param_space;
pub mod sandbox;
pub mod test_outcome;
pub mod trace;

pub use config::{
    Config, DiagnosticsConfig, FeedbackConfig, LoggingConfig, SessionConfig, StoreConfig,
};
pub use diagnostic::{Diagnostic, DiagnosticCluster, DiagnosticKind, Location};
pub use param_space::{DimensionKind, ParamSpace, ParamSpaceDimension};
pub use sandbox::{
    AppliedSandboxConfig, CommandOutput, CommandSpec, ResolvedSandboxConfig, SandboxCapabilities,
    SandboxRequest,
};
pub use test_outcome::{suite_family, TestOutcome, TestStatus};
pub use trace::{
    EvalEvent, EvalStatus, EvaluationRecord, Part, SessionEnd, SuiteResult, Trace, TraceContext, Turn,
};
