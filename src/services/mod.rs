//! Service layer: the session core.
//!
//! Everything here works against domain ports; infrastructure is injected.

pub mod diagnostics;
pub mod evaluation_state;
pub mod feedback;
pub mod param_sampler;
pub mod session_runner;

pub use evaluation_state::{build_evaluations_from_parts, EvaluationReducer};
pub use feedback::{
    build_failed_tests_feedback_section, select_failed_tests_for_feedback, FeedbackBuilder,
    FeedbackPriority,
};
pub use param_sampler::{
    even_split_counts, options_from_param_space, param_sets_from_grid, param_sets_from_random,
    plan_runs, PlanRequest, RunPlan, SamplingError, SamplingMode,
};
pub use session_runner::{EndReason, SessionPorts, SessionReport, SessionRunner};
