pub mod generator;
pub mod plan;
pub mod trace;

pub use generator::{generate, validate_callback_name, Statement, DEFAULT_CALLBACK};
pub use plan::{build_plan, test_directories, PlanCounts, PlanStep, StepType, TestDirectory, TestPlan};
pub use trace::{TraceEvent, TraceKind};
