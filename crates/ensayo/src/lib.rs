//! Ensayo: declarative end-to-end scenario runner
//!
//! Ensayo (Spanish: "rehearsal") runs end-to-end scenarios written as data:
//! ordered UI and HTTP steps, terminal assertions and teardown. Elements are
//! found through ranked locator strategies instead of positional paths, every
//! action waits on an explicit post-condition instead of fixed sleeps, and
//! each run owns an isolated session that is released on every exit path.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       ENSAYO Architecture                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐   │
//! │  │ Scenario  │   │ Scenario  │   │ Step      │   │ Locator / │   │
//! │  │ (YAML)    │──►│ Runner    │──►│ Engine    │──►│ Action    │   │
//! │  └───────────┘   └─────┬─────┘   └─────┬─────┘   └─────┬─────┘   │
//! │                        │               │               │         │
//! │                  ┌─────▼─────┐   ┌─────▼─────┐   ┌─────▼─────┐   │
//! │                  │ Session   │   │ Contract  │   │ Browser   │   │
//! │                  │ Factory   │   │ Client    │   │ Driver    │   │
//! │                  └───────────┘   └───────────┘   └───────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ensayo::{builtin_suite, RunnerConfig, ScenarioRunner};
//!
//! # async fn run() -> ensayo::EnsayoResult<()> {
//! let config = RunnerConfig::default().with_base_url("http://localhost:3000");
//! let runner = ScenarioRunner::new(config);
//! let report = runner.run_suite(builtin_suite("tracker")?).await;
//! assert!(report.all_passed());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

mod action;
mod assertion;
mod browser;
mod builtin;
mod config;
mod driver;
mod engine;
mod http;
mod locator;
mod report;
mod result;
mod runner;
mod scenario;
mod session;
mod trace;
mod vars;
mod wait;

pub use action::{Action, ActionExecutor, TraceScope, DEFAULT_DRAG_WAYPOINTS};
pub use assertion::payload::{
    check_sum_at_most, describe, lookup, normalize_pointer, ElementCheck, FieldRule, JsonType,
    Mismatch,
};
pub use assertion::{
    evaluate_payload, Assertion, AssertionEngine, AssertionOutcome, Check, Verdict,
};
#[cfg(feature = "browser")]
pub use browser::CdpDriver;
pub use browser::{launch, BrowserConfig};
pub use builtin::{builtin_suite, SUITES};
pub use config::{RunnerConfig, DEFAULT_TOKEN_ENV};
pub use driver::{
    BrowserDriver, ElementHandle, ElementState, FrameId, MockDriver, MockElement, Mutation,
    Probe, Trigger,
};
pub use engine::{RunState, StepEngine, StepFailure, StepRecord, StepState, StepsOutcome};
pub use http::{
    check_status, ContractClient, HttpExchange, HttpMethod, HttpRequest, ResponseStore,
    DEFAULT_HTTP_TIMEOUT_MS, LAST_RESPONSE,
};
pub use locator::{
    BoundingBox, LocatorResolver, Point, Strategy, TargetDescriptor, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_TIMEOUT_MS, HANDLE_ATTRIBUTE,
};
pub use report::{failure_details, render_junit, JsonReportSink, JunitReportSink, ReportSink};
pub use result::{ActionError, EnsayoError, EnsayoResult, ResolutionError, TransportError};
pub use runner::{
    Artifact, RunResult, RunVerdict, ScenarioRunner, ScenarioSummary, SuiteReport,
};
pub use scenario::{
    ensure_unique_ids, Condition, ExecutionMode, Scenario, ScenarioFilter, ScenarioLoader,
    ScenarioSetup, SkipScope, Step, StepKind, YamlLoader, DEFAULT_WAYPOINTS,
};
pub use session::{
    DefaultSessionFactory, MockSessionFactory, Session, SessionFactory, SessionRequirements,
};
pub use trace::{StepTrace, TraceEntry, TraceOutcome};
pub use vars::{Vars, NOW};
pub use wait::{
    wait_for, Baseline, Deadline, PostCondition, NETWORK_IDLE_THRESHOLD_MS,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::assertion::payload::*;
    pub use super::assertion::*;
    pub use super::browser::*;
    pub use super::builtin::*;
    pub use super::config::*;
    pub use super::driver::*;
    pub use super::http::*;
    pub use super::locator::*;
    pub use super::report::*;
    pub use super::result::*;
    pub use super::runner::*;
    pub use super::scenario::*;
    pub use super::session::*;
    pub use super::vars::*;
}
