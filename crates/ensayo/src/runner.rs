//! Scenario Runner.
//!
//! Top-level entry point: acquire a session, run the steps, evaluate the
//! terminal assertions, run teardown, release the session. Release happens
//! on every exit path, including a panicking scenario body. Suites run
//! scenarios concurrently, each on its own session, and keep full results
//! only for the scenarios that did not pass.

use crate::assertion::{AssertionEngine, AssertionOutcome, Verdict};
use crate::config::RunnerConfig;
use crate::engine::{artifact_stem, RunState, StepEngine, StepRecord, StepState, StepsOutcome};
use crate::result::{EnsayoError, EnsayoResult};
use crate::scenario::{ExecutionMode, Scenario};
use crate::session::{DefaultSessionFactory, Session, SessionFactory, SessionRequirements};
use crate::trace::TraceEntry;
use crate::vars::Vars;
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Overall outcome of one scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    /// Every step and assertion passed
    Passed,
    /// A step failed or an assertion did not pass
    Failed,
    /// The run could not be carried out
    Errored,
}

impl fmt::Display for RunVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Diagnostic captured when a scenario fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact kind (`dom_snapshot`)
    pub kind: String,
    /// SHA-256 of the content, hex encoded
    pub digest: String,
    /// Content length in bytes
    pub bytes: usize,
    /// File the content was written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Artifact {
    /// DOM snapshot artifact for `html`
    #[must_use]
    pub fn dom_snapshot(html: &str) -> Self {
        let digest = Sha256::digest(html.as_bytes());
        Self {
            kind: "dom_snapshot".to_string(),
            digest: format!("{digest:x}"),
            bytes: html.len(),
            path: None,
        }
    }
}

/// Outcome of one scenario run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Scenario id
    pub scenario_id: String,
    /// Verdict
    pub verdict: RunVerdict,
    /// Main step records
    pub steps: Vec<StepRecord>,
    /// Teardown step records
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown: Vec<StepRecord>,
    /// One outcome per declared terminal assertion
    pub assertions: Vec<AssertionOutcome>,
    /// Action trace
    pub trace: Vec<TraceEntry>,
    /// First fatal error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
    /// Captured DOM snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    /// Screenshots written by screenshot steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screenshots: Vec<PathBuf>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration
    pub elapsed_ms: u64,
}

impl RunResult {
    fn new(scenario_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            scenario_id: scenario_id.to_string(),
            verdict: RunVerdict::Errored,
            steps: Vec::new(),
            teardown: Vec::new(),
            assertions: Vec::new(),
            trace: Vec::new(),
            first_error: None,
            artifact: None,
            screenshots: Vec::new(),
            started_at,
            elapsed_ms: 0,
        }
    }

    /// Check if passed
    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.verdict == RunVerdict::Passed
    }

    /// Assertions that did not pass
    pub fn failed_assertions(&self) -> impl Iterator<Item = &AssertionOutcome> {
        self.assertions.iter().filter(|a| !a.verdict.is_pass())
    }

    /// Compact summary kept for every scenario in a suite
    #[must_use]
    pub fn summary(&self) -> ScenarioSummary {
        ScenarioSummary {
            scenario_id: self.scenario_id.clone(),
            verdict: self.verdict,
            elapsed_ms: self.elapsed_ms,
            steps: self.steps.len(),
            steps_failed: self
                .steps
                .iter()
                .filter(|s| s.state == StepState::Failed)
                .count(),
            assertions: self.assertions.len(),
            assertions_failed: self.failed_assertions().count(),
            first_error: self.first_error.clone(),
        }
    }
}

/// Per-scenario line of a suite report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    /// Scenario id
    pub scenario_id: String,
    /// Verdict
    pub verdict: RunVerdict,
    /// Wall-clock duration
    pub elapsed_ms: u64,
    /// Declared steps
    pub steps: usize,
    /// Failed steps
    pub steps_failed: usize,
    /// Declared assertions
    pub assertions: usize,
    /// Assertions that did not pass
    pub assertions_failed: usize,
    /// First fatal error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
}

/// Aggregate of a suite run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    /// Scenarios run
    pub total: usize,
    /// Scenarios passed
    pub passed: usize,
    /// Scenarios failed
    pub failed: usize,
    /// Scenarios errored
    pub errored: usize,
    /// Wall-clock duration
    pub elapsed_ms: u64,
    /// One summary per scenario, in input order
    pub summaries: Vec<ScenarioSummary>,
    /// Full results of scenarios that did not pass
    pub failures: Vec<RunResult>,
}

impl SuiteReport {
    /// Aggregate `results`, dropping the detail of passing scenarios
    #[must_use]
    pub fn from_results(results: impl IntoIterator<Item = RunResult>, elapsed: Duration) -> Self {
        let mut report = Self {
            elapsed_ms: elapsed.as_millis() as u64,
            ..Self::default()
        };
        for result in results {
            report.total += 1;
            match result.verdict {
                RunVerdict::Passed => report.passed += 1,
                RunVerdict::Failed => report.failed += 1,
                RunVerdict::Errored => report.errored += 1,
            }
            report.summaries.push(result.summary());
            if !result.is_passed() {
                report.failures.push(result);
            }
        }
        report
    }

    /// Check if every scenario passed
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

struct BodyOutcome {
    steps: StepsOutcome,
    teardown: StepsOutcome,
    assertions: Vec<AssertionOutcome>,
    artifact: Option<Artifact>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs scenarios on sessions from a [`SessionFactory`]
#[derive(Clone)]
pub struct ScenarioRunner {
    config: RunnerConfig,
    factory: Arc<dyn SessionFactory>,
    cancel: Arc<AtomicBool>,
}

impl fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("config", &self.config)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ScenarioRunner {
    /// Runner using real browser and HTTP sessions
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            factory: Arc::new(DefaultSessionFactory::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use a different session factory
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Share an external cancellation flag
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Runner configuration
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Flag that cancels runs at the next step boundary
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Run one scenario
    pub async fn run(&self, scenario: &Scenario) -> RunResult {
        let clock = Instant::now();
        let mut result = RunResult::new(&scenario.id, Utc::now());
        let config = self.config.merged(&scenario.setup);
        let mode = config.mode_override.unwrap_or(scenario.mode);
        info!(scenario = %scenario.id, mode = %mode, "scenario started");

        let vars = match self.prepare(scenario) {
            Ok(vars) => vars,
            Err(e) => {
                result.first_error = Some(e.to_string());
                return self.finish(result, clock);
            }
        };

        let requirements = SessionRequirements::of(scenario);
        let mut session = match self.factory.acquire(requirements, &config).await {
            Ok(session) => session,
            Err(e) => {
                warn!(scenario = %scenario.id, error = %e, "session could not be acquired");
                result.first_error = Some(format!("session could not be acquired: {e}"));
                return self.finish(result, clock);
            }
        };

        let mut state = RunState::new(&scenario.id, vars);
        let body = AssertUnwindSafe(self.body(scenario, mode, &config, &mut session, &mut state))
            .catch_unwind()
            .await;

        if let Err(e) = self.factory.release(session).await {
            warn!(scenario = %scenario.id, error = %e, "session release reported an error");
        }

        result.trace = state.trace.entries().to_vec();
        result.screenshots = state.screenshots;
        match body {
            Ok(outcome) => {
                result.verdict = verdict(&outcome);
                result.first_error = if outcome.steps.cancelled {
                    Some(EnsayoError::Cancelled.to_string())
                } else {
                    outcome.steps.first_failure().map(ToString::to_string)
                };
                result.steps = outcome.steps.records;
                result.teardown = outcome.teardown.records;
                result.assertions = outcome.assertions;
                result.artifact = outcome.artifact;
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(scenario = %scenario.id, panic = %message, "scenario body panicked");
                result.first_error = Some(format!("scenario body panicked: {message}"));
            }
        }
        self.finish(result, clock)
    }

    fn prepare(&self, scenario: &Scenario) -> EnsayoResult<Vars> {
        scenario.validate()?;
        if self.is_cancelled() {
            return Err(EnsayoError::Cancelled);
        }
        scenario.vars.resolved()
    }

    fn finish(&self, mut result: RunResult, clock: Instant) -> RunResult {
        result.elapsed_ms = clock.elapsed().as_millis() as u64;
        info!(
            scenario = %result.scenario_id,
            verdict = %result.verdict,
            elapsed_ms = result.elapsed_ms,
            "scenario finished"
        );
        result
    }

    async fn body(
        &self,
        scenario: &Scenario,
        mode: ExecutionMode,
        config: &RunnerConfig,
        session: &mut Session,
        state: &mut RunState,
    ) -> BodyOutcome {
        let engine = StepEngine::new(config).with_cancel(Arc::clone(&self.cancel));
        let steps = engine.run(&scenario.steps, mode, session, state).await;

        let assertions = if steps.cancelled {
            scenario
                .assertions
                .iter()
                .enumerate()
                .map(|(index, a)| AssertionOutcome {
                    index,
                    name: a.label(index),
                    verdict: Verdict::Error {
                        cause: EnsayoError::Cancelled.to_string(),
                    },
                })
                .collect()
        } else {
            AssertionEngine::new()
                .with_default_timeout(Duration::from_millis(config.assertion_timeout_ms))
                .with_poll_interval(config.poll_interval())
                .evaluate_all(
                    &scenario.assertions,
                    session.browser(),
                    &state.responses,
                    &state.vars,
                )
                .await
        };

        let failing = steps.has_failures() || assertions.iter().any(|a| !a.verdict.is_pass());
        let artifact = if failing && session.has_browser() {
            capture_snapshot(session, state, config).await
        } else {
            None
        };

        let teardown = engine
            .run_teardown(&scenario.teardown, scenario.steps.len(), session, state)
            .await;
        if teardown.has_failures() {
            warn!(
                scenario = %scenario.id,
                failed = teardown.count(StepState::Failed),
                "teardown steps failed"
            );
        }

        BodyOutcome {
            steps,
            teardown,
            assertions,
            artifact,
        }
    }

    /// Run every scenario, at most `concurrency` at a time
    pub async fn run_suite(&self, scenarios: Vec<Scenario>) -> SuiteReport {
        self.run_suite_observed(scenarios, |_| {}).await
    }

    /// Run a suite, calling `on_result` as each scenario completes
    pub async fn run_suite_observed<F>(&self, scenarios: Vec<Scenario>, on_result: F) -> SuiteReport
    where
        F: Fn(&RunResult) + Sync,
    {
        let clock = Instant::now();
        let concurrency = self.config.concurrency.max(1);
        info!(scenarios = scenarios.len(), concurrency, "suite started");

        let on_result = &on_result;
        let mut results: Vec<(usize, RunResult)> = futures::stream::iter(scenarios.iter().enumerate())
            .map(|(index, scenario)| async move {
                let result = self.run(scenario).await;
                on_result(&result);
                (index, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let report = SuiteReport::from_results(results.into_iter().map(|(_, r)| r), clock.elapsed());
        info!(
            total = report.total,
            passed = report.passed,
            failed = report.failed,
            errored = report.errored,
            "suite finished"
        );
        report
    }
}

fn verdict(outcome: &BodyOutcome) -> RunVerdict {
    if outcome.steps.cancelled {
        RunVerdict::Errored
    } else if outcome.steps.has_failures() || outcome.assertions.iter().any(|a| !a.verdict.is_pass()) {
        RunVerdict::Failed
    } else {
        RunVerdict::Passed
    }
}

async fn capture_snapshot(
    session: &mut Session,
    state: &RunState,
    config: &RunnerConfig,
) -> Option<Artifact> {
    let driver = session.browser()?;
    let html = match driver.snapshot().await {
        Ok(html) => html,
        Err(e) => {
            warn!(scenario = %state.scenario_id, error = %e, "DOM snapshot failed");
            return None;
        }
    };
    let mut artifact = Artifact::dom_snapshot(&html);
    if let Some(ref dir) = config.artifacts_dir {
        let path = dir.join(format!("{}-dom.html", artifact_stem(&state.scenario_id)));
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, html.as_bytes()).await
        }
        .await;
        match written {
            Ok(()) => artifact.path = Some(path),
            Err(e) => warn!(path = %path.display(), error = %e, "could not write DOM snapshot"),
        }
    }
    Some(artifact)
}
