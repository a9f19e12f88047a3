//! Step Engine.
//!
//! Executes a scenario's steps strictly in order on the owning [`Session`].
//! Each step moves `Pending → Running → {Succeeded, Failed, Skipped}`.
//! `Skipped` only comes from a taken gate. In fail-fast mode the first
//! failure stops the run and later steps stay `Pending`; best-effort mode
//! records the failure and carries on. Cancellation is checked at every step
//! boundary.

use crate::action::{Action, ActionExecutor, TraceScope};
use crate::assertion::payload::{lookup, normalize_pointer};
use crate::assertion::{AssertionEngine, AssertionOutcome};
use crate::config::RunnerConfig;
use crate::driver::{BrowserDriver, ElementHandle};
use crate::http::{check_status, ResponseStore};
use crate::locator::{LocatorResolver, TargetDescriptor};
use crate::result::{ActionError, EnsayoError, EnsayoResult, TransportError};
use crate::scenario::{Condition, ExecutionMode, SkipScope, Step, StepKind};
use crate::session::Session;
use crate::trace::{StepTrace, TraceEntry};
use crate::vars::Vars;
use crate::wait::{wait_for, Baseline, Deadline, PostCondition};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle state of one step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Not started
    #[default]
    Pending,
    /// Executing
    Running,
    /// Completed
    Succeeded,
    /// Failed
    Failed,
    /// Skipped by a gate
    Skipped,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Step index
    pub index: usize,
    /// Descriptor the step attempted, if it targets elements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    /// Error category (`resolution`, `action`, `transport`, ...)
    pub category: String,
    /// Error message
    pub message: String,
}

impl StepFailure {
    fn new(index: usize, step: &Step, error: &EnsayoError) -> Self {
        Self {
            index,
            descriptor: attempted_descriptor(step),
            category: error.category().to_string(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ", self.index)?;
        if let Some(ref d) = self.descriptor {
            write!(f, "on {d} ")?;
        }
        write!(f, "failed ({}): {}", self.category, self.message)
    }
}

/// Record of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step index
    pub index: usize,
    /// Step label
    pub name: String,
    /// Action name
    pub action: String,
    /// Final state
    pub state: StepState,
    /// Time spent running the step
    pub duration_ms: u64,
    /// Failure details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    /// Outcomes of intermediate HTTP assertions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionOutcome>,
}

impl StepRecord {
    fn pending(index: usize, step: &Step) -> Self {
        Self {
            index,
            name: step.label(index),
            action: step.action().to_string(),
            state: StepState::Pending,
            duration_ms: 0,
            failure: None,
            assertions: Vec::new(),
        }
    }
}

/// Records of one pass over a step list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepsOutcome {
    /// One record per step, in order
    pub records: Vec<StepRecord>,
    /// Whether the run stopped at a cancelled step boundary
    pub cancelled: bool,
}

impl StepsOutcome {
    /// First failed step
    #[must_use]
    pub fn first_failure(&self) -> Option<&StepFailure> {
        self.records.iter().find_map(|r| r.failure.as_ref())
    }

    /// Whether any step failed
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.records.iter().any(|r| r.state == StepState::Failed)
    }

    /// Number of records in `state`
    #[must_use]
    pub fn count(&self, state: StepState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }
}

/// Mutable state threaded through one scenario run
#[derive(Debug, Clone, Default)]
pub struct RunState {
    /// Owning scenario
    pub scenario_id: String,
    /// Variables, including captured response fields
    pub vars: Vars,
    /// HTTP responses by name
    pub responses: ResponseStore,
    /// Action trace
    pub trace: StepTrace,
    /// Screenshot files written so far
    pub screenshots: Vec<PathBuf>,
}

impl RunState {
    /// State for a fresh run of `scenario_id`
    #[must_use]
    pub fn new(scenario_id: impl Into<String>, vars: Vars) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            vars,
            ..Self::default()
        }
    }
}

/// File-name-safe form of an identifier
pub(crate) fn artifact_stem(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn attempted_descriptor(step: &Step) -> Option<String> {
    match &step.kind {
        StepKind::Drag { source, target, .. } => Some(format!("{source} -> {target}")),
        StepKind::Gate {
            skip_if: Condition::Present(t) | Condition::Missing(t),
            ..
        }
        | StepKind::Wait {
            condition: PostCondition::Visible(t) | PostCondition::Hidden(t),
        } => Some(t.to_string()),
        _ => step.target().map(ToString::to_string),
    }
}

fn require_browser(session: &mut Session) -> EnsayoResult<&mut dyn BrowserDriver> {
    session
        .browser()
        .ok_or_else(|| EnsayoError::scenario("step needs a browser session"))
}

/// Sequential step executor
#[derive(Debug, Clone)]
pub struct StepEngine {
    default_timeout: Duration,
    navigation_timeout: Duration,
    gate_timeout: Duration,
    poll_interval: Duration,
    base_url: String,
    artifacts_dir: Option<PathBuf>,
    executor: ActionExecutor,
    assertions: AssertionEngine,
    cancel: Option<Arc<AtomicBool>>,
}

impl StepEngine {
    /// Engine configured from `config`
    #[must_use]
    pub fn new(config: &RunnerConfig) -> Self {
        let poll_interval = config.poll_interval();
        Self {
            default_timeout: config.default_timeout(),
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
            gate_timeout: Duration::from_millis(config.gate_timeout_ms),
            poll_interval,
            base_url: config.base_url.clone(),
            artifacts_dir: config.artifacts_dir.clone(),
            executor: ActionExecutor::new().with_poll_interval(poll_interval),
            assertions: AssertionEngine::new()
                .with_default_timeout(Duration::from_millis(config.assertion_timeout_ms))
                .with_poll_interval(poll_interval),
            cancel: None,
        }
    }

    /// Stop at the next step boundary once `flag` is set
    #[must_use]
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Run the main step list
    pub async fn run(
        &self,
        steps: &[Step],
        mode: ExecutionMode,
        session: &mut Session,
        state: &mut RunState,
    ) -> StepsOutcome {
        self.run_steps(steps, 0, mode, true, session, state).await
    }

    /// Run teardown steps best-effort, ignoring cancellation. Indices
    /// continue after the `offset` main steps.
    pub async fn run_teardown(
        &self,
        steps: &[Step],
        offset: usize,
        session: &mut Session,
        state: &mut RunState,
    ) -> StepsOutcome {
        self.run_steps(steps, offset, ExecutionMode::BestEffort, false, session, state)
            .await
    }

    async fn run_steps(
        &self,
        steps: &[Step],
        offset: usize,
        mode: ExecutionMode,
        cancellable: bool,
        session: &mut Session,
        state: &mut RunState,
    ) -> StepsOutcome {
        let mut outcome = StepsOutcome {
            records: steps
                .iter()
                .enumerate()
                .map(|(i, step)| StepRecord::pending(offset + i, step))
                .collect(),
            cancelled: false,
        };
        let mut skip_until = 0;

        for (i, step) in steps.iter().enumerate() {
            let index = offset + i;
            if i < skip_until {
                outcome.records[i].state = StepState::Skipped;
                debug!(scenario = %state.scenario_id, step = index, "step skipped");
                continue;
            }
            if cancellable && self.is_cancelled() {
                info!(scenario = %state.scenario_id, step = index, "run cancelled");
                outcome.cancelled = true;
                break;
            }

            outcome.records[i].state = StepState::Running;
            debug!(scenario = %state.scenario_id, step = index, action = step.action(), "step started");
            let started = Instant::now();
            let mut assertions = Vec::new();
            let result = self
                .execute(index, step, session, state, &mut assertions)
                .await;

            let record = &mut outcome.records[i];
            record.duration_ms = started.elapsed().as_millis() as u64;
            record.assertions = assertions;
            match result {
                Ok(skip) => {
                    record.state = StepState::Succeeded;
                    if let Some(scope) = skip {
                        skip_until = match scope {
                            SkipScope::Rest => steps.len(),
                            SkipScope::Next(n) => (i + 1).saturating_add(n).min(steps.len()),
                        };
                    }
                }
                Err(e) => {
                    warn!(scenario = %state.scenario_id, step = index, error = %e, "step failed");
                    record.state = StepState::Failed;
                    record.failure = Some(StepFailure::new(index, step, &e));
                    if mode == ExecutionMode::FailFast {
                        break;
                    }
                }
            }
        }
        outcome
    }

    fn budget(&self, step: &Step) -> Duration {
        step.timeout_ms
            .map_or(self.default_timeout, Duration::from_millis)
    }

    fn resolver(&self, budget: Duration) -> LocatorResolver {
        LocatorResolver::new()
            .with_timeout(budget)
            .with_poll_interval(self.poll_interval)
    }

    /// Execute one step; `Some(scope)` means a gate was taken
    async fn execute(
        &self,
        index: usize,
        step: &Step,
        session: &mut Session,
        state: &mut RunState,
        outcomes: &mut Vec<AssertionOutcome>,
    ) -> EnsayoResult<Option<SkipScope>> {
        // Intermediate expectations may name variables this step captures
        let mut raw = step.clone();
        let expect = match &mut raw.kind {
            StepKind::Http { expect, .. } => std::mem::take(expect),
            _ => Vec::new(),
        };
        let step = match state.vars.expand(&raw) {
            Ok(step) => step,
            Err(e) => {
                state.trace.record(TraceEntry::failed(
                    index,
                    raw.action(),
                    raw.target().cloned(),
                    Utc::now(),
                    e.to_string(),
                ));
                return Err(e);
            }
        };
        let budget = self.budget(&step);
        let post = step.wait_for.as_ref();

        match &step.kind {
            StepKind::Navigate { url } => {
                self.navigate(index, url, post, budget, session, state).await?;
            }
            StepKind::Click { target } => {
                self.act(index, target, &Action::Click, post, budget, session, state)
                    .await?;
            }
            StepKind::Fill { target, value } => {
                let action = Action::Fill(value.clone());
                self.act(index, target, &action, post, budget, session, state)
                    .await?;
            }
            StepKind::Hover { target } => {
                self.act(index, target, &Action::Hover, post, budget, session, state)
                    .await?;
            }
            StepKind::Select { target, value } => {
                let action = Action::Select(value.clone());
                self.act(index, target, &action, post, budget, session, state)
                    .await?;
            }
            StepKind::Drag {
                source,
                target,
                waypoints,
            } => {
                let driver = require_browser(session)?;
                let resolver = self.resolver(budget);
                let started = Utc::now();
                let handles = async {
                    let from = self.bind(driver, &resolver, source).await?;
                    let to = self.bind(driver, &resolver, target).await?;
                    Ok::<_, EnsayoError>((from, to))
                }
                .await;
                let (from, to) = match handles {
                    Ok(pair) => pair,
                    Err(e) => {
                        state.trace.record(TraceEntry::failed(
                            index,
                            "drag",
                            Some(target.clone()),
                            started,
                            e.to_string(),
                        ));
                        return Err(e);
                    }
                };
                let scope = TraceScope {
                    step_index: index,
                    target,
                };
                self.executor
                    .drag(driver, &from, &to, *waypoints, post, budget, scope, &mut state.trace)
                    .await?;
            }
            StepKind::Wait { condition } => {
                let driver = require_browser(session)?;
                let started = Utc::now();
                let result = self.wait(driver, condition, budget).await;
                let target = match condition {
                    PostCondition::Visible(t) | PostCondition::Hidden(t) => Some(t.clone()),
                    _ => None,
                };
                match &result {
                    Ok(()) => state
                        .trace
                        .record(TraceEntry::succeeded(index, "wait", target, started)),
                    Err(e) => state.trace.record(TraceEntry::failed(
                        index,
                        "wait",
                        target,
                        started,
                        e.to_string(),
                    )),
                }
                result?;
            }
            StepKind::Http { .. } => {
                self.http(index, &step, &expect, session, state, outcomes)
                    .await?;
            }
            StepKind::Gate { skip_if, scope } => {
                let started = Utc::now();
                let taken = self.gate(skip_if, session, &state.vars).await;
                let target = match skip_if {
                    Condition::Present(t) | Condition::Missing(t) => Some(t.clone()),
                    _ => None,
                };
                match &taken {
                    Ok(_) => state
                        .trace
                        .record(TraceEntry::succeeded(index, "gate", target, started)),
                    Err(e) => state.trace.record(TraceEntry::failed(
                        index,
                        "gate",
                        target,
                        started,
                        e.to_string(),
                    )),
                }
                if taken? {
                    info!(scenario = %state.scenario_id, step = index, condition = %skip_if, "gate taken");
                    return Ok(Some(*scope));
                }
            }
            StepKind::Screenshot { name } => {
                let started = Utc::now();
                let result = self.screenshot(name, session, state).await;
                match &result {
                    Ok(()) => state
                        .trace
                        .record(TraceEntry::succeeded(index, "screenshot", None, started)),
                    Err(e) => state.trace.record(TraceEntry::failed(
                        index,
                        "screenshot",
                        None,
                        started,
                        e.to_string(),
                    )),
                }
                result?;
            }
        }
        Ok(None)
    }

    /// Resolve, re-resolving once if the owning frame was torn down
    async fn bind(
        &self,
        driver: &mut dyn BrowserDriver,
        resolver: &LocatorResolver,
        target: &TargetDescriptor,
    ) -> EnsayoResult<ElementHandle> {
        match resolver.resolve(driver, target).await {
            Err(e) if e.is_frame_detached() => {
                debug!(descriptor = %target, "frame detached, re-resolving");
                resolver.resolve(driver, target).await
            }
            other => other,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn act(
        &self,
        index: usize,
        target: &TargetDescriptor,
        action: &Action,
        post: Option<&PostCondition>,
        budget: Duration,
        session: &mut Session,
        state: &mut RunState,
    ) -> EnsayoResult<()> {
        let driver = require_browser(session)?;
        let started = Utc::now();
        let handle = match self.bind(driver, &self.resolver(budget), target).await {
            Ok(handle) => handle,
            Err(e) => {
                state.trace.record(TraceEntry::failed(
                    index,
                    action.name(),
                    Some(target.clone()),
                    started,
                    e.to_string(),
                ));
                return Err(e);
            }
        };
        let scope = TraceScope {
            step_index: index,
            target,
        };
        self.executor
            .perform(driver, &handle, action, post, budget, scope, &mut state.trace)
            .await
    }

    fn absolute_url(&self, url: &str) -> String {
        if url.contains("://") || url.starts_with("about:") || url.starts_with("data:") {
            return url.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }

    async fn navigate(
        &self,
        index: usize,
        url: &str,
        post: Option<&PostCondition>,
        budget: Duration,
        session: &mut Session,
        state: &mut RunState,
    ) -> EnsayoResult<()> {
        let driver = require_browser(session)?;
        let url = self.absolute_url(url);
        let started = Utc::now();
        let result: EnsayoResult<()> = async {
            let baseline = match post {
                Some(_) => Baseline::capture(driver).await?,
                None => Baseline::default(),
            };
            match tokio::time::timeout(self.navigation_timeout, driver.navigate(&url)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ActionError::Timeout {
                        action: "navigate".to_string(),
                        timeout_ms: self.navigation_timeout.as_millis() as u64,
                    }
                    .into())
                }
            }
            if let Some(condition) = post {
                let held = wait_for(
                    driver,
                    condition,
                    &baseline,
                    Deadline::after(budget),
                    self.poll_interval,
                )
                .await?;
                if !held {
                    return Err(ActionError::PostConditionUnmet {
                        condition: condition.to_string(),
                        timeout_ms: budget.as_millis() as u64,
                    }
                    .into());
                }
            }
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => state
                .trace
                .record(TraceEntry::succeeded(index, format!("navigate {url}"), None, started)),
            Err(e) => state.trace.record(TraceEntry::failed(
                index,
                format!("navigate {url}"),
                None,
                started,
                e.to_string(),
            )),
        }
        result
    }

    async fn wait(
        &self,
        driver: &mut dyn BrowserDriver,
        condition: &PostCondition,
        budget: Duration,
    ) -> EnsayoResult<()> {
        let baseline = Baseline::capture(driver).await?;
        let held = wait_for(
            driver,
            condition,
            &baseline,
            Deadline::after(budget),
            self.poll_interval,
        )
        .await?;
        if held {
            Ok(())
        } else {
            Err(ActionError::PostConditionUnmet {
                condition: condition.to_string(),
                timeout_ms: budget.as_millis() as u64,
            }
            .into())
        }
    }

    async fn http(
        &self,
        index: usize,
        step: &Step,
        expect: &[crate::assertion::Assertion],
        session: &mut Session,
        state: &mut RunState,
        outcomes: &mut Vec<AssertionOutcome>,
    ) -> EnsayoResult<()> {
        let StepKind::Http {
            save_as,
            capture,
            expect_status,
            ..
        } = &step.kind
        else {
            return Ok(());
        };
        let Some(request) = step.request() else {
            return Ok(());
        };
        let client = session
            .http()
            .cloned()
            .ok_or_else(|| EnsayoError::scenario("http step needs an HTTP client"))?;

        let label = format!("http {} {}", request.method, request.path);
        let started = Utc::now();
        let result = async {
            let exchange = match step.timeout_ms {
                Some(timeout_ms) => {
                    tokio::time::timeout(Duration::from_millis(timeout_ms), client.send(&request))
                        .await
                        .map_err(|_| TransportError::Timeout { timeout_ms })??
                }
                None => client.send(&request).await?,
            };
            state.responses.insert(save_as.as_deref(), exchange.clone());
            check_status(&exchange, expect_status)?;
            for (name, path) in capture {
                let pointer = normalize_pointer(path);
                let value = lookup(&exchange.body, &pointer).ok_or_else(|| {
                    EnsayoError::decode(format!("capture `{name}`: no value at {pointer}"))
                })?;
                state.vars.set(name.clone(), value.clone());
            }
            Ok::<_, EnsayoError>(())
        }
        .await;

        match &result {
            Ok(()) => state
                .trace
                .record(TraceEntry::succeeded(index, label, None, started)),
            Err(e) => state
                .trace
                .record(TraceEntry::failed(index, label, None, started, e.to_string())),
        }
        result?;

        if expect.is_empty() {
            return Ok(());
        }
        let evaluated = self
            .assertions
            .evaluate_all(expect, session.browser(), &state.responses, &state.vars)
            .await;
        let first_error = evaluated
            .iter()
            .find_map(|o| o.verdict.to_error().map(|e| (o.name.clone(), e)));
        outcomes.extend(evaluated);
        match first_error {
            Some((name, EnsayoError::AssertionFailure { expected, actual })) => {
                Err(EnsayoError::AssertionFailure {
                    expected: format!("{name}: {expected}"),
                    actual,
                })
            }
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }

    async fn gate(
        &self,
        condition: &Condition,
        session: &mut Session,
        vars: &Vars,
    ) -> EnsayoResult<bool> {
        let resolver = self.resolver(self.gate_timeout);
        match condition {
            Condition::Present(target) | Condition::Missing(target) => {
                let driver = require_browser(session)?;
                let present = match resolver.is_present(driver, target, self.gate_timeout).await {
                    Ok(present) => present,
                    Err(e) if e.is_frame_detached() => false,
                    Err(e) => return Err(e),
                };
                Ok(present == matches!(condition, Condition::Present(_)))
            }
            Condition::UrlContains(fragment) => {
                let driver = require_browser(session)?;
                Ok(driver.current_url().await?.contains(fragment.as_str()))
            }
            Condition::VarEquals { var, value } => Ok(vars.get(var) == Some(value)),
        }
    }

    async fn screenshot(
        &self,
        name: &str,
        session: &mut Session,
        state: &mut RunState,
    ) -> EnsayoResult<()> {
        let driver = require_browser(session)?;
        let bytes = driver.screenshot().await?;
        let Some(ref dir) = self.artifacts_dir else {
            debug!(name, bytes = bytes.len(), "no artifacts directory, screenshot discarded");
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!(
            "{}-{}.png",
            artifact_stem(&state.scenario_id),
            artifact_stem(name)
        ));
        tokio::fs::write(&path, &bytes).await?;
        state.screenshots.push(path);
        Ok(())
    }
}
