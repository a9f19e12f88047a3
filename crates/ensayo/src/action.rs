//! Action Executor.
//!
//! Runs one action against a bound handle:
//!
//! 1. wait until the element is attached, visible, enabled and unobstructed
//! 2. perform the native action
//! 3. wait for the step's post-condition, if any
//!
//! All three phases share one budget. Drag is a down/move/up sequence that
//! either completes as a whole or leaves nothing marked as succeeded.

use crate::driver::{BrowserDriver, ElementHandle};
use crate::locator::{Point, TargetDescriptor, DEFAULT_POLL_INTERVAL_MS};
use crate::result::{ActionError, EnsayoResult};
use crate::trace::{StepTrace, TraceEntry};
use crate::wait::{wait_for, Baseline, Deadline, PostCondition};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

/// Intermediate pointer positions used by drag when none are configured
pub const DEFAULT_DRAG_WAYPOINTS: u32 = 10;

/// Budget for releasing the pointer after a failed drag
const RELEASE_TIMEOUT_MS: u64 = 500;

/// Single-element action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Primary click
    Click,
    /// Replace input value
    Fill(String),
    /// Pointer hover
    Hover,
    /// Choose a select option
    Select(String),
}

impl Action {
    /// Name used in traces and errors
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Fill(_) => "fill",
            Self::Hover => "hover",
            Self::Select(_) => "select",
        }
    }
}

/// Where trace entries for an action belong
#[derive(Debug, Clone, Copy)]
pub struct TraceScope<'a> {
    /// Owning step index
    pub step_index: usize,
    /// Descriptor the handle was resolved from
    pub target: &'a TargetDescriptor,
}

#[derive(Debug, Default)]
struct DragProgress {
    phases: Vec<TraceEntry>,
    origin: Option<Point>,
    pressed: bool,
}

/// Executes actions with actionability checks and post-condition waits
#[derive(Debug, Clone, Copy)]
pub struct ActionExecutor {
    poll_interval: Duration,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl ActionExecutor {
    /// Create an executor with the default poll interval
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set poll interval for actionability and post-condition checks
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Perform `action` on `handle` within `budget` and record it in `trace`
    pub async fn perform(
        &self,
        driver: &mut dyn BrowserDriver,
        handle: &ElementHandle,
        action: &Action,
        post: Option<&PostCondition>,
        budget: Duration,
        scope: TraceScope<'_>,
        trace: &mut StepTrace,
    ) -> EnsayoResult<()> {
        let started = Utc::now();
        let result = self.run(driver, handle, action, post, budget).await;
        let target = Some(scope.target.clone());
        match &result {
            Ok(()) => trace.record(TraceEntry::succeeded(
                scope.step_index,
                action.name(),
                target,
                started,
            )),
            Err(e) => trace.record(TraceEntry::failed(
                scope.step_index,
                action.name(),
                target,
                started,
                e.to_string(),
            )),
        }
        result
    }

    async fn run(
        &self,
        driver: &mut dyn BrowserDriver,
        handle: &ElementHandle,
        action: &Action,
        post: Option<&PostCondition>,
        budget: Duration,
    ) -> EnsayoResult<()> {
        let deadline = Deadline::after(budget);
        self.wait_actionable(driver, handle, &deadline).await?;

        let baseline = match post {
            Some(_) => Baseline::capture(driver).await?,
            None => Baseline::default(),
        };

        let native = async {
            match action {
                Action::Click => driver.click(handle).await,
                Action::Fill(value) => driver.fill(handle, value).await,
                Action::Hover => driver.hover(handle).await,
                Action::Select(value) => driver.select_option(handle, value).await,
            }
        };
        match tokio::time::timeout(deadline.remaining(), native).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ActionError::Timeout {
                    action: action.name().to_string(),
                    timeout_ms: budget.as_millis() as u64,
                }
                .into())
            }
        }

        if let Some(condition) = post {
            self.await_post_condition(driver, condition, &baseline, deadline, budget)
                .await?;
        }
        debug!(action = action.name(), handle = %handle.id, "action completed");
        Ok(())
    }

    async fn await_post_condition(
        &self,
        driver: &mut dyn BrowserDriver,
        condition: &PostCondition,
        baseline: &Baseline,
        deadline: Deadline,
        budget: Duration,
    ) -> EnsayoResult<()> {
        if wait_for(driver, condition, baseline, deadline, self.poll_interval).await? {
            Ok(())
        } else {
            Err(ActionError::PostConditionUnmet {
                condition: condition.to_string(),
                timeout_ms: budget.as_millis() as u64,
            }
            .into())
        }
    }

    /// Wait until `handle` can receive input; returns its layout center
    async fn wait_actionable(
        &self,
        driver: &mut dyn BrowserDriver,
        handle: &ElementHandle,
        deadline: &Deadline,
    ) -> EnsayoResult<Option<Point>> {
        loop {
            let state = driver.element_state(handle).await?;
            let reason = match state.blocker() {
                None => return Ok(state.bounds.map(|b| b.center())),
                Some(reason) if !state.attached => {
                    return Err(ActionError::NotInteractable {
                        reason: reason.to_string(),
                    }
                    .into())
                }
                Some(reason) => reason,
            };
            if !deadline.tick(self.poll_interval).await {
                return Err(ActionError::NotInteractable {
                    reason: reason.to_string(),
                }
                .into());
            }
        }
    }

    /// Drag `source` onto `target` through `waypoints` intermediate positions.
    ///
    /// Phase entries are committed to `trace` only when every phase and the
    /// optional post-condition succeed. On failure the pointer is released
    /// over the origin and a single failed `drag` entry is recorded.
    pub async fn drag(
        &self,
        driver: &mut dyn BrowserDriver,
        source: &ElementHandle,
        target: &ElementHandle,
        waypoints: u32,
        post: Option<&PostCondition>,
        budget: Duration,
        scope: TraceScope<'_>,
        trace: &mut StepTrace,
    ) -> EnsayoResult<()> {
        let started = Utc::now();
        let mut progress = DragProgress::default();
        let deadline = Deadline::after(budget);

        let result = match tokio::time::timeout(
            budget,
            self.drag_phases(
                driver,
                source,
                target,
                waypoints,
                post,
                deadline,
                budget,
                scope.step_index,
                &mut progress,
            ),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ActionError::Timeout {
                action: "drag".to_string(),
                timeout_ms: budget.as_millis() as u64,
            }
            .into()),
        };

        let descriptor = Some(scope.target.clone());
        match result {
            Ok(()) => {
                trace.extend(progress.phases);
                trace.record(TraceEntry::succeeded(
                    scope.step_index,
                    "drag",
                    descriptor,
                    started,
                ));
                Ok(())
            }
            Err(e) => {
                if progress.pressed {
                    if let Some(origin) = progress.origin {
                        let release = tokio::time::timeout(
                            Duration::from_millis(RELEASE_TIMEOUT_MS),
                            driver.pointer_up(origin),
                        )
                        .await;
                        if !matches!(release, Ok(Ok(()))) {
                            warn!(step = scope.step_index, "pointer release after failed drag did not complete");
                        }
                    }
                }
                trace.record(TraceEntry::failed(
                    scope.step_index,
                    "drag",
                    descriptor,
                    started,
                    e.to_string(),
                ));
                Err(e)
            }
        }
    }

    async fn drag_phases(
        &self,
        driver: &mut dyn BrowserDriver,
        source: &ElementHandle,
        target: &ElementHandle,
        waypoints: u32,
        post: Option<&PostCondition>,
        deadline: Deadline,
        budget: Duration,
        step_index: usize,
        progress: &mut DragProgress,
    ) -> EnsayoResult<()> {
        let no_box = || ActionError::NotInteractable {
            reason: "element has no layout box".to_string(),
        };
        let from = self
            .wait_actionable(driver, source, &deadline)
            .await?
            .ok_or_else(no_box)?;
        let to = self
            .wait_actionable(driver, target, &deadline)
            .await?
            .ok_or_else(no_box)?;
        let baseline = Baseline::capture(driver).await?;

        let t = Utc::now();
        driver.pointer_down(from).await?;
        progress.origin = Some(from);
        progress.pressed = true;
        progress
            .phases
            .push(TraceEntry::succeeded(step_index, "drag.down", None, t));

        let t = Utc::now();
        let steps = f64::from(waypoints + 1);
        for i in 1..=waypoints {
            driver
                .pointer_move(from.lerp(&to, f64::from(i) / steps))
                .await?;
        }
        driver.pointer_move(to).await?;
        progress
            .phases
            .push(TraceEntry::succeeded(step_index, "drag.move", None, t));

        let t = Utc::now();
        driver.pointer_up(to).await?;
        progress.pressed = false;
        progress
            .phases
            .push(TraceEntry::succeeded(step_index, "drag.up", None, t));

        if let Some(condition) = post {
            self.await_post_condition(driver, condition, &baseline, deadline, budget)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, MockElement, Mutation, Trigger};
    use crate::locator::{BoundingBox, LocatorResolver, Strategy};
    use crate::result::EnsayoError;

    const BUDGET: Duration = Duration::from_millis(60);

    fn executor() -> ActionExecutor {
        ActionExecutor::new().with_poll_interval(Duration::from_millis(5))
    }

    async fn bind(driver: &mut MockDriver, text: &str) -> (ElementHandle, TargetDescriptor) {
        let target = TargetDescriptor::single(Strategy::text(text));
        let handle = LocatorResolver::new()
            .with_timeout(Duration::from_millis(50))
            .resolve(driver, &target)
            .await
            .unwrap();
        (handle, target)
    }

    mod single_action_tests {
        use super::*;

        #[tokio::test]
        async fn test_click_records_trace() {
            let mut driver = MockDriver::new().with_element(MockElement::new("b", "button").text("Go"));
            let (handle, target) = bind(&mut driver, "Go").await;
            let mut trace = StepTrace::new();
            executor()
                .perform(
                    &mut driver,
                    &handle,
                    &Action::Click,
                    None,
                    BUDGET,
                    TraceScope { step_index: 3, target: &target },
                    &mut trace,
                )
                .await
                .unwrap();
            assert!(driver.was_called("click:b"));
            assert_eq!(trace.len(), 1);
            let entry = &trace.entries()[0];
            assert_eq!(entry.step_index, 3);
            assert_eq!(entry.action, "click");
            assert_eq!(entry.target.as_ref(), Some(&target));
        }

        #[tokio::test]
        async fn test_disabled_element_not_interactable() {
            let mut driver = MockDriver::new()
                .with_element(MockElement::new("b", "button").text("Submit").enabled(false));
            let (handle, target) = bind(&mut driver, "Submit").await;
            let mut trace = StepTrace::new();
            let err = executor()
                .perform(
                    &mut driver,
                    &handle,
                    &Action::Click,
                    None,
                    BUDGET,
                    TraceScope { step_index: 0, target: &target },
                    &mut trace,
                )
                .await
                .unwrap_err();
            match err {
                EnsayoError::Action(ActionError::NotInteractable { reason }) => {
                    assert_eq!(reason, "element disabled");
                }
                other => panic!("unexpected error: {other}"),
            }
            assert!(!driver.was_called("click"));
            assert!(!trace.entries()[0].outcome.is_succeeded());
        }

        #[tokio::test]
        async fn test_detached_handle_fails_without_waiting() {
            let mut driver = MockDriver::new().with_element(MockElement::new("b", "button").text("Row"));
            let (handle, target) = bind(&mut driver, "Row").await;
            driver.elements[0].attached = false;
            let start = std::time::Instant::now();
            let result = executor()
                .perform(
                    &mut driver,
                    &handle,
                    &Action::Hover,
                    None,
                    Duration::from_secs(5),
                    TraceScope { step_index: 0, target: &target },
                    &mut StepTrace::new(),
                )
                .await;
            assert!(matches!(
                result,
                Err(EnsayoError::Action(ActionError::NotInteractable { .. }))
            ));
            assert!(start.elapsed() < Duration::from_secs(1));
        }

        #[tokio::test]
        async fn test_waits_until_enabled() {
            let mut driver = MockDriver::new()
                .with_element(MockElement::new("b", "button").text("Next").occluded(true));
            let (handle, target) = bind(&mut driver, "Next").await;
            driver.elements[0].occluded = false;
            executor()
                .perform(
                    &mut driver,
                    &handle,
                    &Action::Click,
                    None,
                    BUDGET,
                    TraceScope { step_index: 0, target: &target },
                    &mut StepTrace::new(),
                )
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_post_condition_met() {
            let mut driver = MockDriver::new()
                .with_element(MockElement::new("open", "button").text("Open"))
                .with_element(MockElement::new("panel", "div").text("Details").visible(false))
                .on(Trigger::Click, "open", vec![Mutation::Show("panel".into())]);
            let (handle, target) = bind(&mut driver, "Open").await;
            let post = PostCondition::Visible(TargetDescriptor::single(Strategy::text("Details")));
            executor()
                .perform(
                    &mut driver,
                    &handle,
                    &Action::Click,
                    Some(&post),
                    BUDGET,
                    TraceScope { step_index: 0, target: &target },
                    &mut StepTrace::new(),
                )
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_post_condition_unmet() {
            let mut driver = MockDriver::new().with_element(MockElement::new("b", "button").text("Noop"));
            let (handle, target) = bind(&mut driver, "Noop").await;
            let err = executor()
                .perform(
                    &mut driver,
                    &handle,
                    &Action::Click,
                    Some(&PostCondition::DomMutation),
                    BUDGET,
                    TraceScope { step_index: 0, target: &target },
                    &mut StepTrace::new(),
                )
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                EnsayoError::Action(ActionError::PostConditionUnmet { .. })
            ));
        }

        #[tokio::test]
        async fn test_fill_sets_value() {
            let mut driver = MockDriver::new()
                .with_element(MockElement::new("title", "input").text("Title"));
            let (handle, target) = bind(&mut driver, "Title").await;
            executor()
                .perform(
                    &mut driver,
                    &handle,
                    &Action::Fill("Write docs".into()),
                    Some(&PostCondition::DomMutation),
                    BUDGET,
                    TraceScope { step_index: 0, target: &target },
                    &mut StepTrace::new(),
                )
                .await
                .unwrap();
            assert_eq!(
                driver.element("title").unwrap().attributes.get("value").unwrap(),
                "Write docs"
            );
        }
    }

    mod drag_tests {
        use super::*;

        fn board() -> MockDriver {
            MockDriver::new()
                .with_element(
                    MockElement::new("card", "div")
                        .text("Card A")
                        .bounds(BoundingBox::new(0.0, 0.0, 100.0, 40.0)),
                )
                .with_element(
                    MockElement::new("done", "section")
                        .text("Done column")
                        .bounds(BoundingBox::new(300.0, 0.0, 100.0, 400.0)),
                )
                .on(
                    Trigger::Drop,
                    "done",
                    vec![Mutation::SetAttribute("card".into(), "data-status".into(), "DONE".into())],
                )
        }

        #[tokio::test]
        async fn test_drag_commits_all_phases() {
            let mut driver = board();
            let (source, _) = bind(&mut driver, "Card A").await;
            let (target, target_desc) = bind(&mut driver, "Done column").await;
            let mut trace = StepTrace::new();
            executor()
                .drag(
                    &mut driver,
                    &source,
                    &target,
                    4,
                    Some(&PostCondition::DomMutation),
                    Duration::from_millis(200),
                    TraceScope { step_index: 1, target: &target_desc },
                    &mut trace,
                )
                .await
                .unwrap();

            let actions: Vec<&str> = trace.entries().iter().map(|e| e.action.as_str()).collect();
            assert_eq!(actions, vec!["drag.down", "drag.move", "drag.up", "drag"]);
            let moves = driver
                .history()
                .iter()
                .filter(|c| c.starts_with("pointer_move"))
                .count();
            assert_eq!(moves, 5);
            assert_eq!(
                driver.element("card").unwrap().attributes.get("data-status").unwrap(),
                "DONE"
            );
        }

        #[tokio::test]
        async fn test_failed_move_leaves_no_succeeded_phase() {
            let mut driver = board().fail_next("pointer_move", "pointer lost");
            let (source, _) = bind(&mut driver, "Card A").await;
            let (target, target_desc) = bind(&mut driver, "Done column").await;
            let mut trace = StepTrace::new();
            let err = executor()
                .drag(
                    &mut driver,
                    &source,
                    &target,
                    4,
                    None,
                    Duration::from_millis(200),
                    TraceScope { step_index: 1, target: &target_desc },
                    &mut trace,
                )
                .await
                .unwrap_err();
            assert!(err.to_string().contains("pointer lost"));
            assert_eq!(trace.len(), 1);
            assert_eq!(trace.entries()[0].action, "drag");
            assert!(!trace.entries()[0].outcome.is_succeeded());
            assert!(!driver.pointer_pressed());
            assert!(driver.element("card").unwrap().attributes.get("data-status").is_none());
        }

        #[tokio::test]
        async fn test_drag_needs_interactable_target() {
            let mut driver = board();
            let (source, _) = bind(&mut driver, "Card A").await;
            let (target, target_desc) = bind(&mut driver, "Done column").await;
            driver.elements[1].enabled = false;
            let mut trace = StepTrace::new();
            let err = executor()
                .drag(
                    &mut driver,
                    &source,
                    &target,
                    2,
                    None,
                    Duration::from_millis(40),
                    TraceScope { step_index: 0, target: &target_desc },
                    &mut trace,
                )
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                EnsayoError::Action(ActionError::NotInteractable { .. })
                    | EnsayoError::Action(ActionError::Timeout { .. })
            ));
            assert!(!driver.was_called("pointer_down"));
            assert_eq!(trace.len(), 1);
        }
    }
}
