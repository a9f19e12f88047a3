//! Built-in board suite against a scripted tracker page.
//!
//! The mock document mirrors the Gantt view: draggable task bars over a
//! timeline drop zone, plus a detail panel that opens on click.

use ensayo::prelude::*;
use std::sync::Arc;

const TASK: &str = "2. Basic Setup (All VPS)";

fn gantt_page(drop_confirms: bool) -> MockDriver {
    let driver = MockDriver::new()
        .with_element(
            MockElement::new("timeline", "div")
                .attr("data-testid", "gantt-timeline")
                .bounds(BoundingBox::new(0.0, 0.0, 900.0, 600.0)),
        )
        .with_element(
            MockElement::new("bar", "div")
                .text(TASK)
                .selector("[draggable=true]")
                .bounds(BoundingBox::new(40.0, 120.0, 160.0, 24.0)),
        )
        .with_element(
            MockElement::new("panel-title", "h2")
                .role("heading")
                .text(TASK)
                .visible(false),
        )
        .with_element(
            MockElement::new("close", "button")
                .role("button")
                .text("Close")
                .visible(false),
        )
        .on(
            Trigger::Click,
            "bar",
            vec![
                Mutation::Show("panel-title".into()),
                Mutation::Show("close".into()),
            ],
        )
        .on(
            Trigger::Click,
            "close",
            vec![
                Mutation::Hide("panel-title".into()),
                Mutation::Hide("close".into()),
            ],
        );
    if drop_confirms {
        driver.on(
            Trigger::Drop,
            "timeline",
            vec![Mutation::Add(
                MockElement::new("toast", "div")
                    .role("status")
                    .text("Moved to Jan 20"),
            )],
        )
    } else {
        driver
    }
}

fn runner(factory: &MockSessionFactory) -> ScenarioRunner {
    let config = RunnerConfig::default()
        .with_base_url("http://localhost:3000")
        .with_default_timeout(1_500)
        .with_assertion_timeout(300)
        .with_gate_timeout(50)
        .with_poll_interval(5);
    ScenarioRunner::new(config).with_factory(Arc::new(factory.clone()))
}

fn board(id: &str) -> Scenario {
    builtin_suite("board")
        .unwrap()
        .into_iter()
        .find(|s| s.id == id)
        .unwrap()
}

#[tokio::test]
async fn board_suite_passes_on_working_page() {
    let factory = MockSessionFactory::with_driver(|| gantt_page(true));
    let report = runner(&factory)
        .run_suite(builtin_suite("board").unwrap())
        .await;
    assert_eq!(report.total, 2);
    assert!(report.all_passed(), "{:?}", report.failures);
    assert_eq!(factory.acquisitions(), 2);
    assert_eq!(factory.releases(), 2);
}

#[tokio::test]
async fn gantt_drag_runs_pointer_sequence() {
    let factory = MockSessionFactory::with_driver(|| gantt_page(true));
    let result = runner(&factory).run(&board("board-gantt-drag")).await;
    assert_eq!(result.verdict, RunVerdict::Passed, "{:?}", result.first_error);

    let history = &factory.histories()[0];
    assert_eq!(history[0], "navigate:http://localhost:3000/#tasks");
    let down = history.iter().position(|c| c.starts_with("pointer_down:")).unwrap();
    let up = history.iter().position(|c| c.starts_with("pointer_up:")).unwrap();
    assert!(down < up);
    assert!(history[down..up].iter().any(|c| c.starts_with("pointer_move:")));
    assert!(!history.iter().any(|c| c == "click:bar"));
}

#[tokio::test]
async fn gantt_drag_without_confirmation_fails() {
    let factory = MockSessionFactory::with_driver(|| gantt_page(false));
    let result = runner(&factory).run(&board("board-gantt-drag")).await;
    assert_eq!(result.verdict, RunVerdict::Failed);
    let error = result.first_error.clone().unwrap();
    assert!(error.contains("step 1"), "{error}");
    assert!(error.contains("failed (action)"), "{error}");
    assert!(result
        .failed_assertions()
        .any(|a| a.name == "move confirmed"));
}

#[tokio::test]
async fn task_modal_opens_and_closes() {
    let factory = MockSessionFactory::with_driver(|| gantt_page(true));
    let result = runner(&factory).run(&board("board-task-modal")).await;
    assert_eq!(result.verdict, RunVerdict::Passed, "{:?}", result.first_error);
    assert_eq!(result.assertions.len(), 2);

    let clicks: Vec<_> = factory.histories()[0]
        .iter()
        .filter(|c| c.starts_with("click:"))
        .cloned()
        .collect();
    assert_eq!(clicks, vec!["click:bar", "click:close"]);
}

#[tokio::test]
async fn task_modal_that_never_opens_fails_on_open_step() {
    let factory = MockSessionFactory::with_driver(|| {
        let mut driver = gantt_page(true);
        driver.elements.retain(|e| e.id != "panel-title");
        driver
    });
    let result = runner(&factory).run(&board("board-task-modal")).await;
    assert_eq!(result.verdict, RunVerdict::Failed);
    assert_eq!(result.steps[1].state, ensayo::StepState::Failed);
    assert_eq!(result.steps[2].state, ensayo::StepState::Pending);
}
