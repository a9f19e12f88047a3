//! Built-in scenario suites embedded in the library.
//!
//! The `tracker` suite checks the tracker-app backend contract: gap analysis
//! arithmetic, task list shape, phases idempotence, status round trip, the
//! task lifecycle, hierarchy lists, wizard content and configuration sync.
//! The `board` suite drives the tracker UI in a browser: a Gantt bar drag
//! and the task detail panel.

use crate::result::{EnsayoError, EnsayoResult};
use crate::scenario::{ensure_unique_ids, Scenario, YamlLoader};

const TRACKER: &[(&str, &str)] = &[
    (
        "gap_analysis.yaml",
        include_str!("../scenarios/tracker/gap_analysis.yaml"),
    ),
    ("tasks.yaml", include_str!("../scenarios/tracker/tasks.yaml")),
    ("phases.yaml", include_str!("../scenarios/tracker/phases.yaml")),
    (
        "task_status.yaml",
        include_str!("../scenarios/tracker/task_status.yaml"),
    ),
    (
        "task_lifecycle.yaml",
        include_str!("../scenarios/tracker/task_lifecycle.yaml"),
    ),
    (
        "tracker_app_data.yaml",
        include_str!("../scenarios/tracker/tracker_app_data.yaml"),
    ),
    (
        "static_content.yaml",
        include_str!("../scenarios/tracker/static_content.yaml"),
    ),
    (
        "local_storage.yaml",
        include_str!("../scenarios/tracker/local_storage.yaml"),
    ),
];

const BOARD: &[(&str, &str)] = &[
    (
        "gantt_drag.yaml",
        include_str!("../scenarios/board/gantt_drag.yaml"),
    ),
    (
        "task_modal.yaml",
        include_str!("../scenarios/board/task_modal.yaml"),
    ),
];

/// Names accepted by [`builtin_suite`]
pub const SUITES: &[&str] = &["tracker", "board"];

/// Parse a built-in suite
///
/// # Errors
///
/// Returns a scenario error for an unknown suite name or a definition that
/// does not parse
pub fn builtin_suite(name: &str) -> EnsayoResult<Vec<Scenario>> {
    let files = match name {
        "tracker" => TRACKER,
        "board" => BOARD,
        other => {
            return Err(EnsayoError::scenario(format!(
                "unknown built-in suite `{other}` (available: {})",
                SUITES.join(", ")
            )))
        }
    };
    let loader = YamlLoader::new();
    let mut scenarios = Vec::new();
    for (file, text) in files {
        let parsed = loader
            .parse_all(text)
            .map_err(|e| EnsayoError::scenario(format!("{name}/{file}: {e}")))?;
        scenarios.extend(parsed);
    }
    ensure_unique_ids(&scenarios)?;
    Ok(scenarios)
}
