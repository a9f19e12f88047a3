//! Command handlers - extracted from main.rs for testability

pub mod list;
pub mod run;
pub mod validate;

pub use list::{execute_list, render_list};
pub use run::{build_runner_config, execute_run, write_report};
pub use validate::execute_validate;

use crate::commands::SelectionArgs;
use crate::error::{CliError, CliResult};
use ensayo::{builtin_suite, ensure_unique_ids, Scenario, ScenarioFilter, YamlLoader};

/// Load scenarios from paths and built-in suites, then apply tag and id filters
pub fn load_selection(selection: &SelectionArgs) -> CliResult<Vec<Scenario>> {
    if selection.paths.is_empty() && selection.builtin.is_empty() {
        return Err(CliError::invalid_argument(
            "no scenarios given: pass scenario paths or --builtin <SUITE>",
        ));
    }

    let mut scenarios = YamlLoader::new().load_paths(&selection.paths)?;
    for suite in &selection.builtin {
        scenarios.extend(builtin_suite(suite)?);
    }
    ensure_unique_ids(&scenarios)?;

    let mut filter = ScenarioFilter::new().with_tags(selection.tags.clone());
    if let Some(ref fragment) = selection.filter {
        filter = filter.with_id(fragment.clone());
    }
    Ok(filter.apply(scenarios))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCENARIO: &str = "id: tracker-phases\nsteps:\n  - action: http\n    method: GET\n    path: /phases\n";

    #[test]
    fn test_requires_a_source() {
        let err = load_selection(&SelectionArgs::default()).unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument { .. }));
    }

    #[test]
    fn test_builtin_with_filters() {
        let selection = SelectionArgs {
            builtin: vec!["tracker".to_string()],
            tags: vec!["write".to_string()],
            filter: Some("lifecycle".to_string()),
            ..SelectionArgs::default()
        };
        let scenarios = load_selection(&selection).unwrap();
        assert_eq!(scenarios.len(), 1);
        assert_eq!(scenarios[0].id, "tracker-task-lifecycle");
    }

    #[test]
    fn test_file_clashing_with_builtin_id() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "{SCENARIO}").unwrap();
        let selection = SelectionArgs {
            paths: vec![file.path().to_path_buf()],
            builtin: vec!["tracker".to_string()],
            ..SelectionArgs::default()
        };
        let err = load_selection(&selection).unwrap_err();
        assert!(err.to_string().contains("duplicate scenario id: tracker-phases"));
    }

    #[test]
    fn test_unknown_builtin() {
        let selection = SelectionArgs {
            builtin: vec!["shop".to_string()],
            ..SelectionArgs::default()
        };
        assert!(load_selection(&selection).is_err());
    }
}
