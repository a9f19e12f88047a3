//! Validate command handler

use super::load_selection;
use crate::commands::ValidateArgs;
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::output::ProgressReporter;

/// Parse and validate every selected scenario; returns how many were valid
pub fn execute_validate(config: &CliConfig, args: &ValidateArgs) -> CliResult<usize> {
    let reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
    let scenarios = load_selection(&args.selection)?;
    for scenario in &scenarios {
        reporter.success(&format!(
            "{} ({} steps, {} assertions, {} teardown)",
            scenario.id,
            scenario.steps.len(),
            scenario.assertions.len(),
            scenario.teardown.len()
        ));
    }
    reporter.info(&format!("{} scenario(s) valid", scenarios.len()));
    Ok(scenarios.len())
}
