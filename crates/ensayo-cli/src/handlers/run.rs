//! Run command handler

use super::load_selection;
use crate::commands::{FormatArg, ReportFormat, RunArgs};
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use ensayo::{
    JsonReportSink, JunitReportSink, ReportSink, RunnerConfig, ScenarioRunner, SuiteReport,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// Merge the config file (if any) with command-line overrides
pub fn build_runner_config(args: &RunArgs) -> CliResult<RunnerConfig> {
    let mut config = match args.config {
        Some(ref path) => RunnerConfig::load_file(path)?,
        None => RunnerConfig::new(),
    };

    if let Some(ref url) = args.base_url {
        config = config.with_base_url(url.clone());
    }
    if let Some(ref url) = args.api_url {
        config = config.with_api_url(url.clone());
    }
    if let Some(ref name) = args.token_env {
        config = config.with_token_env(name.clone());
    }
    if let Some(jobs) = args.jobs {
        config = config.with_concurrency(jobs);
    }
    if args.headed {
        config.browser.headless = false;
    }
    if let Some(ref dir) = args.artifacts {
        config = config.with_artifacts_dir(dir.clone());
    }
    if let Some(mode) = args.mode {
        config = config.with_mode_override(mode.into());
    }

    config.validate()?;
    Ok(config)
}

/// Write `report` in `format`; returns the path written
pub fn write_report(
    report: &SuiteReport,
    format: ReportFormat,
    output: Option<PathBuf>,
) -> CliResult<PathBuf> {
    let path = output.unwrap_or_else(|| PathBuf::from(format.default_path()));
    let emitted = match format {
        ReportFormat::Json => JsonReportSink::new(&path).emit(report),
        ReportFormat::Junit => JunitReportSink::new(&path)
            .with_suite_name("ensayador")
            .emit(report),
    };
    emitted.map_err(|e| {
        CliError::report_generation(format!("cannot write {}: {e}", path.display()))
    })?;
    Ok(path)
}

/// Execute the run command
pub fn execute_run(config: &CliConfig, args: &RunArgs) -> CliResult<SuiteReport> {
    let scenarios = load_selection(&args.selection)?;
    let runner_config = build_runner_config(args)?;
    let mut reporter = ProgressReporter::new(
        config.color.should_color(),
        config.verbosity.is_quiet() || args.format == FormatArg::Json,
    );

    if scenarios.is_empty() {
        reporter.warning("no scenarios matched the selection");
    }
    reporter.header(&format!("Running {} scenario(s)", scenarios.len()));
    info!(
        scenarios = scenarios.len(),
        concurrency = runner_config.concurrency,
        base_url = %runner_config.base_url,
        "starting suite"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(async {
        let runner = ScenarioRunner::new(runner_config);
        let cancel = runner.cancel_flag();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling at the next step boundary");
                cancel.store(true, Ordering::SeqCst);
            }
        });

        reporter.start_progress(scenarios.len() as u64, "scenarios");
        let report = runner
            .run_suite_observed(scenarios, |result| reporter.scenario_finished(result))
            .await;
        reporter.finish();
        report
    });

    if let Some(format) = args.report {
        let path = write_report(&report, format, args.output.clone())?;
        reporter.info(&format!("report written to {}", path.display()));
    }
    if args.format == FormatArg::Json {
        let json = serde_json::to_string_pretty(&report).map_err(ensayo::EnsayoError::from)?;
        println!("{json}");
    }
    reporter.summary(&report);

    if report.all_passed() {
        Ok(report)
    } else {
        Err(CliError::ScenariosFailed {
            failed: report.failed + report.errored,
            total: report.total,
        })
    }
}
