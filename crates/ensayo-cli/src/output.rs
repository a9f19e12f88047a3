//! Console output and progress reporting

use console::{style, Style, Term};
use ensayo::{failure_details, RunResult, RunVerdict, SuiteReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter for a suite run
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    progress_bar: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            progress_bar: None,
            use_color,
            quiet,
        }
    }

    /// Start a progress bar over `total` scenarios
    pub fn start_progress(&mut self, total: u64, message: &str) {
        if self.quiet || !self.term.is_term() {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        self.progress_bar = Some(pb);
    }

    /// Finish progress bar
    pub fn finish(&self) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_and_clear();
        }
    }

    fn line(&self, text: &str) {
        match self.progress_bar {
            Some(ref pb) => pb.println(text),
            None => {
                let _ = self.term.write_line(text);
            }
        }
    }

    fn prefix(&self, symbol: &str, plain: &str, color: Style) -> String {
        if self.use_color {
            color.bold().apply_to(symbol).to_string()
        } else {
            plain.to_string()
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = self.prefix("✓", "PASS", Style::new().green());
        self.line(&format!("{prefix} {message}"));
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Failures print even in quiet mode
        let prefix = self.prefix("✗", "FAIL", Style::new().red());
        self.line(&format!("{prefix} {message}"));
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        let prefix = self.prefix("!", "ERROR", Style::new().magenta());
        self.line(&format!("{prefix} {message}"));
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = self.prefix("⚠", "WARN", Style::new().yellow());
        self.line(&format!("{prefix} {message}"));
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = self.prefix("ℹ", "INFO", Style::new().blue());
        self.line(&format!("{prefix} {message}"));
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }
        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };
        self.line("");
        self.line(&styled);
    }

    /// Report one finished scenario and advance the bar
    pub fn scenario_finished(&self, result: &RunResult) {
        if let Some(ref pb) = self.progress_bar {
            pb.inc(1);
            pb.set_message(result.scenario_id.clone());
        }
        let timing = format!("{} ({}ms)", result.scenario_id, result.elapsed_ms);
        match result.verdict {
            RunVerdict::Passed => self.success(&timing),
            RunVerdict::Failed => {
                self.failure(&timing);
                self.details(result);
            }
            RunVerdict::Errored => {
                self.error(&timing);
                self.details(result);
            }
        }
    }

    fn details(&self, result: &RunResult) {
        for line in failure_details(result).lines() {
            self.line(&format!("    {line}"));
        }
        if let Some(ref artifact) = result.artifact {
            let location = artifact
                .path
                .as_ref()
                .map_or_else(|| "not written".to_string(), |p| p.display().to_string());
            self.line(&format!(
                "    {} sha256:{} ({location})",
                artifact.kind, artifact.digest
            ));
        }
    }

    /// Print the suite summary line
    pub fn summary(&self, report: &SuiteReport) {
        let failing = report.failed + report.errored;
        if self.quiet && failing == 0 {
            return;
        }

        let secs = Duration::from_millis(report.elapsed_ms).as_secs_f64();
        let status = if failing > 0 { "FAILED" } else { "PASSED" };
        let text = format!(
            "{} scenario(s) in {secs:.2}s ({} passed, {} failed, {} errored)",
            report.total, report.passed, report.failed, report.errored
        );
        self.line("");
        if self.use_color {
            let status_style = if failing > 0 {
                Style::new().red().bold()
            } else {
                Style::new().green().bold()
            };
            self.line(&format!("{} {text}", status_style.apply_to(status)));
        } else {
            self.line(&format!("{status} {text}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, verdict: RunVerdict) -> RunResult {
        let mut value = serde_json::json!({
            "scenario_id": id,
            "verdict": verdict,
            "steps": [],
            "assertions": [],
            "trace": [],
            "screenshots": [],
            "started_at": "2026-01-01T00:00:00Z",
            "elapsed_ms": 12
        });
        if verdict != RunVerdict::Passed {
            value["first_error"] = serde_json::json!("step 0 failed (transport): refused");
        }
        serde_json::from_value(value).unwrap()
    }

    mod progress_reporter_tests {
        use super::*;

        #[test]
        fn test_new_reporter() {
            let reporter = ProgressReporter::new(true, false);
            assert!(reporter.use_color);
            assert!(!reporter.quiet);
        }

        #[test]
        fn test_default_reporter() {
            let reporter = ProgressReporter::default();
            assert!(reporter.use_color);
        }

        #[test]
        fn test_messages() {
            let reporter = ProgressReporter::new(false, false);
            reporter.success("passed");
            reporter.failure("failed");
            reporter.error("errored");
            reporter.warning("warning");
            reporter.info("info");
            reporter.header("Header");
        }

        #[test]
        fn test_scenario_results() {
            let mut reporter = ProgressReporter::new(false, false);
            reporter.start_progress(3, "running");
            reporter.scenario_finished(&result("a", RunVerdict::Passed));
            reporter.scenario_finished(&result("b", RunVerdict::Failed));
            reporter.scenario_finished(&result("c", RunVerdict::Errored));
            reporter.finish();
        }

        #[test]
        fn test_summary() {
            let reporter = ProgressReporter::new(false, true);
            let report = SuiteReport::from_results(
                vec![result("a", RunVerdict::Passed), result("b", RunVerdict::Failed)],
                Duration::from_millis(1500),
            );
            assert_eq!(report.failed, 1);
            reporter.summary(&report);
        }
    }
}
