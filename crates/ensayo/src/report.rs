//! Report sinks.
//!
//! The runner produces a [`SuiteReport`]; formatting and output belong to a
//! [`ReportSink`]. Console rendering lives in the CLI.

use crate::result::EnsayoResult;
use crate::runner::{RunResult, RunVerdict, SuiteReport};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Destination for a finished suite report
pub trait ReportSink {
    /// Emit `report`
    ///
    /// # Errors
    ///
    /// Returns error if the report cannot be written
    fn emit(&self, report: &SuiteReport) -> EnsayoResult<()>;
}

/// Writes the report as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    /// Sink writing to `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Output path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonReportSink {
    fn emit(&self, report: &SuiteReport) -> EnsayoResult<()> {
        write_file(&self.path, &serde_json::to_string_pretty(report)?)
    }
}

/// Writes the report as JUnit XML
#[derive(Debug, Clone)]
pub struct JunitReportSink {
    path: PathBuf,
    suite_name: String,
}

impl JunitReportSink {
    /// Sink writing to `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            suite_name: "ensayo".to_string(),
        }
    }

    /// Set the `<testsuite>` name
    #[must_use]
    pub fn with_suite_name(mut self, name: impl Into<String>) -> Self {
        self.suite_name = name.into();
        self
    }
}

impl ReportSink for JunitReportSink {
    fn emit(&self, report: &SuiteReport) -> EnsayoResult<()> {
        write_file(&self.path, &render_junit(report, &self.suite_name))
    }
}

fn write_file(path: &Path, content: &str) -> EnsayoResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Diagnostic text for a scenario that did not pass
#[must_use]
pub fn failure_details(result: &RunResult) -> String {
    let mut out = String::new();
    if let Some(ref error) = result.first_error {
        let _ = writeln!(out, "{error}");
    }
    for outcome in result.failed_assertions() {
        let _ = writeln!(out, "assertion {} ({}): {}", outcome.index, outcome.name, outcome.verdict);
    }
    out
}

/// Render a suite report as JUnit XML
#[must_use]
pub fn render_junit(report: &SuiteReport, suite_name: &str) -> String {
    let mut xml = String::new();

    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    let _ = writeln!(
        xml,
        r#"<testsuite name="{}" tests="{}" failures="{}" errors="{}" time="{:.3}">"#,
        escape_xml(suite_name),
        report.total,
        report.failed,
        report.errored,
        report.elapsed_ms as f64 / 1000.0
    );

    for summary in &report.summaries {
        let _ = writeln!(
            xml,
            r#"  <testcase name="{}" classname="{}" time="{:.3}">"#,
            escape_xml(&summary.scenario_id),
            escape_xml(suite_name),
            summary.elapsed_ms as f64 / 1000.0
        );

        let detail = report
            .failures
            .iter()
            .find(|r| r.scenario_id == summary.scenario_id);
        let message = summary.first_error.clone().unwrap_or_else(|| {
            format!("{} assertion(s) did not pass", summary.assertions_failed)
        });
        let body = detail.map(failure_details).unwrap_or_default();
        let tag = match summary.verdict {
            RunVerdict::Passed => None,
            RunVerdict::Failed => Some("failure"),
            RunVerdict::Errored => Some("error"),
        };
        if let Some(tag) = tag {
            let _ = writeln!(
                xml,
                r#"    <{tag} message="{}">{}</{tag}>"#,
                escape_xml(&message),
                escape_xml(body.trim_end())
            );
        }

        xml.push_str("  </testcase>\n");
    }

    xml.push_str("</testsuite>\n");
    xml
}

/// Escape XML special characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::{AssertionOutcome, Verdict};
    use chrono::Utc;
    use std::time::Duration;

    fn result(id: &str, verdict: RunVerdict, first_error: Option<&str>) -> RunResult {
        let mut assertions = vec![AssertionOutcome {
            index: 0,
            name: "total".to_string(),
            verdict: Verdict::Pass,
        }];
        if verdict == RunVerdict::Failed {
            assertions.push(AssertionOutcome {
                index: 1,
                name: "gap <= 100".to_string(),
                verdict: Verdict::Fail {
                    expected: "/gap_percentage <= 100".to_string(),
                    actual: "140".to_string(),
                },
            });
        }
        RunResult {
            scenario_id: id.to_string(),
            verdict,
            steps: Vec::new(),
            teardown: Vec::new(),
            assertions,
            trace: Vec::new(),
            first_error: first_error.map(String::from),
            artifact: None,
            screenshots: Vec::new(),
            started_at: Utc::now(),
            elapsed_ms: 1500,
        }
    }

    fn report() -> SuiteReport {
        SuiteReport::from_results(
            vec![
                result("tasks", RunVerdict::Passed, None),
                result("gap<analysis>", RunVerdict::Failed, None),
                result("ui", RunVerdict::Errored, Some("session could not be acquired")),
            ],
            Duration::from_millis(2500),
        )
    }

    mod junit_tests {
        use super::*;

        #[test]
        fn test_counts_in_header() {
            let xml = render_junit(&report(), "tracker");
            assert!(xml.contains(
                r#"<testsuite name="tracker" tests="3" failures="1" errors="1" time="2.500">"#
            ));
        }

        #[test]
        fn test_failure_carries_assertions() {
            let xml = render_junit(&report(), "tracker");
            assert!(xml.contains(r#"<testcase name="gap&lt;analysis&gt;""#));
            assert!(xml.contains(r#"<failure message="1 assertion(s) did not pass">"#));
            assert!(xml.contains("assertion 1 (gap &lt;= 100): expected /gap_percentage &lt;= 100, got 140"));
        }

        #[test]
        fn test_errored_uses_error_tag() {
            let xml = render_junit(&report(), "tracker");
            assert!(xml.contains(r#"<error message="session could not be acquired">"#));
        }

        #[test]
        fn test_escape_xml() {
            assert_eq!(escape_xml("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&apos;");
        }
    }

    mod sink_tests {
        use super::*;

        #[test]
        fn test_json_sink_round_trips() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("reports/suite.json");
            JsonReportSink::new(&path).emit(&report()).unwrap();
            let parsed: SuiteReport =
                serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
            assert_eq!(parsed.total, 3);
            assert_eq!(parsed.failures.len(), 2);
        }

        #[test]
        fn test_junit_sink_writes_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("junit.xml");
            JunitReportSink::new(&path)
                .with_suite_name("nightly")
                .emit(&report())
                .unwrap();
            let xml = std::fs::read_to_string(&path).unwrap();
            assert!(xml.starts_with("<?xml"));
            assert!(xml.contains(r#"name="nightly""#));
        }
    }
}
