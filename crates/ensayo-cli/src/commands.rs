//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Ensayador: run declarative end-to-end scenarios and API contract suites
#[derive(Parser, Debug)]
#[command(name = "ensayador")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (failures only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run scenarios
    Run(RunArgs),

    /// Parse and validate scenario files without running them
    Validate(ValidateArgs),

    /// List scenarios
    List(ListArgs),
}

/// Where scenarios come from, and which of them to keep
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Scenario files or directories
    pub paths: Vec<PathBuf>,

    /// Include a built-in suite (`tracker` or `board`)
    #[arg(long, value_name = "SUITE")]
    pub builtin: Vec<String>,

    /// Keep scenarios carrying any of these tags
    #[arg(short, long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Keep scenarios whose id contains this text
    #[arg(short, long)]
    pub filter: Option<String>,
}

/// Arguments for the run command
#[derive(Parser, Debug, Clone, Default)]
pub struct RunArgs {
    /// Scenario selection
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Runner configuration file (YAML)
    #[arg(short, long, env = "ENSAYO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Force every scenario into one execution mode
    #[arg(long)]
    pub mode: Option<ModeArg>,

    /// Scenarios run concurrently
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Application URL
    #[arg(long, env = "ENSAYO_BASE_URL")]
    pub base_url: Option<String>,

    /// API URL (defaults to the application URL)
    #[arg(long, env = "ENSAYO_API_URL")]
    pub api_url: Option<String>,

    /// Environment variable holding the bearer token
    #[arg(long)]
    pub token_env: Option<String>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Directory for screenshots and DOM snapshots
    #[arg(long)]
    pub artifacts: Option<PathBuf>,

    /// Write a report file in this format
    #[arg(long)]
    pub report: Option<ReportFormat>,

    /// Report file path
    #[arg(short, long, requires = "report")]
    pub output: Option<PathBuf>,

    /// Console output format
    #[arg(long, default_value = "text")]
    pub format: FormatArg,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Scenario selection
    #[command(flatten)]
    pub selection: SelectionArgs,
}

/// Arguments for the list command
#[derive(Parser, Debug, Clone, Default)]
pub struct ListArgs {
    /// Scenario selection
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: FormatArg,
}

/// Execution mode override
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    /// Stop at the first failing step
    FailFast,
    /// Run every step and record failures
    BestEffort,
}

impl From<ModeArg> for ensayo::ExecutionMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::FailFast => Self::FailFast,
            ModeArg::BestEffort => Self::BestEffort,
        }
    }
}

/// Report file format
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// JSON suite report
    #[default]
    Json,
    /// `JUnit` XML
    Junit,
}

impl ReportFormat {
    /// Default report path
    #[must_use]
    pub const fn default_path(self) -> &'static str {
        match self {
            Self::Json => "target/ensayo/report.json",
            Self::Junit => "target/ensayo/junit.xml",
        }
    }
}

/// Console output format
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormatArg {
    /// Human-readable text
    #[default]
    Text,
    /// JSON on stdout
    Json,
}

/// Color argument
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    mod run_tests {
        use super::*;

        #[test]
        fn test_run_with_builtin_and_flags() {
            let cli = Cli::parse_from([
                "ensayador",
                "run",
                "--builtin",
                "tracker",
                "--tag",
                "api",
                "-j",
                "2",
                "--mode",
                "best-effort",
                "--base-url",
                "http://127.0.0.1:3000",
                "--report",
                "junit",
                "--output",
                "out/junit.xml",
            ]);
            let Commands::Run(args) = cli.command else {
                panic!("expected run");
            };
            assert_eq!(args.selection.builtin, vec!["tracker"]);
            assert_eq!(args.selection.tags, vec!["api"]);
            assert_eq!(args.jobs, Some(2));
            assert_eq!(args.mode, Some(ModeArg::BestEffort));
            assert_eq!(args.report, Some(ReportFormat::Junit));
            assert_eq!(args.output, Some(PathBuf::from("out/junit.xml")));
            assert_eq!(args.format, FormatArg::Text);
        }

        #[test]
        fn test_output_requires_report() {
            let err = Cli::try_parse_from(["ensayador", "run", "--output", "x.json"]);
            assert!(err.is_err());
        }

        #[test]
        fn test_global_flags_after_subcommand() {
            let cli = Cli::parse_from(["ensayador", "list", "scenarios/", "-vv", "--log-json"]);
            assert_eq!(cli.verbose, 2);
            assert!(cli.log_json);
        }
    }

    mod conversion_tests {
        use super::*;

        #[test]
        fn test_mode_conversion() {
            assert_eq!(
                ensayo::ExecutionMode::from(ModeArg::FailFast),
                ensayo::ExecutionMode::FailFast
            );
        }

        #[test]
        fn test_report_default_paths() {
            assert!(ReportFormat::Json.default_path().ends_with(".json"));
            assert!(ReportFormat::Junit.default_path().ends_with(".xml"));
        }
    }
}
