//! Ensayador: run declarative end-to-end scenarios
//!
//! ## Usage
//!
//! ```bash
//! ensayador run scenarios/                          # Run a directory of scenarios
//! ensayador run --builtin tracker --tag tasks       # Run part of a built-in suite
//! ensayador run scenarios/ --report junit -o out.xml
//! ensayador validate scenarios/                     # Parse without running
//! ensayador list --builtin tracker --format json
//! ```

use clap::Parser;
use ensayo_cli::{handlers, init_logging, Cli, CliConfig, CliResult, Commands, Verbosity};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_logging(&config);

    match cli.command {
        Commands::Run(args) => handlers::execute_run(&config, &args).map(|_| ()),
        Commands::Validate(args) => handlers::execute_validate(&config, &args).map(|_| ()),
        Commands::List(args) => handlers::execute_list(&args),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(cli.color.into())
        .with_log_json(cli.log_json)
}
