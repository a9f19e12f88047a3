//! List command handler

use super::load_selection;
use crate::commands::{FormatArg, ListArgs};
use crate::error::CliResult;
use ensayo::Scenario;
use serde_json::json;

/// Print the selected scenarios to stdout
pub fn execute_list(args: &ListArgs) -> CliResult<()> {
    let scenarios = load_selection(&args.selection)?;
    println!("{}", render_list(&scenarios, args.format)?);
    Ok(())
}

/// Render scenarios as aligned text or a JSON array
pub fn render_list(scenarios: &[Scenario], format: FormatArg) -> CliResult<String> {
    match format {
        FormatArg::Json => {
            let items: Vec<_> = scenarios
                .iter()
                .map(|s| {
                    json!({
                        "id": s.id,
                        "description": s.description,
                        "tags": s.tags,
                        "mode": s.mode,
                        "browser": s.requires_browser(),
                        "http": s.requires_http(),
                    })
                })
                .collect();
            Ok(serde_json::to_string_pretty(&items).map_err(ensayo::EnsayoError::from)?)
        }
        FormatArg::Text => {
            let width = scenarios.iter().map(|s| s.id.len()).max().unwrap_or(0);
            let lines: Vec<String> = scenarios
                .iter()
                .map(|s| {
                    let tags = if s.tags.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", s.tags.join(", "))
                    };
                    format!("{:<width$}  {}{tags}", s.id, s.description)
                        .trim_end()
                        .to_string()
                })
                .collect();
            Ok(lines.join("\n"))
        }
    }
}
