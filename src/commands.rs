use crate::render;
use crate::session::LogViewer;
use anyhow::{bail, Context, Result};
use log::info;

pub const HELP: &str = "\
Commands:
  reload, r        reload the log history
  clear, c         clear the display (server logs are kept)
  list, l [N]      print the buffer, newest first (optionally only N rows)
  status, s        show the connection status
  help, h, ?       show this help
  quit, q, exit    close the viewer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerCommand {
    Reload,
    Clear,
    List(Option<usize>),
    Status,
    Help,
    Quit,
}

pub fn parse_command(input: &str) -> Result<Option<ViewerCommand>> {
    let mut words = input.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "reload" | "r" => ViewerCommand::Reload,
        "clear" | "c" => ViewerCommand::Clear,
        "list" | "l" => {
            let rows = words
                .next()
                .map(|n| n.parse::<usize>())
                .transpose()
                .context("Row count must be a positive number")?;
            ViewerCommand::List(rows)
        }
        "status" | "s" => ViewerCommand::Status,
        "help" | "h" | "?" => ViewerCommand::Help,
        "quit" | "q" | "exit" => ViewerCommand::Quit,
        other => bail!("Unknown command: {} (type 'help')", other),
    };

    if words.next().is_some() {
        bail!("Too many arguments for '{}'", name);
    }

    Ok(Some(command))
}

/// Runs one command against the viewer and returns the text to show.
pub async fn execute_command(command: &ViewerCommand, viewer: &LogViewer, colorize: bool) -> String {
    info!("Executing command: {:?}", command);

    match command {
        ViewerCommand::Reload if viewer.is_loading() => {
            "History is still loading, try again when it finishes".to_string()
        }
        ViewerCommand::Reload => match viewer.reload_history().await {
            Some(count) => format!("Loaded {} history lines", count),
            None => "History reload failed, keeping the current list".to_string(),
        },
        ViewerCommand::Clear => {
            viewer.clear().await;
            "Display cleared".to_string()
        }
        ViewerCommand::List(rows) => {
            let records = viewer.snapshot().await;
            let shown = rows.unwrap_or(records.len()).min(records.len());
            let mut out = render::format_table(records.iter().take(shown), colorize);
            if let Some(span) = render::format_span(&records[..shown]) {
                out.push_str(&span);
            }
            out
        }
        ViewerCommand::Status => render::format_status(
            viewer.is_connected(),
            viewer.is_loading(),
            viewer.len().await,
            viewer.capacity().await,
            viewer.last_message_at().await,
        ),
        ViewerCommand::Help => HELP.to_string(),
        ViewerCommand::Quit => "Closing log viewer".to_string(),
    }
}
