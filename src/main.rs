mod commands;
mod config;
mod error;
mod history;
mod live_feed;
mod log_buffer;
mod log_entry;
mod render;
mod session;
mod stomp;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use session::{LogViewer, ViewEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .context("Failed to initialise logging")?;

    info!("Starting admin-log-viewer");

    // Parse command-line arguments
    let cli = config::Cli::parse();

    // Load configuration
    let config = config::load_config(&cli)?;
    info!("Configuration loaded successfully");
    info!("History from {}, live feed from {}", config.history_url(), config.live_feed_url());

    let viewer = LogViewer::mount(&config);

    // Print live records and connection changes as they happen
    let render_handle = {
        let events = viewer.subscribe_events();
        let follow = config.follow;
        let colorize = config.color;
        tokio::spawn(async move { render_events(events, follow, colorize).await })
    };

    println!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                };

                match commands::parse_command(&line) {
                    Ok(Some(commands::ViewerCommand::Quit)) => break,
                    Ok(Some(command)) => {
                        println!("{}", commands::execute_command(&command, &viewer, config.color).await);
                    }
                    Ok(None) => {}
                    Err(e) => println!("{:#}", e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    viewer.unmount().await;
    render_handle.abort();

    Ok(())
}

async fn render_events(mut events: broadcast::Receiver<ViewEvent>, follow: bool, colorize: bool) {
    loop {
        match events.recv().await {
            Ok(ViewEvent::Record(record)) => {
                if follow {
                    println!("{}", render::format_record(&record, colorize));
                }
            }
            Ok(ViewEvent::HistoryLoaded(count)) => {
                println!("-- {} history lines loaded (type 'list' to show them)", count);
            }
            Ok(ViewEvent::Connection(connected)) => {
                println!("-- live feed {}", if connected { "connected" } else { "disconnected" });
            }
            Ok(ViewEvent::Cleared) => println!("-- display cleared"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Renderer fell behind, {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
