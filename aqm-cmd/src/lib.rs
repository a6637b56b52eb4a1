//! Command implementations for the AQM CLI.
//!
//! Every subcommand builds one [`context::MonitoringContext`], lets the
//! sources settle and reads the derived views it needs.

use clap::Subcommand;
use std::path::PathBuf;
use std::time::Duration;

pub mod context;
pub mod export;
pub mod options;
pub mod report;

pub use context::{MonitoringContext, Selection, View};
pub use options::SourceOptions;

#[derive(Subcommand)]
pub enum Command {
    /// Load every source once and print the status summary
    Status {
        #[command(flatten)]
        sources: SourceOptions,
    },

    /// Write one map view as GeoJSON
    Geojson {
        /// View to export
        #[arg(short, long, value_enum)]
        view: View,

        /// Last day of the monitor window (YYYY-MM-DD, default today UTC)
        #[arg(short, long, value_parser = parse_date)]
        date: Option<chrono::NaiveDate>,

        /// Days of monitor data ending on --date; 0 disables windowing
        #[arg(short, long, default_value_t = aqm_feeds::window::DEFAULT_LOOKBACK_DAYS)]
        lookback_days: u32,

        /// Entity ids to leave out
        #[arg(short = 'x', long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Output path; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        sources: SourceOptions,
    },

    /// Reload the reloadable sources periodically and print status changes
    Watch {
        /// Seconds between reloads
        #[arg(short, long, default_value_t = 300)]
        interval_secs: u64,

        /// Stop after this many cycles; 0 runs until interrupted
        #[arg(short, long, default_value_t = 0)]
        cycles: u32,

        #[command(flatten)]
        sources: SourceOptions,
    },
}

fn parse_date(s: &str) -> Result<chrono::NaiveDate, String> {
    aqm_utils::dates::parse_date(s).map_err(|e| format!("invalid date {:?}: {}", s, e))
}

/// Run a command. The reactive context is single-threaded, so everything
/// runs on a local task set.
pub async fn run(command: Command) -> anyhow::Result<()> {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            match command {
                Command::Status { sources } => report::run_status(&sources).await,
                Command::Geojson {
                    view,
                    date,
                    lookback_days,
                    exclude,
                    output,
                    sources,
                } => {
                    let mut selection = Selection {
                        lookback_days,
                        excluded_ids: exclude.into_iter().collect(),
                        ..Selection::default()
                    };
                    if let Some(date) = date {
                        selection.date = date;
                    }
                    export::run_geojson(&sources, view, selection, output.as_deref()).await
                }
                Command::Watch {
                    interval_secs,
                    cycles,
                    sources,
                } => report::run_watch(&sources, Duration::from_secs(interval_secs), cycles).await,
            }
        })
        .await
}
