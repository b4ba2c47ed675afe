// CLI module - Headless front end for inspecting and following log files

mod output;

pub use output::print_error;

use crate::config::ViewerConfig;
use crate::engine::{EngineEvent, LogEngine};
use crate::error::{LogSyncError, Result};
use crate::rollover;
use crate::search::SearchMatch;
use crate::source::{LogSource, SourceId};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// logsync - Timestamp-synchronized multi-log viewer
#[derive(Parser)]
#[command(name = "logsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the rollover chain a log file belongs to
    Chain {
        /// Any file of the chain
        path: PathBuf,
    },

    /// List log files under a directory
    Scan {
        /// Directory to scan
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Maximum number of files to list
        #[arg(short, long)]
        max: Option<usize>,
    },

    /// Print lines of a log, oldest rollover file first
    Show {
        path: PathBuf,

        /// Number of lines to display
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,

        /// Line (sequence index) to start at; defaults to the last page
        #[arg(short, long)]
        from: Option<usize>,
    },

    /// Align several logs on a line of the first one
    Sync {
        /// Line (sequence index) of the first log to anchor on
        #[arg(short, long)]
        line: u64,

        /// Logs to align; the first one holds the anchor
        #[arg(required = true, num_args = 2..=4)]
        paths: Vec<PathBuf>,

        /// Lines of context printed around each target
        #[arg(short = 'C', long, default_value = "2")]
        context: usize,
    },

    /// Search logs with a regular expression
    Search {
        pattern: String,

        #[arg(required = true, num_args = 1..=4)]
        paths: Vec<PathBuf>,

        /// Ignore case
        #[arg(short, long)]
        ignore_case: bool,
    },

    /// Follow logs as they grow, across rotations
    Tail {
        #[arg(required = true, num_args = 1..=4)]
        paths: Vec<PathBuf>,

        /// Lines of history printed before following
        #[arg(short = 'n', long, default_value = "10")]
        lines: usize,

        /// Only print appended lines matching this pattern
        #[arg(short, long)]
        grep: Option<String>,
    },
}

impl Cli {
    /// Run the CLI application
    pub async fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute().await
    }

    /// Execute the parsed command
    async fn execute(&self) -> Result<()> {
        let config = ViewerConfig::load(self.config.as_deref())?;

        match &self.command {
            Commands::Chain { path } => show_chain(path, &config).await,
            Commands::Scan { dir, max } => {
                let limit = max.unwrap_or(config.scan_max_results);
                let files = rollover::find_log_files(dir, limit);
                output::print_file_list(dir, &files);
                Ok(())
            }
            Commands::Show { path, lines, from } => {
                let mut engine = LogEngine::new(config)?;
                let id = engine.open_source(path).await?;
                let total = engine.source(id)?.len();
                let start = from.unwrap_or_else(|| total.saturating_sub(*lines));
                let shown = engine.get_lines(id, start..start.saturating_add(*lines))?;
                output::print_lines(id, shown, &[]);
                Ok(())
            }
            Commands::Sync {
                line,
                paths,
                context,
            } => sync_logs(config, *line, paths, *context).await,
            Commands::Search {
                pattern,
                paths,
                ignore_case,
            } => {
                let config = ViewerConfig {
                    case_insensitive_search: config.case_insensitive_search || *ignore_case,
                    ..config
                };
                let mut engine = open_all(config, paths).await?;
                let state = engine.set_search(pattern)?;
                let matches = state.matches().to_vec();
                let sources: Vec<&LogSource> = engine.sources().collect();
                output::print_search_results(pattern, &matches, &sources);
                Ok(())
            }
            Commands::Tail { paths, lines, grep } => {
                let config = ViewerConfig {
                    follow_by_default: true,
                    ..config
                };
                tail(config, paths, *lines, grep.as_deref()).await
            }
        }
    }
}

/// Open every path in its own panel, in order
async fn open_all(config: ViewerConfig, paths: &[PathBuf]) -> Result<LogEngine> {
    let mut engine = LogEngine::new(config)?;
    for path in paths {
        engine.open_source(path).await?;
    }
    Ok(engine)
}

async fn show_chain(path: &Path, config: &ViewerConfig) -> Result<()> {
    let files = rollover::discover(path, config.max_rollover_suffix)?;
    let mut rows = Vec::with_capacity(files.len());
    for file in files {
        let size = tokio::fs::metadata(&file).await.ok().map(|m| m.len());
        rows.push((file, size));
    }
    output::print_chain(&rows);
    Ok(())
}

async fn sync_logs(
    config: ViewerConfig,
    line: u64,
    paths: &[PathBuf],
    context: usize,
) -> Result<()> {
    let engine = open_all(config, paths).await?;
    let anchor = SourceId::new(1);
    let targets = engine.request_sync(anchor, line)?;

    let sources: Vec<&LogSource> = engine.sources().collect();
    output::print_sync_table((anchor, line), &sources, &targets, engine.normalizer());

    for source in &sources {
        let seq = if source.id() == anchor {
            line
        } else {
            match targets.get(&source.id()) {
                Some(target) => target.sequence_index,
                None => continue,
            }
        };
        let Some(position) = source.position_of(seq) else {
            continue;
        };
        let start = position.saturating_sub(context);
        output::print_lines(source.id(), source.lines_in(start..position + context + 1), &[]);
        println!();
    }
    Ok(())
}

async fn tail(
    config: ViewerConfig,
    paths: &[PathBuf],
    history: usize,
    grep: Option<&str>,
) -> Result<()> {
    let mut engine = open_all(config, paths).await?;

    for source in engine.sources() {
        let start = source.len().saturating_sub(history);
        output::print_lines(source.id(), source.lines_in(start..source.len()), &[]);
    }

    if let Some(pattern) = grep {
        let count = engine.set_search(pattern)?.len();
        output::print_info(&format!("{} earlier match(es) for {:?}", count, pattern));
    }
    for source in engine.sources() {
        let watched = engine.watched_path(source.id())?;
        output::print_info(&format!("Panel {}: watching {}", source.id(), watched.display()));
    }
    output::print_info(&format!(
        "Following {} log(s), press Ctrl+C to stop",
        engine.source_count()
    ));

    loop {
        tokio::select! {
            event = engine.next_event() => {
                let Some(event) = event else { break };
                print_tail_event(&engine, &event)?;
            }
            result = tokio::signal::ctrl_c() => {
                result.map_err(LogSyncError::Io)?;
                break;
            }
        }
    }

    output::print_success_msg("Stopped following");
    Ok(())
}

/// Print an update; with an active search only new matching lines are shown
fn print_tail_event(engine: &LogEngine, event: &EngineEvent) -> Result<()> {
    let (id, appended) = match event {
        EngineEvent::Appended { source, lines, .. } => (*source, *lines),
        EngineEvent::Rotated { source } => (*source, 0),
    };
    let source = engine.source(id)?;

    let state = match engine.search_state() {
        Some(state) if appended > 0 => state,
        _ => {
            output::print_event(event, source);
            return Ok(());
        }
    };

    let start = source.len().saturating_sub(appended);
    let Some(first_new) = source.lines_in(start..start + 1).first() else {
        return Ok(());
    };
    let fresh: Vec<SearchMatch> = state
        .matches_for(id)
        .iter()
        .filter(|m| m.sequence_index >= first_new.sequence_index)
        .copied()
        .collect();
    if !fresh.is_empty() {
        output::print_search_results(state.pattern(), &fresh, &[source]);
    }
    Ok(())
}
