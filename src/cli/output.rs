// Output formatting and display for CLI

use crate::engine::EngineEvent;
use crate::search::SearchMatch;
use crate::severity::{classify, SeverityLevel};
use crate::source::{LogLine, LogSource, SourceId};
use crate::sync::{OutOfRange, SyncTarget};
use crate::timestamp::Normalizer;
use colored::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));
    println!("\n{}\n", table);
}

/// Print a rollover chain, oldest file first
pub fn print_chain(files: &[(PathBuf, Option<u64>)]) {
    #[derive(Tabled)]
    struct ChainRow {
        #[tabled(rename = "#")]
        order: usize,
        #[tabled(rename = "File")]
        file: String,
        #[tabled(rename = "Size")]
        size: String,
    }

    let rows: Vec<ChainRow> = files
        .iter()
        .enumerate()
        .map(|(i, (path, size))| ChainRow {
            order: i + 1,
            file: path.display().to_string(),
            size: size.map(format_size).unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    print_table(rows);
    println!(
        "{}",
        format!("Total: {} file(s), newest last", files.len())
            .dimmed()
            .italic()
    );
}

/// Print the log files found by a directory scan
pub fn print_file_list(root: &Path, files: &[PathBuf]) {
    if files.is_empty() {
        println!("{}", format!("No log files under {}", root.display()).yellow());
        return;
    }
    for file in files {
        let shown = file.strip_prefix(root).unwrap_or(file);
        println!("  {}", shown.display().to_string().cyan());
    }
    println!(
        "{}",
        format!("Total: {} file(s)", files.len()).dimmed().italic()
    );
}

/// Print lines of one panel with severity coloring
pub fn print_lines(panel: SourceId, lines: &[LogLine], search: &[SearchMatch]) {
    for line in lines {
        let spans: Vec<(usize, usize)> = search
            .iter()
            .filter(|m| m.source == panel && m.sequence_index == line.sequence_index)
            .map(|m| (m.start, m.end))
            .collect();
        println!(
            "{} {} {}",
            format!("[{}]", panel).blue().bold(),
            format!("{:>6}", line.sequence_index).dimmed(),
            format_line(&line.raw_text, &spans)
        );
    }
}

/// Print what a watcher update changed
pub fn print_event(event: &EngineEvent, source: &LogSource) {
    match event {
        EngineEvent::Appended { lines, .. } => {
            let start = source.len().saturating_sub(*lines);
            print_lines(source.id(), source.lines_in(start..source.len()), &[]);
        }
        EngineEvent::Rotated { source: id } => {
            println!(
                "{}",
                format!(
                    "⟳ Panel {} rotated ({} rolled file(s))",
                    id,
                    source.rolled_count()
                )
                .yellow()
                .bold()
            );
        }
    }
}

/// Print the sync result of every panel
pub fn print_sync_table(
    anchor: (SourceId, u64),
    sources: &[&LogSource],
    targets: &BTreeMap<SourceId, SyncTarget>,
    normalizer: &Normalizer,
) {
    #[derive(Tabled)]
    struct SyncRow {
        #[tabled(rename = "Panel")]
        panel: String,
        #[tabled(rename = "File")]
        file: String,
        #[tabled(rename = "Line")]
        line: String,
        #[tabled(rename = "Timestamp")]
        timestamp: String,
        #[tabled(rename = "Status")]
        status: String,
    }

    let rows: Vec<SyncRow> = sources
        .iter()
        .map(|source| {
            let id = source.id();
            let (sequence_index, status) = if id == anchor.0 {
                (Some(anchor.1), "anchor".cyan().bold().to_string())
            } else {
                match targets.get(&id) {
                    Some(target) => (
                        Some(target.sequence_index),
                        format_out_of_range(target.out_of_range),
                    ),
                    None => (None, "empty".bright_black().to_string()),
                }
            };
            let line = sequence_index.and_then(|seq| source.line(seq));
            SyncRow {
                panel: id.to_string(),
                file: truncate(source.display_name(), 30),
                line: sequence_index
                    .map(|seq| seq.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                timestamp: line
                    .and_then(|l| l.timestamp)
                    .map(|ts| normalizer.display_time(ts))
                    .unwrap_or_else(|| "-".to_string()),
                status,
            }
        })
        .collect();

    print_table(rows);
}

/// Print every match with its line, plus a summary
pub fn print_search_results(pattern: &str, matches: &[SearchMatch], sources: &[&LogSource]) {
    if matches.is_empty() {
        println!("{}", format!("No matches for {:?}", pattern).yellow());
        return;
    }

    let mut last_line = None;
    for m in matches {
        if last_line == Some((m.source, m.sequence_index)) {
            continue;
        }
        last_line = Some((m.source, m.sequence_index));
        let Some(line) = sources
            .iter()
            .find(|s| s.id() == m.source)
            .and_then(|s| s.line(m.sequence_index))
        else {
            continue;
        };
        print_lines(m.source, std::slice::from_ref(line), matches);
    }

    println!(
        "{}",
        format!("Total: {} match(es) for {:?}", matches.len(), pattern)
            .dimmed()
            .italic()
    );
}

/// Byte offset of the `chars`-th character, or None past the end
fn byte_offset(raw: &str, chars: usize) -> Option<usize> {
    raw.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(raw.len()))
        .nth(chars)
}

/// Color a line by severity and highlight search spans (character offsets)
fn format_line(raw: &str, spans: &[(usize, usize)]) -> String {
    let level = classify(raw);
    let mut out = String::new();
    let mut pos = 0;
    for &(start, end) in spans {
        let (Some(start), Some(end)) = (byte_offset(raw, start), byte_offset(raw, end)) else {
            continue;
        };
        if start < pos {
            continue;
        }
        out.push_str(&format_severity_colored(level, &raw[pos..start]));
        out.push_str(&raw[start..end].black().on_yellow().bold().to_string());
        pos = end;
    }
    out.push_str(&format_severity_colored(level, &raw[pos..]));
    out
}

/// Format text with the color of its severity level
fn format_severity_colored(level: Option<SeverityLevel>, text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    match level {
        Some(SeverityLevel::Fatal) => text.white().on_red().bold().to_string(),
        Some(SeverityLevel::Error) => text.red().to_string(),
        Some(SeverityLevel::Warn) => text.yellow().to_string(),
        Some(SeverityLevel::Info) => text.green().to_string(),
        Some(SeverityLevel::Debug) => text.cyan().to_string(),
        Some(SeverityLevel::Trace) => text.bright_black().to_string(),
        None => text.to_string(),
    }
}

fn format_out_of_range(out_of_range: Option<OutOfRange>) -> String {
    match out_of_range {
        None => "synced".green().to_string(),
        Some(OutOfRange::NoTimestamps) => "no timestamps".yellow().to_string(),
        Some(OutOfRange::BeforeStart) => "starts after anchor".yellow().to_string(),
        Some(OutOfRange::AfterEnd) => "ends before anchor".yellow().to_string(),
    }
}

/// Format a file size in human-readable format
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
