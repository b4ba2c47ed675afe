use logsync::config::ViewerConfig;
use logsync::error::LogSyncError;
use logsync::source::SourceId;
use logsync::LogEngine;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_log(dir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.path().join(name);
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(&path, content).unwrap();
    path
}

fn engine(case_insensitive: bool) -> LogEngine {
    LogEngine::new(ViewerConfig {
        force_polling: true,
        case_insensitive_search: case_insensitive,
        ..ViewerConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_matches_ordered_by_panel_then_line_and_wrap() {
    let temp_dir = TempDir::new().unwrap();
    let first = write_log(
        &temp_dir,
        "first.log",
        &["ok", "ok", "ok", "ok", "ok", "disk error"],
    );
    let second = write_log(&temp_dir, "second.log", &["ok", "ok", "ok", "error again"]);

    let mut engine = engine(false);
    engine.open_source(&first).await.unwrap();
    engine.open_source(&second).await.unwrap();

    let state = engine.set_search("error").unwrap();
    let order: Vec<(u8, u64)> = state
        .matches()
        .iter()
        .map(|m| (m.source.as_u8(), m.sequence_index))
        .collect();
    assert_eq!(order, vec![(1, 5), (2, 3)]);
    assert_eq!(state.position(), Some((1, 2)));

    let last = engine.next_match().unwrap();
    assert_eq!((last.source, last.sequence_index), (SourceId::new(2), 3));

    let wrapped = engine.next_match().unwrap();
    assert_eq!((wrapped.source, wrapped.sequence_index), (SourceId::new(1), 5));

    let back = engine.previous_match().unwrap();
    assert_eq!(back.source, SourceId::new(2));
}

#[tokio::test]
async fn test_spans_count_characters() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_log(&temp_dir, "a.log", &["café error", "error error"]);

    let mut engine = engine(false);
    engine.open_source(&path).await.unwrap();
    let state = engine.set_search("error").unwrap();

    let spans: Vec<(u64, usize, usize)> = state
        .matches()
        .iter()
        .map(|m| (m.sequence_index, m.start, m.end))
        .collect();
    assert_eq!(spans, vec![(0, 5, 10), (1, 0, 5), (1, 6, 11)]);
}

#[tokio::test]
async fn test_case_insensitive_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_log(&temp_dir, "a.log", &["ERROR", "Error", "error"]);

    let mut sensitive = engine(false);
    sensitive.open_source(&path).await.unwrap();
    assert_eq!(sensitive.set_search("error").unwrap().len(), 1);

    let mut insensitive = engine(true);
    insensitive.open_source(&path).await.unwrap();
    assert_eq!(insensitive.set_search("error").unwrap().len(), 3);
}

#[tokio::test]
async fn test_invalid_pattern_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_log(&temp_dir, "a.log", &["error"]);

    let mut engine = engine(false);
    engine.open_source(&path).await.unwrap();
    engine.set_search("err(or)?").unwrap();

    let result = engine.set_search("[unclosed");
    assert!(matches!(result, Err(LogSyncError::PatternError(_))));
    assert_eq!(engine.search_state().unwrap().pattern(), "err(or)?");
    assert_eq!(engine.search_state().unwrap().len(), 1);
}
