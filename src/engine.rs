// Engine module - Owns every open source and serves the viewer operations

use crate::config::ViewerConfig;
use crate::error::{LogSyncError, Result};
use crate::perf_time;
use crate::search::{SearchEngine, SearchMatch, SearchState};
use crate::source::{LogLine, LogSource, SourceId};
use crate::sync::{sync_targets, SyncAnchor, SyncTarget};
use crate::tail::{SourceUpdate, TailHandle, TailMessage, TailWatcher};
use crate::timestamp::Normalizer;
use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Lines scanned from the top of a panel when looking for a sync anchor
pub const DEFAULT_SYNC_WINDOW: usize = 20;

/// Notification for the UI layer after a watcher update was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Lines were appended; `scroll_to_bottom` is set when the source follows
    Appended {
        source: SourceId,
        lines: usize,
        scroll_to_bottom: bool,
    },
    /// The followed file was rotated and the chain re-resolved
    Rotated { source: SourceId },
}

/// An open panel: its source and the watcher feeding it
struct Slot {
    source: LogSource,
    tail: TailHandle,
}

/// Facade over sources, watchers, sync and search
///
/// Watchers run as separate tasks and only send messages; every mutation
/// of a source happens here, one message at a time, so readers always see
/// a batch either fully applied or not at all.
pub struct LogEngine {
    config: ViewerConfig,
    normalizer: Normalizer,
    slots: BTreeMap<SourceId, Slot>,
    next_generation: u64,
    tx: mpsc::UnboundedSender<TailMessage>,
    rx: mpsc::UnboundedReceiver<TailMessage>,
    search: SearchEngine,
}

impl LogEngine {
    /// Create an engine after validating `config`
    pub fn new(config: ViewerConfig) -> Result<Self> {
        config.validate()?;
        let normalizer = Normalizer::new(config.assume_utc);
        Ok(Self::with_normalizer(config, normalizer))
    }

    /// Create an engine with a fixed normalizer reference
    pub fn with_normalizer(config: ViewerConfig, normalizer: Normalizer) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let search = SearchEngine::new(config.search_options());
        Self {
            config,
            normalizer,
            slots: BTreeMap::new(),
            next_generation: 1,
            tx,
            rx,
            search,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Open `path` in the lowest free panel
    ///
    /// # Arguments
    /// * `path` - Any file of a rollover chain
    ///
    /// # Returns
    /// * `Ok(SourceId)` - Panel the source was opened in
    /// * `Err(LogSyncError::TooManySources)` - Every panel is taken
    /// * `Err(LogSyncError::NotFound | PermissionDenied)` - The file cannot be read
    pub async fn open_source(&mut self, path: &Path) -> Result<SourceId> {
        let id = (1..=self.config.max_sources)
            .map(|n| SourceId::new(n as u8))
            .find(|id| !self.slots.contains_key(id))
            .ok_or(LogSyncError::TooManySources(self.config.max_sources))?;
        self.open_source_in_slot(id, path).await
    }

    /// Open `path` in a specific panel, replacing whatever it showed
    pub async fn open_source_in_slot(&mut self, id: SourceId, path: &Path) -> Result<SourceId> {
        if id.as_u8() == 0 || id.as_u8() as usize > self.config.max_sources {
            return Err(LogSyncError::UnknownSource(id));
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let timer = perf_time!("load");
        let (mut source, start) = LogSource::load(
            id,
            generation,
            path,
            &self.normalizer,
            self.config.max_rollover_suffix,
        )
        .await?;
        timer.stop(source.len());

        source.set_follow(self.config.follow_by_default);
        let tail = TailWatcher::new(
            id,
            generation,
            start,
            self.normalizer,
            self.config.tail_config(),
            self.tx.clone(),
        )
        .spawn();

        info!(
            "Opened {} in panel {} ({} lines, {} rolled file(s))",
            path.display(),
            id,
            source.len(),
            source.rolled_count()
        );

        if let Some(previous) = self.slots.insert(id, Slot { source, tail }) {
            debug!("Panel {}: replaced {}", id, previous.source.display_name());
        }
        self.refresh_search();

        Ok(id)
    }

    /// Close a panel; its watcher stops and queued updates are discarded
    pub fn close_source(&mut self, id: SourceId) -> Result<()> {
        let slot = self
            .slots
            .remove(&id)
            .ok_or(LogSyncError::UnknownSource(id))?;
        slot.tail.stop();
        info!("Closed panel {} ({})", id, slot.source.display_name());
        self.refresh_search();
        Ok(())
    }

    pub fn source(&self, id: SourceId) -> Result<&LogSource> {
        self.slots
            .get(&id)
            .map(|slot| &slot.source)
            .ok_or(LogSyncError::UnknownSource(id))
    }

    /// Open sources in panel order
    pub fn sources(&self) -> impl Iterator<Item = &LogSource> {
        self.slots.values().map(|slot| &slot.source)
    }

    pub fn source_count(&self) -> usize {
        self.slots.len()
    }

    /// File the panel's watcher is following
    pub fn watched_path(&self, id: SourceId) -> Result<PathBuf> {
        self.slots
            .get(&id)
            .map(|slot| slot.tail.path().clone())
            .ok_or(LogSyncError::UnknownSource(id))
    }

    /// Lines for a visible window of buffer positions
    pub fn get_lines(&self, id: SourceId, range: Range<usize>) -> Result<&[LogLine]> {
        Ok(self.source(id)?.lines_in(range))
    }

    pub fn set_follow(&mut self, id: SourceId, follow: bool) -> Result<()> {
        let slot = self
            .slots
            .get_mut(&id)
            .ok_or(LogSyncError::UnknownSource(id))?;
        slot.source.set_follow(follow);
        Ok(())
    }

    /// Align every other panel to a line of the anchor panel
    ///
    /// # Arguments
    /// * `anchor_source` - Panel the user synced from
    /// * `sequence_index` - Anchor line
    ///
    /// # Returns
    /// * `Ok(BTreeMap)` - Target line per other non-empty panel, flagged when clamped
    /// * `Err(LogSyncError)` - Unknown panel or line, or no timestamp near the anchor
    pub fn request_sync(
        &self,
        anchor_source: SourceId,
        sequence_index: u64,
    ) -> Result<BTreeMap<SourceId, SyncTarget>> {
        let timer = perf_time!("sync");
        let anchor = SyncAnchor::from_line(self.source(anchor_source)?, sequence_index)?;
        let targets = sync_targets(&anchor, self.sources());
        timer.stop(targets.len());

        debug!(
            "Sync from panel {} line {} at {}",
            anchor_source,
            sequence_index,
            self.normalizer.display_time(anchor.timestamp)
        );
        Ok(targets)
    }

    /// First timestamped line in a window starting at buffer position `first_visible`
    ///
    /// Returns the sequence index to anchor a sync on, if any line in the
    /// window has a timestamp.
    pub fn anchor_from_window(
        &self,
        id: SourceId,
        first_visible: usize,
        window: usize,
    ) -> Result<Option<u64>> {
        let source = self.source(id)?;
        let end = first_visible.saturating_add(window);
        Ok(source
            .lines_in(first_visible..end)
            .iter()
            .find(|line| line.timestamp.is_some())
            .map(|line| line.sequence_index))
    }

    /// Compile `pattern` and search every open panel
    pub fn set_search(&mut self, pattern: &str) -> Result<&SearchState> {
        let timer = perf_time!("search");
        let sources = self.slots.values().map(|slot| &slot.source);
        let state = self.search.search(pattern, sources)?;
        timer.stop(state.len());
        Ok(state)
    }

    pub fn search_state(&self) -> Option<&SearchState> {
        self.search.state()
    }

    pub fn next_match(&mut self) -> Option<SearchMatch> {
        self.search.next().copied()
    }

    pub fn previous_match(&mut self) -> Option<SearchMatch> {
        self.search.previous().copied()
    }

    pub fn clear_search(&mut self) {
        self.search.clear();
    }

    /// Wait for the next watcher update and apply it
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        loop {
            let message = self.rx.recv().await?;
            if let Some(event) = self.apply(message) {
                return Some(event);
            }
        }
    }

    /// Apply every update already queued, without waiting
    pub fn drain_pending(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            if let Some(event) = self.apply(message) {
                events.push(event);
            }
        }
        events
    }

    fn apply(&mut self, message: TailMessage) -> Option<EngineEvent> {
        let id = message.source;
        let Some(slot) = self
            .slots
            .get_mut(&id)
            .filter(|slot| slot.source.generation() == message.generation)
        else {
            debug!("Discarding stale update for panel {}", id);
            return None;
        };

        let event = match message.update {
            SourceUpdate::Appended(batch) => {
                let lines = slot.source.append(batch);
                if lines == 0 {
                    return None;
                }
                EngineEvent::Appended {
                    source: id,
                    lines,
                    scroll_to_bottom: slot.source.follow(),
                }
            }
            SourceUpdate::Rotated {
                files,
                active,
                identity,
            } => {
                info!(
                    "Panel {}: {} rotated, chain now {} file(s)",
                    id,
                    active.display(),
                    files.len()
                );
                slot.source.apply_rotation(files);
                slot.source.record_file_state(active, identity);
                EngineEvent::Rotated { source: id }
            }
        };

        self.refresh_search();
        Some(event)
    }

    fn refresh_search(&mut self) {
        let added = self
            .search
            .refresh(self.slots.values().map(|slot| &slot.source));
        if added > 0 {
            debug!("Search picked up {} new match(es)", added);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FileIdentity, PendingLine};
    use chrono::{FixedOffset, NaiveDate};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn engine() -> LogEngine {
        let config = ViewerConfig {
            force_polling: true,
            poll_interval_ms: 20,
            ..ViewerConfig::default()
        };
        let normalizer = Normalizer::with_reference(
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            FixedOffset::east_opt(0).unwrap(),
        );
        LogEngine::with_normalizer(config, normalizer)
    }

    fn write_log(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn pending(text: &str) -> PendingLine {
        PendingLine {
            raw_text: text.to_string(),
            timestamp: None,
            origin_file: Arc::from(Path::new("/tmp/x.log")),
            origin_line_number: 1,
        }
    }

    #[tokio::test]
    async fn test_open_uses_lowest_free_slot() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine();
        let a = write_log(&temp_dir, "a.log", "one\n");
        let b = write_log(&temp_dir, "b.log", "two\n");

        assert_eq!(engine.open_source(&a).await.unwrap(), SourceId::new(1));
        assert_eq!(engine.open_source(&b).await.unwrap(), SourceId::new(2));
        engine.close_source(SourceId::new(1)).unwrap();
        assert_eq!(engine.open_source(&b).await.unwrap(), SourceId::new(1));
        assert_eq!(engine.source_count(), 2);
    }

    #[tokio::test]
    async fn test_too_many_sources() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine();
        let path = write_log(&temp_dir, "a.log", "one\n");
        for _ in 0..4 {
            engine.open_source(&path).await.unwrap();
        }

        let result = engine.open_source(&path).await;
        assert!(matches!(result, Err(LogSyncError::TooManySources(4))));
        assert!(result.unwrap_err().is_open_error());
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine();
        let result = engine.open_source(&temp_dir.path().join("nope.log")).await;
        assert!(matches!(result, Err(LogSyncError::NotFound(_))));
        assert_eq!(engine.source_count(), 0);
    }

    #[tokio::test]
    async fn test_slot_out_of_range() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine();
        let path = write_log(&temp_dir, "a.log", "one\n");
        let result = engine.open_source_in_slot(SourceId::new(5), &path).await;
        assert!(matches!(result, Err(LogSyncError::UnknownSource(_))));
    }

    #[tokio::test]
    async fn test_get_lines_and_unknown_source() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine();
        let path = write_log(&temp_dir, "a.log", "one\ntwo\nthree\n");
        let id = engine.open_source(&path).await.unwrap();

        let lines = engine.get_lines(id, 1..3).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].raw_text, "two");

        assert!(matches!(
            engine.get_lines(SourceId::new(3), 0..1),
            Err(LogSyncError::UnknownSource(_))
        ));
        assert!(engine.close_source(SourceId::new(3)).is_err());
    }

    #[tokio::test]
    async fn test_request_sync_between_panels() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine();
        let a = write_log(
            &temp_dir,
            "a.log",
            "2024-03-15T10:00:00 a0\n2024-03-15T10:00:05 a1\n",
        );
        let b = write_log(
            &temp_dir,
            "b.log",
            "2024-03-15T09:59:59 b0\n2024-03-15T10:00:03 b1\n2024-03-15T10:00:07 b2\n",
        );
        let a_id = engine.open_source(&a).await.unwrap();
        let b_id = engine.open_source(&b).await.unwrap();

        let targets = engine.request_sync(a_id, 1).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[&b_id].sequence_index, 1);
        assert!(!targets[&b_id].is_out_of_range());

        assert_eq!(engine.anchor_from_window(a_id, 0, DEFAULT_SYNC_WINDOW).unwrap(), Some(0));
        assert!(matches!(
            engine.request_sync(a_id, 42),
            Err(LogSyncError::LineNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_anchor_from_window_skips_untimestamped() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine();
        let path = write_log(&temp_dir, "a.log", "plain\nplain\n10:00:00 stamped\n");
        let id = engine.open_source(&path).await.unwrap();

        assert_eq!(engine.anchor_from_window(id, 0, 20).unwrap(), Some(2));
        assert_eq!(engine.anchor_from_window(id, 0, 2).unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_updates_discarded() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine();
        let path = write_log(&temp_dir, "a.log", "one\n");
        let id = engine.open_source(&path).await.unwrap();
        let old_generation = engine.source(id).unwrap().generation();

        engine.open_source_in_slot(id, &path).await.unwrap();
        engine
            .tx
            .send(TailMessage {
                source: id,
                generation: old_generation,
                update: SourceUpdate::Appended(vec![pending("late")]),
            })
            .unwrap();

        assert!(engine.drain_pending().is_empty());
        assert_eq!(engine.source(id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_follow_controls_scroll_notification() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine();
        let path = write_log(&temp_dir, "a.log", "one\n");
        let id = engine.open_source(&path).await.unwrap();
        let generation = engine.source(id).unwrap().generation();

        let send = |engine: &LogEngine, text: &str| {
            engine
                .tx
                .send(TailMessage {
                    source: id,
                    generation,
                    update: SourceUpdate::Appended(vec![pending(text)]),
                })
                .unwrap();
        };

        send(&engine, "quiet");
        assert_eq!(
            engine.drain_pending(),
            vec![EngineEvent::Appended {
                source: id,
                lines: 1,
                scroll_to_bottom: false
            }]
        );

        engine.set_follow(id, true).unwrap();
        send(&engine, "loud");
        assert_eq!(
            engine.drain_pending(),
            vec![EngineEvent::Appended {
                source: id,
                lines: 1,
                scroll_to_bottom: true
            }]
        );
        assert_eq!(engine.source(id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rotation_event_swaps_chain() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine();
        let path = write_log(&temp_dir, "app.log", "one\n");
        let id = engine.open_source(&path).await.unwrap();
        let generation = engine.source(id).unwrap().generation();

        let rotated = temp_dir.path().join("app.log.1");
        engine
            .tx
            .send(TailMessage {
                source: id,
                generation,
                update: SourceUpdate::Rotated {
                    files: vec![rotated.clone(), path.clone()],
                    active: path.clone(),
                    identity: FileIdentity { inode: None, len: 0 },
                },
            })
            .unwrap();

        assert_eq!(engine.drain_pending(), vec![EngineEvent::Rotated { source: id }]);
        let source = engine.source(id).unwrap();
        assert_eq!(source.files(), &[rotated, path]);
        assert_eq!(source.len(), 1);
    }

    #[tokio::test]
    async fn test_search_follows_appends_and_closes() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine();
        let a = write_log(&temp_dir, "a.log", "error a\n");
        let b = write_log(&temp_dir, "b.log", "fine\n");
        let a_id = engine.open_source(&a).await.unwrap();
        let b_id = engine.open_source(&b).await.unwrap();

        assert_eq!(engine.set_search("error").unwrap().len(), 1);
        assert!(matches!(
            engine.set_search("("),
            Err(LogSyncError::PatternError(_))
        ));
        assert_eq!(engine.search_state().unwrap().pattern(), "error");

        let generation = engine.source(b_id).unwrap().generation();
        engine
            .tx
            .send(TailMessage {
                source: b_id,
                generation,
                update: SourceUpdate::Appended(vec![pending("error b")]),
            })
            .unwrap();
        engine.drain_pending();
        assert_eq!(engine.search_state().unwrap().len(), 2);

        assert_eq!(engine.next_match().unwrap().source, b_id);
        assert_eq!(engine.next_match().unwrap().source, a_id);

        engine.close_source(b_id).unwrap();
        assert_eq!(engine.search_state().unwrap().len(), 1);

        engine.clear_search();
        assert!(engine.search_state().is_none());
        assert!(engine.next_match().is_none());
    }
}
