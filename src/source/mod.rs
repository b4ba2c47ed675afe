// Source module - One logical log stream backing a panel

mod identity;

pub use identity::FileIdentity;

use crate::error::{LogSyncError, Result};
use crate::rollover;
use crate::timestamp::{Instant, Normalizer};
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Panel slot a source is shown in (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u8);

impl SourceId {
    pub fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single line of a log source
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    /// Position in the merged stream; strictly increasing, never reused
    pub sequence_index: u64,
    /// Line text without its terminator
    pub raw_text: String,
    /// Normalized timestamp, if the line carries one
    pub timestamp: Option<Instant>,
    /// Physical file the line was read from
    pub origin_file: Arc<Path>,
    /// 1-based line number within `origin_file`
    pub origin_line_number: u64,
}

/// A parsed line that has not been assigned a sequence index yet
#[derive(Debug, Clone)]
pub struct PendingLine {
    pub raw_text: String,
    pub timestamp: Option<Instant>,
    pub origin_file: Arc<Path>,
    pub origin_line_number: u64,
}

/// Where live tailing picks up after the initial load
#[derive(Debug, Clone)]
pub struct TailStart {
    /// Newest file of the chain
    pub path: PathBuf,
    /// Bytes already consumed from `path`
    pub offset: u64,
    /// Identity of `path` at load time
    pub identity: FileIdentity,
    /// Unterminated trailing bytes held back until a newline arrives
    pub partial: Vec<u8>,
    /// Line number the next complete line of `path` will have
    pub next_line_number: u64,
    /// Last timestamp seen while loading, for inference continuity
    pub last_instant: Option<Instant>,
}

/// Split a byte buffer into complete lines
///
/// Returns the lines (lossily decoded, `\r\n` tolerated) and the number of
/// bytes consumed; anything after the last `\n` is left for the caller.
pub(crate) fn split_complete_lines(buf: &[u8]) -> (Vec<String>, usize) {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, byte) in buf.iter().enumerate() {
        if *byte == b'\n' {
            let mut end = i;
            if end > start && buf[end - 1] == b'\r' {
                end -= 1;
            }
            lines.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
            start = i + 1;
        }
    }
    (lines, start)
}

/// Run raw lines of one file through the normalizer, threading the previous instant
pub(crate) fn parse_lines(
    raw: Vec<String>,
    origin: &Arc<Path>,
    first_line_number: u64,
    normalizer: &Normalizer,
    last_instant: &mut Option<Instant>,
) -> Vec<PendingLine> {
    raw.into_iter()
        .enumerate()
        .map(|(i, raw_text)| {
            let timestamp = normalizer.parse(&raw_text, *last_instant);
            if timestamp.is_some() {
                *last_instant = timestamp;
            }
            PendingLine {
                raw_text,
                timestamp,
                origin_file: Arc::clone(origin),
                origin_line_number: first_line_number + i as u64,
            }
        })
        .collect()
}

/// The logical, possibly multi-file, stream backing one panel
#[derive(Debug)]
pub struct LogSource {
    id: SourceId,
    /// Distinguishes successive sources opened in the same slot
    generation: u64,
    display_name: String,
    files: Vec<PathBuf>,
    lines: Vec<LogLine>,
    /// Buffer positions of lines that carry a timestamp
    timestamped: Vec<usize>,
    file_states: HashMap<PathBuf, FileIdentity>,
    follow: bool,
    next_sequence: u64,
    last_instant: Option<Instant>,
}

impl LogSource {
    /// Create an empty source over an already resolved chain
    pub fn new(id: SourceId, generation: u64, files: Vec<PathBuf>) -> Self {
        let display_name = files
            .last()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id,
            generation,
            display_name,
            files,
            lines: Vec::new(),
            timestamped: Vec::new(),
            file_states: HashMap::new(),
            follow: false,
            next_sequence: 0,
            last_instant: None,
        }
    }

    /// Resolve the rollover chain of `path` and load every file in order
    ///
    /// # Arguments
    /// * `id` - Panel slot
    /// * `generation` - Unique open counter
    /// * `path` - Any file of the chain
    /// * `normalizer` - Timestamp normalizer
    /// * `max_suffix` - Highest rollover suffix to probe
    ///
    /// # Returns
    /// * `Ok((LogSource, TailStart))` - Loaded source and where tailing resumes
    /// * `Err(LogSyncError)` - The newest file could not be read
    pub async fn load(
        id: SourceId,
        generation: u64,
        path: &Path,
        normalizer: &Normalizer,
        max_suffix: u32,
    ) -> Result<(Self, TailStart)> {
        let files = rollover::discover(path, max_suffix)?;
        let mut source = Self::new(id, generation, files.clone());
        let newest_index = files.len() - 1;
        let mut last_instant = None;
        let mut tail_start = None;

        for (index, file) in files.iter().enumerate() {
            let is_newest = index == newest_index;
            let bytes = match tokio::fs::read(file).await {
                Ok(bytes) => bytes,
                Err(e) if is_newest => return Err(LogSyncError::from_io(e, file)),
                Err(e) => {
                    warn!("Skipping unreadable rollover file {}: {}", file.display(), e);
                    continue;
                }
            };

            let (mut raw, consumed) = split_complete_lines(&bytes);
            let partial = bytes[consumed..].to_vec();
            if !is_newest && !partial.is_empty() {
                // Rotated files are closed; their last line is complete
                raw.push(String::from_utf8_lossy(&partial).into_owned());
            }

            let line_count = raw.len() as u64;
            let origin: Arc<Path> = Arc::from(file.as_path());
            let pending = parse_lines(raw, &origin, 1, normalizer, &mut last_instant);
            source.append(pending);

            match tokio::fs::metadata(file).await {
                Ok(meta) => {
                    let identity = FileIdentity::from_metadata(&meta);
                    source.record_file_state(file.clone(), identity);
                    if is_newest {
                        tail_start = Some(TailStart {
                            path: file.clone(),
                            offset: consumed as u64,
                            identity: FileIdentity {
                                inode: identity.inode,
                                len: bytes.len() as u64,
                            },
                            partial,
                            next_line_number: line_count + 1,
                            last_instant,
                        });
                    }
                }
                Err(e) if is_newest => return Err(LogSyncError::from_io(e, file)),
                Err(_) => {}
            }
        }

        let tail_start = tail_start.ok_or_else(|| LogSyncError::NotFound(path.to_path_buf()))?;

        debug!(
            "Loaded panel {} from {} file(s): {} lines",
            id,
            source.files.len(),
            source.lines.len()
        );

        Ok((source, tail_start))
    }

    /// Append a batch of parsed lines as one step
    ///
    /// Returns the number of lines appended.
    pub fn append(&mut self, batch: Vec<PendingLine>) -> usize {
        let count = batch.len();
        self.lines.reserve(count);
        for pending in batch {
            if let Some(ts) = pending.timestamp {
                self.timestamped.push(self.lines.len());
                self.last_instant = Some(ts);
            }
            self.lines.push(LogLine {
                sequence_index: self.next_sequence,
                raw_text: pending.raw_text,
                timestamp: pending.timestamp,
                origin_file: pending.origin_file,
                origin_line_number: pending.origin_line_number,
            });
            self.next_sequence += 1;
        }
        count
    }

    /// Swap in a re-resolved chain after a rotation; loaded lines are kept as is
    pub fn apply_rotation(&mut self, files: Vec<PathBuf>) {
        self.file_states.retain(|path, _| files.contains(path));
        self.files = files;
    }

    pub fn record_file_state(&mut self, path: PathBuf, identity: FileIdentity) {
        self.file_states.insert(path, identity);
    }

    pub fn file_state(&self, path: &Path) -> Option<&FileIdentity> {
        self.file_states.get(path)
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Chain files, oldest first
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Number of rotated files in front of the active one
    pub fn rolled_count(&self) -> usize {
        self.files.len().saturating_sub(1)
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines for a window of buffer positions, clamped to the buffer
    pub fn lines_in(&self, range: Range<usize>) -> &[LogLine] {
        let end = range.end.min(self.lines.len());
        let start = range.start.min(end);
        &self.lines[start..end]
    }

    /// Buffer position of a sequence index
    pub fn position_of(&self, sequence_index: u64) -> Option<usize> {
        self.lines
            .binary_search_by_key(&sequence_index, |l| l.sequence_index)
            .ok()
    }

    pub fn line(&self, sequence_index: u64) -> Option<&LogLine> {
        self.position_of(sequence_index).map(|pos| &self.lines[pos])
    }

    /// Buffer positions of timestamped lines, in buffer order
    pub fn timestamped_positions(&self) -> &[usize] {
        &self.timestamped
    }

    pub fn last_instant(&self) -> Option<Instant> {
        self.last_instant
    }

    /// Sequence index the next appended line will receive
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn follow(&self) -> bool {
        self.follow
    }

    pub fn set_follow(&mut self, follow: bool) {
        self.follow = follow;
    }

    /// Timestamp of the line at `position`, or of its nearest timestamped neighbor
    ///
    /// Earlier neighbors are preferred; a later one is used only when nothing
    /// before the position has a timestamp.
    pub fn effective_timestamp(&self, position: usize) -> Option<Instant> {
        let k = self.timestamped.partition_point(|&p| p <= position);
        if k > 0 {
            return self.lines[self.timestamped[k - 1]].timestamp;
        }
        self.timestamped
            .first()
            .and_then(|&p| self.lines[p].timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate};
    use std::fs;
    use tempfile::TempDir;

    fn normalizer() -> Normalizer {
        Normalizer::with_reference(
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            FixedOffset::east_opt(0).unwrap(),
        )
    }

    fn pending(text: &str, ts: Option<i64>) -> PendingLine {
        PendingLine {
            raw_text: text.to_string(),
            timestamp: ts.map(|ms| Instant::from_millis(ms, true)),
            origin_file: Arc::from(Path::new("/tmp/x.log")),
            origin_line_number: 1,
        }
    }

    #[test]
    fn test_split_complete_lines() {
        let (lines, consumed) = split_complete_lines(b"one\r\ntwo\nthr");
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(consumed, 9);
    }

    #[test]
    fn test_split_complete_lines_invalid_utf8() {
        let (lines, _) = split_complete_lines(b"ok \xff\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok "));
    }

    #[test]
    fn test_append_assigns_increasing_sequence() {
        let mut source = LogSource::new(SourceId::new(1), 1, vec![PathBuf::from("/tmp/x.log")]);
        source.append(vec![pending("a", Some(1)), pending("b", None)]);
        source.append(vec![pending("c", Some(3))]);

        let seqs: Vec<u64> = source.lines().iter().map(|l| l.sequence_index).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(source.timestamped_positions(), &[0, 2]);
        assert_eq!(source.next_sequence(), 3);
        assert_eq!(source.last_instant().unwrap().millis(), 3);
    }

    #[test]
    fn test_rotation_keeps_lines() {
        let mut source = LogSource::new(SourceId::new(1), 1, vec![PathBuf::from("/tmp/x.log")]);
        source.append(vec![pending("a", None)]);
        source.apply_rotation(vec![PathBuf::from("/tmp/x.log.1"), PathBuf::from("/tmp/x.log")]);
        assert_eq!(source.len(), 1);
        assert_eq!(source.rolled_count(), 1);
        source.append(vec![pending("b", None)]);
        assert_eq!(source.lines()[1].sequence_index, 1);
    }

    #[test]
    fn test_effective_timestamp_uses_neighbors() {
        let mut source = LogSource::new(SourceId::new(1), 1, vec![]);
        source.append(vec![
            pending("no ts", None),
            pending("ts 10", Some(10)),
            pending("cont", None),
        ]);
        assert_eq!(source.effective_timestamp(0).unwrap().millis(), 10);
        assert_eq!(source.effective_timestamp(2).unwrap().millis(), 10);
    }

    #[test]
    fn test_lines_in_clamps() {
        let mut source = LogSource::new(SourceId::new(1), 1, vec![]);
        source.append(vec![pending("a", None), pending("b", None)]);
        assert_eq!(source.lines_in(1..10).len(), 1);
        assert!(source.lines_in(5..10).is_empty());
    }

    #[tokio::test]
    async fn test_load_chain_threads_sequence_and_partial() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("app.log");
        fs::write(
            temp_dir.path().join("app.log.1"),
            "2024-03-01T10:00:00 old one\n2024-03-01T10:00:01 old two",
        )
        .unwrap();
        fs::write(&base, "2024-03-01T10:00:02 new one\n  continuation\npartial").unwrap();

        let (source, tail) = LogSource::load(SourceId::new(2), 7, &base, &normalizer(), 20)
            .await
            .unwrap();

        assert_eq!(source.len(), 4);
        assert_eq!(source.lines()[1].raw_text, "2024-03-01T10:00:01 old two");
        assert_eq!(source.lines()[2].origin_line_number, 1);
        assert!(source.lines()[3].timestamp.is_none());
        assert_eq!(source.display_name(), "app.log");
        assert_eq!(source.generation(), 7);

        assert_eq!(tail.path, base);
        assert_eq!(tail.partial, b"partial".to_vec());
        assert_eq!(tail.next_line_number, 3);
        assert_eq!(tail.offset, "2024-03-01T10:00:02 new one\n  continuation\n".len() as u64);
        assert!(tail.last_instant.is_some());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = LogSource::load(
            SourceId::new(1),
            1,
            &temp_dir.path().join("missing.log"),
            &normalizer(),
            20,
        )
        .await;
        assert!(matches!(result, Err(LogSyncError::NotFound(_))));
    }
}
