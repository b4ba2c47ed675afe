// Search module - Regex search across every open source

use crate::error::Result;
use crate::source::{LogSource, SourceId};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use tracing::debug;

/// A single regex hit
///
/// The derived ordering (source, line, span) is the order `next`/`previous`
/// walk. Spans count characters (Unicode scalar values) of the line's
/// `raw_text`, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SearchMatch {
    pub source: SourceId,
    pub sequence_index: u64,
    pub start: usize,
    pub end: usize,
}

/// Options applied when compiling a pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub case_insensitive: bool,
}

/// How far a source has been scanned
#[derive(Debug, Clone, Copy)]
struct ScanMark {
    generation: u64,
    next_sequence: u64,
}

/// Result of the active search
#[derive(Debug, Clone)]
pub struct SearchState {
    pattern: String,
    options: SearchOptions,
    regex: Regex,
    matches: Vec<SearchMatch>,
    cursor: Option<usize>,
    scanned: BTreeMap<SourceId, ScanMark>,
}

impl SearchState {
    fn new(pattern: &str, options: SearchOptions) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(options.case_insensitive)
            .build()?;
        Ok(Self {
            pattern: pattern.to_string(),
            options,
            regex,
            matches: Vec::new(),
            cursor: None,
            scanned: BTreeMap::new(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn options(&self) -> SearchOptions {
        self.options
    }

    /// Every match in navigation order
    pub fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Index of the current match; `Some` whenever there are matches
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&SearchMatch> {
        self.cursor.and_then(|c| self.matches.get(c))
    }

    /// 1-based position of the cursor and the total, for status text
    pub fn position(&self) -> Option<(usize, usize)> {
        self.cursor.map(|c| (c + 1, self.matches.len()))
    }

    /// Matches of one source
    pub fn matches_for(&self, source: SourceId) -> &[SearchMatch] {
        let start = self.matches.partition_point(|m| m.source < source);
        let end = self.matches.partition_point(|m| m.source <= source);
        &self.matches[start..end]
    }

    /// Byte spans to highlight on one line
    pub fn spans_on_line(&self, source: SourceId, sequence_index: u64) -> Vec<(usize, usize)> {
        let of_source = self.matches_for(source);
        let start = of_source.partition_point(|m| m.sequence_index < sequence_index);
        of_source[start..]
            .iter()
            .take_while(|m| m.sequence_index == sequence_index)
            .map(|m| (m.start, m.end))
            .collect()
    }

    pub fn next(&mut self) -> Option<&SearchMatch> {
        let len = self.matches.len();
        if len == 0 {
            return None;
        }
        self.cursor = Some(self.cursor.map_or(0, |c| (c + 1) % len));
        self.current()
    }

    pub fn previous(&mut self) -> Option<&SearchMatch> {
        let len = self.matches.len();
        if len == 0 {
            return None;
        }
        self.cursor = Some(self.cursor.map_or(len - 1, |c| (c + len - 1) % len));
        self.current()
    }

    /// Scan lines not seen yet and merge their matches in order
    ///
    /// Sources that were closed, or reopened under a new generation, lose
    /// their old matches. The cursor stays on the same match when it still
    /// exists and falls back to the first match otherwise.
    ///
    /// Returns the number of matches added.
    pub fn refresh<'a, I>(&mut self, sources: I) -> usize
    where
        I: IntoIterator<Item = &'a LogSource>,
    {
        let sources: Vec<&LogSource> = sources.into_iter().collect();
        let current = self.current().copied();

        let stale: Vec<SourceId> = self
            .scanned
            .iter()
            .filter(|(id, mark)| {
                !sources
                    .iter()
                    .any(|s| s.id() == **id && s.generation() == mark.generation)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.scanned.remove(&id);
            self.matches.retain(|m| m.source != id);
        }

        let mut added = 0;
        for source in sources {
            let from = self
                .scanned
                .get(&source.id())
                .map_or(0, |mark| mark.next_sequence);
            let found = self.scan(source, from);
            added += found.len();

            let at = self.matches.partition_point(|m| m.source <= source.id());
            self.matches.splice(at..at, found);
            self.scanned.insert(
                source.id(),
                ScanMark {
                    generation: source.generation(),
                    next_sequence: source.next_sequence(),
                },
            );
        }

        self.cursor = match current {
            _ if self.matches.is_empty() => None,
            Some(m) => Some(self.matches.binary_search(&m).unwrap_or(0)),
            None => Some(0),
        };

        added
    }

    /// Matches in lines with a sequence index of at least `from`
    fn scan(&self, source: &LogSource, from: u64) -> Vec<SearchMatch> {
        let lines = source.lines();
        let start = lines.partition_point(|l| l.sequence_index < from);
        let mut found = Vec::new();
        for line in &lines[start..] {
            let text = line.raw_text.as_str();
            let (mut byte_pos, mut char_pos) = (0, 0);
            for m in self.regex.find_iter(text) {
                // Zero-width hits carry nothing to show or jump between
                if m.start() == m.end() {
                    continue;
                }
                let start = char_pos + text[byte_pos..m.start()].chars().count();
                let end = start + m.as_str().chars().count();
                (byte_pos, char_pos) = (m.end(), end);
                found.push(SearchMatch {
                    source: source.id(),
                    sequence_index: line.sequence_index,
                    start,
                    end,
                });
            }
        }
        found
    }
}

/// Holds the active search and applies pattern changes
#[derive(Debug, Default)]
pub struct SearchEngine {
    options: SearchOptions,
    state: Option<SearchState>,
}

impl SearchEngine {
    pub fn new(options: SearchOptions) -> Self {
        Self {
            options,
            state: None,
        }
    }

    pub fn options(&self) -> SearchOptions {
        self.options
    }

    pub fn set_options(&mut self, options: SearchOptions) {
        self.options = options;
    }

    /// Compile `pattern` and scan every source
    ///
    /// # Returns
    /// * `Ok(&SearchState)` - The new search state
    /// * `Err(LogSyncError::PatternError)` - Invalid pattern; the previous state is kept
    pub fn search<'a, I>(&mut self, pattern: &str, sources: I) -> Result<&SearchState>
    where
        I: IntoIterator<Item = &'a LogSource>,
    {
        let mut state = SearchState::new(pattern, self.options)?;

        // Re-running the same search keeps the cursor on the same match
        let carried = self
            .state
            .as_ref()
            .filter(|previous| previous.pattern == pattern && previous.options == self.options)
            .and_then(|previous| previous.current().copied());
        state.refresh(sources);
        if let Some(m) = carried {
            if let Ok(i) = state.matches.binary_search(&m) {
                state.cursor = Some(i);
            }
        }

        debug!(
            "Search {:?}: {} match(es) in {} source(s)",
            pattern,
            state.matches.len(),
            state.scanned.len()
        );

        Ok(self.state.insert(state))
    }

    /// Pick up lines appended since the last scan
    pub fn refresh<'a, I>(&mut self, sources: I) -> usize
    where
        I: IntoIterator<Item = &'a LogSource>,
    {
        self.state.as_mut().map_or(0, |state| state.refresh(sources))
    }

    pub fn state(&self) -> Option<&SearchState> {
        self.state.as_ref()
    }

    pub fn next(&mut self) -> Option<&SearchMatch> {
        self.state.as_mut().and_then(|state| state.next())
    }

    pub fn previous(&mut self) -> Option<&SearchMatch> {
        self.state.as_mut().and_then(|state| state.previous())
    }

    pub fn clear(&mut self) {
        self.state = None;
    }
}
