use super::{SourceUpdate, TailConfig, TailHandle, TailMessage, WatchMode};
use crate::error::{LogSyncError, Result};
use crate::rollover;
use crate::source::{parse_lines, split_complete_lines, FileIdentity, SourceId, TailStart};
use crate::timestamp::{Instant, Normalizer};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Upper bound on bytes read from the watched file per step
const READ_CHUNK: u64 = 1024 * 1024;

/// Signals forwarded from the notify thread
enum WakeSignal {
    Changed,
    Failed(String),
}

/// Follows the newest file of one source's chain
///
/// The watcher never touches the source itself: appended lines and rotation
/// events are sent as [`TailMessage`]s to the single consumer that owns the
/// source.
pub struct TailWatcher {
    source: SourceId,
    generation: u64,
    path: PathBuf,
    file: Option<File>,
    inode: Option<(u64, u64)>,
    /// Bytes of the current file already read (including `partial`)
    read_pos: u64,
    partial: Vec<u8>,
    next_line_number: u64,
    last_instant: Option<Instant>,
    normalizer: Normalizer,
    config: TailConfig,
    tx: mpsc::UnboundedSender<TailMessage>,
}

impl TailWatcher {
    pub fn new(
        source: SourceId,
        generation: u64,
        start: TailStart,
        normalizer: Normalizer,
        config: TailConfig,
        tx: mpsc::UnboundedSender<TailMessage>,
    ) -> Self {
        Self {
            source,
            generation,
            path: start.path,
            file: None,
            inode: start.identity.inode,
            read_pos: start.offset + start.partial.len() as u64,
            partial: start.partial,
            next_line_number: start.next_line_number,
            last_instant: start.last_instant,
            normalizer,
            config,
            tx,
        }
    }

    /// Spawn the watcher on the tokio runtime
    pub fn spawn(self) -> TailHandle {
        let path = self.path.clone();
        let task = tokio::spawn(self.run());
        TailHandle::new(path, task)
    }

    async fn run(mut self) {
        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel();
        let mut notifier = if self.config.force_polling {
            None
        } else {
            match self.start_notify(wake_tx) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(
                        "Panel {}: {}; polling every {:?}",
                        self.source, e, self.config.poll_interval
                    );
                    None
                }
            }
        };

        let mode = if notifier.is_some() {
            WatchMode::Notify
        } else {
            WatchMode::Poll
        };
        info!(
            "Panel {}: following {} ({})",
            self.source,
            self.path.display(),
            mode
        );

        loop {
            match self.check().await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Panel {}: consumer gone, watcher exiting", self.source);
                    break;
                }
                Err(e) => {
                    // Rotation races and similar; retried on the next wake
                    debug!("Panel {}: transient tail error: {}", self.source, e);
                }
            }

            if notifier.is_some() {
                match wake_rx.recv().await {
                    Some(WakeSignal::Changed) => {
                        while let Ok(WakeSignal::Changed) = wake_rx.try_recv() {}
                    }
                    Some(WakeSignal::Failed(reason)) => {
                        let err = LogSyncError::WatchError(reason);
                        warn!("Panel {}: {}; falling back to polling", self.source, err);
                        notifier = None;
                    }
                    None => {
                        notifier = None;
                    }
                }
            } else {
                sleep(self.config.poll_interval).await;
            }
        }
    }

    /// Watch the directory holding the file so renames and re-creation are seen
    fn start_notify(
        &self,
        wake_tx: mpsc::UnboundedSender<WakeSignal>,
    ) -> Result<RecommendedWatcher> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| LogSyncError::WatchError("watched path has no file name".into()))?;
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let signal = match res {
                Ok(event) => {
                    // Siblings such as `app.log.1` count: rotation renames into them
                    let relevant = event.paths.iter().any(|p| {
                        p.file_name()
                            .map(|n| n.to_string_lossy().starts_with(file_name.as_str()))
                            .unwrap_or(false)
                    });
                    if !relevant {
                        return;
                    }
                    WakeSignal::Changed
                }
                Err(e) => WakeSignal::Failed(e.to_string()),
            };
            let _ = wake_tx.send(signal);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }

    /// Look at the file once: handle rotation, then read whatever was appended
    ///
    /// Returns `Ok(false)` once the consumer is gone.
    pub async fn check(&mut self) -> Result<bool> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            // Renamed away and not yet re-created
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(!self.tx.is_closed()),
            Err(e) => return Err(e.into()),
        };
        let current = FileIdentity::from_metadata(&meta);
        let seen = FileIdentity {
            inode: self.inode,
            len: self.read_pos,
        };

        if seen.is_rotated(&current) {
            if !self.handle_rotation(seen, current).await? {
                return Ok(false);
            }
        }

        self.read_appended().await
    }

    async fn handle_rotation(&mut self, seen: FileIdentity, current: FileIdentity) -> Result<bool> {
        let files = match rollover::discover(&self.path, self.config.max_suffix) {
            Ok(files) => files,
            Err(e) => {
                warn!("Panel {}: could not re-resolve chain: {}", self.source, e);
                vec![self.path.clone()]
            }
        };

        if seen.same_file(&current) {
            info!(
                "Panel {}: {} truncated ({} -> {} bytes)",
                self.source,
                self.path.display(),
                seen.len,
                current.len
            );
        } else {
            info!("Panel {}: {} was rotated", self.source, self.path.display());
            if self.file.is_none() {
                self.reopen_rotated(&files, &seen).await;
            }
            // The old handle still reads the renamed file; collect its tail first
            if self.file.is_some() && !self.read_appended().await? {
                return Ok(false);
            }
        }

        if !self.flush_partial() {
            return Ok(false);
        }

        self.file = None;
        self.inode = current.inode;
        self.read_pos = 0;
        self.next_line_number = 1;

        Ok(self.send(SourceUpdate::Rotated {
            files,
            active: self.path.clone(),
            identity: current,
        }))
    }

    /// Open the file we were following under the name it was rotated to
    ///
    /// Only needed when the rename happened before the first read opened a
    /// handle; without inode numbers the file cannot be recognized.
    async fn reopen_rotated(&mut self, files: &[PathBuf], seen: &FileIdentity) {
        if seen.inode.is_none() {
            return;
        }
        let active = self.path.clone();
        for path in files.iter().filter(|p| **p != active) {
            let Ok(meta) = tokio::fs::metadata(path).await else {
                continue;
            };
            if !seen.same_file(&FileIdentity::from_metadata(&meta)) {
                continue;
            }
            match File::open(path).await {
                Ok(file) => {
                    debug!("Panel {}: draining {}", self.source, path.display());
                    self.file = Some(file);
                }
                Err(e) => warn!(
                    "Panel {}: could not reopen {}: {}",
                    self.source,
                    path.display(),
                    e
                ),
            }
            return;
        }
    }

    /// Read everything appended since the last read, in bounded chunks
    async fn read_appended(&mut self) -> Result<bool> {
        if self.file.is_none() {
            match File::open(&self.path).await {
                Ok(file) => self.file = Some(file),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(!self.tx.is_closed())
                }
                Err(e) => return Err(e.into()),
            }
        }

        loop {
            let Some(file) = self.file.as_mut() else {
                return Ok(true);
            };
            file.seek(SeekFrom::Start(self.read_pos)).await?;
            let mut chunk = Vec::new();
            let n = file.take(READ_CHUNK).read_to_end(&mut chunk).await?;
            if n == 0 {
                return Ok(!self.tx.is_closed());
            }
            self.read_pos += n as u64;
            self.partial.extend_from_slice(&chunk);

            let (raw, consumed) = split_complete_lines(&self.partial);
            self.partial.drain(..consumed);
            if !raw.is_empty() && !self.emit(raw) {
                return Ok(false);
            }
        }
    }

    /// Emit held-back bytes as a final line of the file being left behind
    fn flush_partial(&mut self) -> bool {
        if self.partial.is_empty() {
            return true;
        }
        let text = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        self.emit(vec![text])
    }

    fn emit(&mut self, raw: Vec<String>) -> bool {
        let count = raw.len() as u64;
        let origin: Arc<Path> = Arc::from(self.path.as_path());
        let lines = parse_lines(
            raw,
            &origin,
            self.next_line_number,
            &self.normalizer,
            &mut self.last_instant,
        );
        self.next_line_number += count;
        self.send(SourceUpdate::Appended(lines))
    }

    fn send(&self, update: SourceUpdate) -> bool {
        self.tx
            .send(TailMessage {
                source: self.source,
                generation: self.generation,
                update,
            })
            .is_ok()
    }
}
