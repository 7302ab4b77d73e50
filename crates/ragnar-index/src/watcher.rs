//! File watcher for automatic re-indexing.
//!
//! Raw notify events are debounced per path, then handed to the
//! [`Indexer`], which coalesces anything that still overlaps a running
//! update for the same file.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify::event::{ModifyKind, RenameMode};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::indexer::{FileOutcome, Indexer};
use crate::languages::{is_ignored_dir, Language};

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Failed to create watcher: {0}")]
    CreateError(String),

    #[error("Failed to watch path: {0}")]
    WatchError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    /// Old path, new path
    Renamed(PathBuf, PathBuf),
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period before a path's events are emitted
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingEvent {
    event: FileEvent,
    last_seen: Instant,
}

pub struct FileWatcher {
    config: WatcherConfig,
    root_path: PathBuf,
    pub(crate) _watcher: Option<RecommendedWatcher>,
}

impl FileWatcher {
    pub fn new(root_path: PathBuf, config: WatcherConfig) -> Self {
        Self {
            config,
            root_path,
            _watcher: None,
        }
    }

    /// Start watching; returns the debounced event stream.
    pub fn start(&mut self) -> Result<mpsc::Receiver<FileEvent>, WatcherError> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<FileEvent>(256);
        let (debounced_tx, debounced_rx) = mpsc::channel(256);
        let debounce = self.config.debounce;
        let root = self.root_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                for file_event in Self::convert_event(event, &root) {
                    let _ = raw_tx.blocking_send(file_event);
                }
            }
            Err(e) => error!(error = %e, "Watch error"),
        })
        .map_err(|e| WatcherError::CreateError(e.to_string()))?;
        watcher
            .watch(&self.root_path, RecursiveMode::Recursive)
            .map_err(|e| WatcherError::WatchError(e.to_string()))?;
        self._watcher = Some(watcher);

        tokio::spawn(async move {
            Self::debounce_events(&mut raw_rx, debounced_tx, debounce).await;
        });

        info!(root = ?self.root_path, ?debounce, "Started watching");
        Ok(debounced_rx)
    }

    async fn debounce_events(
        raw_rx: &mut mpsc::Receiver<FileEvent>,
        debounced_tx: mpsc::Sender<FileEvent>,
        debounce: Duration,
    ) {
        let mut pending: HashMap<PathBuf, PendingEvent> = HashMap::new();
        let tick = Duration::from_millis(50);

        loop {
            match tokio::time::timeout(tick, raw_rx.recv()).await {
                Ok(Some(event)) => {
                    let now = Instant::now();
                    pending
                        .entry(Self::event_path(&event))
                        .and_modify(|p| {
                            p.event = Self::merge_events(&p.event, &event);
                            p.last_seen = now;
                        })
                        .or_insert(PendingEvent { event, last_seen: now });
                }
                Ok(None) => {
                    for (_, p) in pending.drain() {
                        let _ = debounced_tx.send(p.event).await;
                    }
                    break;
                }
                Err(_) => {}
            }

            let now = Instant::now();
            let mut ready = Vec::new();
            pending.retain(|_, p| {
                if now.duration_since(p.last_seen) >= debounce {
                    ready.push(p.event.clone());
                    false
                } else {
                    true
                }
            });
            for event in ready {
                if debounced_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }

    fn event_path(event: &FileEvent) -> PathBuf {
        match event {
            FileEvent::Created(p) | FileEvent::Modified(p) | FileEvent::Deleted(p) => p.clone(),
            FileEvent::Renamed(_, new) => new.clone(),
        }
    }

    /// Delete wins; create absorbs later modifies; the latest rename wins.
    fn merge_events(existing: &FileEvent, new: &FileEvent) -> FileEvent {
        match (existing, new) {
            (_, FileEvent::Deleted(p)) => FileEvent::Deleted(p.clone()),
            (FileEvent::Deleted(p), FileEvent::Modified(_)) => FileEvent::Deleted(p.clone()),
            (FileEvent::Deleted(_), FileEvent::Created(p)) => FileEvent::Modified(p.clone()),
            (FileEvent::Created(p), FileEvent::Modified(_)) => FileEvent::Created(p.clone()),
            (_, FileEvent::Renamed(old, new)) => FileEvent::Renamed(old.clone(), new.clone()),
            (FileEvent::Renamed(old, new), _) => FileEvent::Renamed(old.clone(), new.clone()),
            (_, other) => other.clone(),
        }
    }

    pub fn stop(&mut self) {
        self._watcher = None;
        info!(root = ?self.root_path, "Stopped watching");
    }

    fn convert_event(event: Event, root: &Path) -> Vec<FileEvent> {
        if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
            if let [old, new] = event.paths.as_slice() {
                return match (Self::should_watch(old, root), Self::should_watch(new, root)) {
                    (true, true) => vec![FileEvent::Renamed(old.clone(), new.clone())],
                    (true, false) => vec![FileEvent::Deleted(old.clone())],
                    (false, true) => vec![FileEvent::Created(new.clone())],
                    (false, false) => vec![],
                };
            }
        }

        event
            .paths
            .into_iter()
            .filter(|path| Self::should_watch(path, root))
            .filter_map(|path| match event.kind {
                EventKind::Create(_) => Some(FileEvent::Created(path)),
                EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(FileEvent::Deleted(path)),
                EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(FileEvent::Created(path)),
                EventKind::Modify(_) => Some(FileEvent::Modified(path)),
                EventKind::Remove(_) => Some(FileEvent::Deleted(path)),
                _ => None,
            })
            .collect()
    }

    /// A supported source file outside every ignored directory.
    pub fn should_watch(path: &Path, root: &Path) -> bool {
        if Language::from_path(path).is_none() {
            return false;
        }
        let rel = path.strip_prefix(root).unwrap_or(path);
        let mut dirs = rel.parent().into_iter().flat_map(|p| p.components());
        !dirs.any(|c| match c {
            Component::Normal(name) => is_ignored_dir(&name.to_string_lossy()),
            _ => false,
        })
    }
}

/// Feeds watcher events to an [`Indexer`] until the watcher stops.
pub struct IndexingService {
    watcher: FileWatcher,
    indexer: Indexer,
}

impl IndexingService {
    pub fn new(watcher: FileWatcher, indexer: Indexer) -> Self {
        Self { watcher, indexer }
    }

    /// Start a service watching the indexer's root.
    pub fn for_indexer(indexer: Indexer, config: WatcherConfig) -> Self {
        let watcher = FileWatcher::new(indexer.root().to_path_buf(), config);
        Self::new(watcher, indexer)
    }

    pub async fn run(mut self) -> Result<(), WatcherError> {
        let mut rx = self.watcher.start()?;
        while let Some(event) = rx.recv().await {
            debug!(?event, "File event");
            let paths = match event {
                FileEvent::Created(p) | FileEvent::Modified(p) | FileEvent::Deleted(p) => vec![p],
                FileEvent::Renamed(old, new) => vec![old, new],
            };
            for path in paths {
                let indexer = self.indexer.clone();
                tokio::spawn(async move {
                    match indexer.index_file(&path).await {
                        Ok(FileOutcome::Indexed(summary)) => info!(
                            file = %summary.file_path,
                            dependents = summary.dependents.len(),
                            generation = summary.generation,
                            "Re-indexed"
                        ),
                        Ok(outcome) => debug!(?path, ?outcome, "File event handled"),
                        Err(e) => error!(?path, error = %e, "Failed to index"),
                    }
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_should_watch() {
        let root = Path::new("/repo");
        assert!(FileWatcher::should_watch(Path::new("/repo/src/foo.rs"), root));
        assert!(FileWatcher::should_watch(Path::new("/repo/bar.py"), root));
        assert!(!FileWatcher::should_watch(Path::new("/repo/notes.txt"), root));
        assert!(!FileWatcher::should_watch(Path::new("/repo/node_modules/x.js"), root));
        assert!(!FileWatcher::should_watch(Path::new("/repo/.git/hooks/a.py"), root));
    }

    #[test]
    fn test_merge_events() {
        let path = PathBuf::from("/repo/a.py");
        let created = FileEvent::Created(path.clone());
        let modified = FileEvent::Modified(path.clone());
        let deleted = FileEvent::Deleted(path.clone());

        assert_eq!(FileWatcher::merge_events(&created, &deleted), deleted);
        assert_eq!(FileWatcher::merge_events(&deleted, &modified), deleted);
        assert_eq!(FileWatcher::merge_events(&created, &modified), created);
        assert_eq!(FileWatcher::merge_events(&deleted, &created), modified);
    }

    #[test]
    fn test_rename_event_conversion() {
        let root = Path::new("/repo");
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/repo/a.py"))
            .add_path(PathBuf::from("/repo/b.py"));
        assert_eq!(
            FileWatcher::convert_event(event, root),
            vec![FileEvent::Renamed(PathBuf::from("/repo/a.py"), PathBuf::from("/repo/b.py"))]
        );

        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/repo/a.py"))
            .add_path(PathBuf::from("/repo/a.py.bak"));
        assert_eq!(
            FileWatcher::convert_event(event, root),
            vec![FileEvent::Deleted(PathBuf::from("/repo/a.py"))]
        );
    }

    #[test]
    fn test_event_path() {
        let old = PathBuf::from("/repo/a.py");
        let new = PathBuf::from("/repo/b.py");
        assert_eq!(FileWatcher::event_path(&FileEvent::Deleted(old.clone())), old);
        assert_eq!(FileWatcher::event_path(&FileEvent::Renamed(old, new.clone())), new);
    }

    #[tokio::test]
    async fn test_file_watcher_start_stop() {
        let dir = tempdir().unwrap();
        let mut watcher = FileWatcher::new(dir.path().to_path_buf(), WatcherConfig::default());
        assert!(watcher._watcher.is_none());
        let _rx = watcher.start().unwrap();
        assert!(watcher._watcher.is_some());
        watcher.stop();
        assert!(watcher._watcher.is_none());
    }
}
