//! Adapter from `notify` filesystem events to coordinator change events.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::WatchConfig;
use crate::error::LiveError;
use crate::names::canonical_path;
use crate::reload::{ChangeEvent, ChangeKind, ChangeSender};

pub struct FileWatcher {
    watcher: RecommendedWatcher,
    rx: mpsc::Receiver<notify::Result<Event>>,
    watched_dirs: BTreeSet<PathBuf>,
    config: WatchConfig,
}

impl FileWatcher {
    pub fn new(config: WatchConfig) -> Result<Self, LiveError> {
        let (tx, rx) = mpsc::channel();
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| LiveError::Watch {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;

        Ok(FileWatcher {
            watcher,
            rx,
            watched_dirs: BTreeSet::new(),
            config,
        })
    }

    /// Watch the parent directory of a file path.
    /// Watches at directory level for reliable editor detection (atomic rename).
    pub fn watch_path(&mut self, path: &Path) -> Result<(), LiveError> {
        let canonical = canonical_path(path);
        let dir = canonical.parent().unwrap_or(&canonical).to_path_buf();
        if self.watched_dirs.contains(&dir) {
            return Ok(());
        }
        self.watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| LiveError::Watch {
                path: dir.clone(),
                message: e.to_string(),
            })?;
        tracing::debug!(dir = %dir.display(), "watch.dir");
        self.watched_dirs.insert(dir);
        Ok(())
    }

    /// Non-blocking poll for changed source files. Several events for one
    /// path collapse into one, carrying the latest kind.
    pub fn poll_changes(&mut self) -> Vec<ChangeEvent> {
        let mut order: Vec<PathBuf> = Vec::new();
        let mut latest: BTreeMap<PathBuf, ChangeKind> = BTreeMap::new();
        while let Ok(event_result) = self.rx.try_recv() {
            let event = match event_result {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "watch.error");
                    continue;
                }
            };
            for change in translate(&event, &self.config) {
                if latest.insert(change.origin.clone(), change.kind).is_none() {
                    order.push(change.origin);
                }
            }
        }
        order
            .into_iter()
            .filter_map(|origin| {
                let kind = latest.remove(&origin)?;
                Some(ChangeEvent { origin, kind })
            })
            .collect()
    }

    /// Move the watcher onto a thread that pumps changes into `sender`
    /// every `poll_interval_ms` until stopped.
    pub fn forward(mut self, sender: ChangeSender) -> Result<WatchHandle, LiveError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let handle = std::thread::Builder::new()
            .name("livelisp-watch".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    for change in self.poll_changes() {
                        tracing::trace!(origin = %change.origin.display(), kind = ?change.kind, "watch.change");
                        sender.notify(change);
                    }
                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| LiveError::Watch {
                path: PathBuf::new(),
                message: e.to_string(),
            })?;
        Ok(WatchHandle { stop, handle })
    }
}

/// Running forwarder thread; `stop` joins it.
pub struct WatchHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl WatchHandle {
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.handle.join().is_err() {
            tracing::error!("watch.forwarder_panicked");
        }
    }
}

/// Map one `notify` event onto change events for matching source files.
fn translate(event: &Event, config: &WatchConfig) -> Vec<ChangeEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Deleted,
        _ => return Vec::new(),
    };
    event
        .paths
        .iter()
        // editors write `name.lisp.tmp` and rename it over the original
        .filter(|path| config.matches(path) && !path.to_str().is_some_and(|s| s.ends_with(".tmp")))
        .map(|path| ChangeEvent {
            origin: canonical_path(path),
            kind,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};
    use std::time::Instant;

    #[test]
    fn translate_filters_extensions_and_temp_files() {
        let config = WatchConfig::default();
        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/proj/a.lisp"))
            .add_path(PathBuf::from("/proj/a.lisp.tmp"))
            .add_path(PathBuf::from("/proj/notes.txt"));
        let changes = translate(&event, &config);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert!(changes[0].origin.ends_with("a.lisp"));
    }

    #[test]
    fn translate_maps_kinds() {
        let config = WatchConfig::default();
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/p/x.lisp"));
        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(PathBuf::from("/p/x.lisp"));
        let accessed = Event::new(EventKind::Access(notify::event::AccessKind::Any)).add_path(PathBuf::from("/p/x.lisp"));
        assert_eq!(translate(&created, &config)[0].kind, ChangeKind::Created);
        assert_eq!(translate(&removed, &config)[0].kind, ChangeKind::Deleted);
        assert!(translate(&accessed, &config).is_empty());
    }

    #[test]
    fn poll_reports_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.lisp");
        std::fs::write(&path, "(def a 1)").unwrap();

        let Ok(mut watcher) = FileWatcher::new(WatchConfig::default()) else {
            return; // no watch backend in this environment
        };
        watcher.watch_path(&path).unwrap();
        std::fs::write(&path, "(def a 2)").unwrap();

        let expected = canonical_path(&path);
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline && seen.is_empty() {
            seen = watcher.poll_changes();
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(seen.iter().any(|c| c.origin == expected), "events: {:?}", seen);
    }
}
