//! Serializes filesystem change notifications into ordered patches.
//!
//! Each watched origin gets one worker thread fed by an `mpsc` queue, so
//! notifications for one file are handled strictly in arrival order while
//! different files never wait on each other.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::ReloadConfig;
use crate::context::ExecutionContext;
use crate::diff::{diff, Patch};
use crate::error::LiveError;
use crate::names::{canonical_path, Origin};
use crate::source::{self, hash_source, SourceUnit};

// ── Notification contract ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// A change to a watched file, as delivered by the watch collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub origin: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(origin: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        ChangeEvent {
            origin: origin.into(),
            kind,
        }
    }
}

/// Per-origin state machine: `Idle → Diffing → Applying → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Diffing,
    Applying,
}

// ── Observers ───────────────────────────────────────────────────────────

/// Outcome of one reload cycle.
#[derive(Debug, Clone)]
pub enum ReloadEvent {
    /// The patch was applied to every subscribed context.
    Applied {
        origin: PathBuf,
        contexts: Vec<String>,
        summary: String,
    },
    /// Content hash matched the last applied version.
    Unchanged { origin: PathBuf },
    /// The new version could not be read or parsed; no context was touched.
    Rejected {
        origin: PathBuf,
        error: Arc<LiveError>,
    },
    /// Applying to one context failed. Other contexts are still attempted.
    Failed {
        origin: PathBuf,
        context: String,
        error: Arc<LiveError>,
    },
}

impl ReloadEvent {
    pub fn origin(&self) -> &Path {
        match self {
            ReloadEvent::Applied { origin, .. }
            | ReloadEvent::Unchanged { origin }
            | ReloadEvent::Rejected { origin, .. }
            | ReloadEvent::Failed { origin, .. } => origin,
        }
    }
}

/// Receives the outcome of every reload cycle, on the origin's worker thread.
pub trait ReloadObserver: Send + Sync {
    fn on_event(&self, event: &ReloadEvent);
}

/// Logs reload outcomes through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ReloadObserver for TracingObserver {
    fn on_event(&self, event: &ReloadEvent) {
        match event {
            ReloadEvent::Applied {
                origin,
                contexts,
                summary,
            } => {
                tracing::info!(origin = %origin.display(), contexts = ?contexts, summary = %summary, "reload.applied")
            }
            ReloadEvent::Unchanged { origin } => {
                tracing::debug!(origin = %origin.display(), "reload.unchanged")
            }
            ReloadEvent::Rejected { origin, error } => {
                tracing::warn!(origin = %origin.display(), error = %error, "reload.rejected")
            }
            ReloadEvent::Failed {
                origin,
                context,
                error,
            } => {
                tracing::error!(origin = %origin.display(), context = %context, error = %error, "reload.failed")
            }
        }
    }
}

/// Forwards every event into a channel; also logs through `tracing`.
pub struct ChannelObserver {
    tx: Mutex<mpsc::Sender<ReloadEvent>>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::Receiver<ReloadEvent>) {
        let (tx, rx) = mpsc::channel();
        (ChannelObserver { tx: Mutex::new(tx) }, rx)
    }
}

impl ReloadObserver for ChannelObserver {
    fn on_event(&self, event: &ReloadEvent) {
        TracingObserver.on_event(event);
        // receiver gone: nobody is listening any more
        let _ = self.tx.lock().send(event.clone());
    }
}

// ── Coordinator ─────────────────────────────────────────────────────────

enum Message {
    Change(ChangeKind),
    Attach(Weak<ExecutionContext>),
    Detach(Weak<ExecutionContext>),
    Flush(mpsc::Sender<()>),
}

struct OriginWorker {
    tx: mpsc::Sender<Message>,
    phase: Arc<Mutex<Phase>>,
    handle: JoinHandle<()>,
}

struct Shared {
    config: ReloadConfig,
    observer: Arc<dyn ReloadObserver>,
    workers: Mutex<BTreeMap<PathBuf, OriginWorker>>,
    closed: AtomicBool,
}

/// Owns one worker per watched origin. Dropping the coordinator shuts the
/// workers down after they drain their queues.
pub struct ReloadCoordinator {
    shared: Arc<Shared>,
}

/// Cloneable handle for delivering change events from another thread.
#[derive(Clone)]
pub struct ChangeSender {
    shared: Arc<Shared>,
}

impl ChangeSender {
    pub fn notify(&self, event: ChangeEvent) {
        self.shared.notify(event);
    }
}

impl ReloadCoordinator {
    pub fn new(config: ReloadConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }

    pub fn with_observer(config: ReloadConfig, observer: Arc<dyn ReloadObserver>) -> Self {
        ReloadCoordinator {
            shared: Arc::new(Shared {
                config,
                observer,
                workers: Mutex::new(BTreeMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn sender(&self) -> ChangeSender {
        ChangeSender {
            shared: self.shared.clone(),
        }
    }

    /// Attach `context` to the file at `path`. The context is brought up to
    /// the file's current version in queue order; subscribing twice is a
    /// no-op.
    pub fn subscribe(&self, path: impl AsRef<Path>, context: &Arc<ExecutionContext>) -> Result<(), LiveError> {
        let origin = canonical_path(path.as_ref());
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(LiveError::Watch {
                path: origin,
                message: "coordinator is shut down".to_string(),
            });
        }
        let mut workers = self.shared.workers.lock();
        if !workers.contains_key(&origin) {
            let worker = self.shared.spawn_worker(&origin).map_err(|error| LiveError::Io {
                path: origin.clone(),
                error,
            })?;
            workers.insert(origin.clone(), worker);
        }
        if let Some(worker) = workers.get(&origin) {
            let _ = worker.tx.send(Message::Attach(Arc::downgrade(context)));
        }
        Ok(())
    }

    /// Detach `context` from `path`. Bindings already applied stay.
    pub fn unsubscribe(&self, path: impl AsRef<Path>, context: &Arc<ExecutionContext>) {
        let origin = canonical_path(path.as_ref());
        if let Some(worker) = self.shared.workers.lock().get(&origin) {
            let _ = worker.tx.send(Message::Detach(Arc::downgrade(context)));
        }
    }

    /// Queue a change notification. Unknown origins are ignored.
    pub fn notify(&self, event: ChangeEvent) {
        self.shared.notify(event);
    }

    /// Block until every notification queued for `path` so far is handled.
    pub fn flush(&self, path: impl AsRef<Path>) {
        let origin = canonical_path(path.as_ref());
        let done = {
            let workers = self.shared.workers.lock();
            workers.get(&origin).and_then(Shared::request_flush)
        };
        if let Some(done) = done {
            let _ = done.recv();
        }
    }

    /// `flush` for every watched origin.
    pub fn flush_all(&self) {
        let pending: Vec<mpsc::Receiver<()>> = {
            let workers = self.shared.workers.lock();
            workers.values().filter_map(Shared::request_flush).collect()
        };
        for done in pending {
            let _ = done.recv();
        }
    }

    /// Current phase of the worker for `path`, if the path is watched.
    pub fn phase(&self, path: impl AsRef<Path>) -> Option<Phase> {
        let origin = canonical_path(path.as_ref());
        self.shared.workers.lock().get(&origin).map(|w| *w.phase.lock())
    }

    pub fn watched(&self) -> Vec<PathBuf> {
        self.shared.workers.lock().keys().cloned().collect()
    }

    /// Stop accepting work, let every worker drain its queue, and join them.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let workers = std::mem::take(&mut *self.shared.workers.lock());
        for (origin, worker) in workers {
            let OriginWorker { tx, handle, .. } = worker;
            drop(tx);
            if handle.join().is_err() {
                tracing::error!(origin = %origin.display(), "reload.worker_panicked");
            }
        }
    }
}

impl Drop for ReloadCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn notify(&self, event: ChangeEvent) {
        let origin = canonical_path(&event.origin);
        match self.workers.lock().get(&origin) {
            Some(worker) => {
                if worker.tx.send(Message::Change(event.kind)).is_err() {
                    tracing::warn!(origin = %origin.display(), "reload.worker_gone");
                }
            }
            None => tracing::trace!(origin = %origin.display(), "reload.ignored"),
        }
    }

    fn request_flush(worker: &OriginWorker) -> Option<mpsc::Receiver<()>> {
        let (tx, rx) = mpsc::channel();
        worker.tx.send(Message::Flush(tx)).ok().map(|_| rx)
    }

    fn spawn_worker(&self, origin: &Path) -> io::Result<OriginWorker> {
        let (tx, rx) = mpsc::channel();
        let phase = Arc::new(Mutex::new(Phase::Idle));
        let worker = Worker {
            origin: origin.to_path_buf(),
            config: self.config.clone(),
            observer: self.observer.clone(),
            phase: phase.clone(),
            subscribers: Vec::new(),
            last_known: None,
        };
        let name = format!("livelisp-reload-{}", Origin::File(origin.to_path_buf()).logical_name());
        tracing::trace!(origin = %origin.display(), "reload.spawn_worker");
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || worker.run(rx))?;
        Ok(OriginWorker { tx, phase, handle })
    }
}

// ── Worker ──────────────────────────────────────────────────────────────

struct Worker {
    origin: PathBuf,
    config: ReloadConfig,
    observer: Arc<dyn ReloadObserver>,
    phase: Arc<Mutex<Phase>>,
    subscribers: Vec<Weak<ExecutionContext>>,
    /// Last version applied to every subscriber.
    last_known: Option<SourceUnit>,
}

impl Worker {
    fn run(mut self, rx: mpsc::Receiver<Message>) {
        while let Ok(message) = rx.recv() {
            match message {
                Message::Change(kind) => self.cycle(kind),
                Message::Attach(context) => self.attach(context),
                Message::Detach(context) => self.subscribers.retain(|s| !s.ptr_eq(&context)),
                Message::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::trace!(origin = %self.origin.display(), "reload.worker_exit");
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    fn emit(&self, event: ReloadEvent) {
        self.observer.on_event(&event);
    }

    fn attach(&mut self, context: Weak<ExecutionContext>) {
        if self.subscribers.iter().any(|s| s.ptr_eq(&context)) {
            return;
        }
        self.subscribers.push(context.clone());
        let Some(ctx) = context.upgrade() else {
            return;
        };
        if self.last_known.is_none() {
            self.cycle(ChangeKind::Modified);
            return;
        }
        // Bring only the newcomer up to the version everyone else has.
        if let Some(unit) = &self.last_known {
            let patch = diff(None, unit);
            self.set_phase(Phase::Applying);
            self.apply_all(&patch, &[ctx]);
            self.set_phase(Phase::Idle);
        }
    }

    fn cycle(&mut self, kind: ChangeKind) {
        self.set_phase(Phase::Diffing);
        let result = self.read_version(kind);
        let unit = match result {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                self.set_phase(Phase::Idle);
                self.emit(ReloadEvent::Unchanged {
                    origin: self.origin.clone(),
                });
                return;
            }
            Err(error) => {
                self.set_phase(Phase::Idle);
                self.emit(ReloadEvent::Rejected {
                    origin: self.origin.clone(),
                    error: Arc::new(error),
                });
                return;
            }
        };

        let patch = diff(self.last_known.as_ref(), &unit);
        self.set_phase(Phase::Applying);
        self.subscribers.retain(|s| s.strong_count() > 0);
        let contexts: Vec<Arc<ExecutionContext>> = self.subscribers.iter().filter_map(Weak::upgrade).collect();
        if self.apply_all(&patch, &contexts) {
            self.last_known = Some(unit);
        }
        self.set_phase(Phase::Idle);
    }

    /// Read and parse the current version. `Ok(None)` means the content is
    /// identical to the last applied version.
    fn read_version(&self, kind: ChangeKind) -> Result<Option<SourceUnit>, LiveError> {
        let origin = Origin::File(self.origin.clone());
        let text = match kind {
            ChangeKind::Deleted => None,
            ChangeKind::Created | ChangeKind::Modified => match std::fs::read_to_string(&self.origin) {
                Ok(text) => Some(text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(error) => {
                    return Err(LiveError::Io {
                        path: self.origin.clone(),
                        error,
                    })
                }
            },
        };

        let hash = hash_source(text.as_deref().unwrap_or(""));
        if self.config.skip_unchanged {
            if let Some(last) = &self.last_known {
                if last.content_hash == hash {
                    return Ok(None);
                }
            }
        }

        match text {
            None => Ok(Some(SourceUnit::empty(origin))),
            Some(text) => source::parse(origin, &text).map(Some),
        }
    }

    /// Apply `patch` to each context. Returns true if every application
    /// succeeded.
    fn apply_all(&self, patch: &Patch, contexts: &[Arc<ExecutionContext>]) -> bool {
        let mut applied = Vec::new();
        let mut all_ok = true;
        for ctx in contexts {
            match ctx.apply(patch) {
                Ok(_) => applied.push(ctx.name().to_string()),
                Err(error) => {
                    all_ok = false;
                    self.emit(ReloadEvent::Failed {
                        origin: self.origin.clone(),
                        context: ctx.name().to_string(),
                        error: Arc::new(error),
                    });
                }
            }
        }
        if all_ok {
            self.emit(ReloadEvent::Applied {
                origin: self.origin.clone(),
                contexts: applied,
                summary: patch.summary(),
            });
        }
        all_ok
    }
}
