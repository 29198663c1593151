//! Filesystem watching for projects.
//!
//! Every directory of a watched project gets its own non-recursive watch,
//! so the watch set is exactly the set of directories we know about. A
//! single background thread turns notifications into [`RepositoryEvent`]s
//! and fires them on the [`EventBus`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;

use notify::event::{MetadataKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::project::snapshot;
use crate::resource::{now_millis, relative_path};
use crate::{EventBus, Project, RepositoryEvent, RepositoryEventType, Resource, WatcherError};

enum Signal {
    Fs(notify::Result<Event>),
    Shutdown,
}

struct WatchState {
    /// `None` once shut down.
    watcher: Option<RecommendedWatcher>,
    /// Watched directory to the project owning it.
    dirs: HashMap<PathBuf, Arc<Project>>,
}

impl WatchState {
    fn watcher(&mut self) -> Result<&mut RecommendedWatcher, WatcherError> {
        self.watcher.as_mut().ok_or(WatcherError::Shutdown)
    }

    /// Watch `dir` and every directory below it for `project`.
    fn register_tree(&mut self, project: &Arc<Project>, dir: &Path) -> Result<(), WatcherError> {
        for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_dir() || self.dirs.contains_key(entry.path()) {
                continue;
            }
            match self.watcher()?.watch(entry.path(), RecursiveMode::NonRecursive) {
                Ok(()) => {
                    self.dirs.insert(entry.path().to_path_buf(), project.clone());
                }
                // The root must be watchable; a subdirectory may vanish under us.
                Err(err) if entry.depth() == 0 => return Err(err.into()),
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "could not watch directory")
                }
            }
        }
        Ok(())
    }

    /// Forget `dir` and every watched directory below it.
    fn forget_tree(&mut self, dir: &Path) {
        let gone: Vec<PathBuf> = self
            .dirs
            .keys()
            .filter(|watched| watched.starts_with(dir))
            .cloned()
            .collect();
        for watched in gone {
            self.dirs.remove(&watched);
            if let Some(watcher) = self.watcher.as_mut() {
                // Fails when the directory is already gone; nothing to undo.
                let _ = watcher.unwatch(&watched);
            }
        }
    }

    fn owner(&self, path: &Path) -> Option<Arc<Project>> {
        path.parent().and_then(|parent| self.dirs.get(parent)).cloned()
    }
}

/// Watches project directories and publishes what changes in them.
pub struct ResourceWatcher {
    state: Arc<Mutex<WatchState>>,
    signals: mpsc::Sender<Signal>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ResourceWatcher {
    /// Start the watcher thread. Events are fired on `events`.
    pub fn new(events: Arc<EventBus>) -> Result<Self, WatcherError> {
        let (signals, inbox) = mpsc::channel();
        let forward = signals.clone();
        let watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let _ = forward.send(Signal::Fs(result));
        })?;
        let state = Arc::new(Mutex::new(WatchState {
            watcher: Some(watcher),
            dirs: HashMap::new(),
        }));

        let thread_state = state.clone();
        let thread = std::thread::Builder::new()
            .name("flux-watcher".into())
            .spawn(move || run(&thread_state, &events, inbox))
            .map_err(WatcherError::Spawn)?;

        Ok(Self {
            state,
            signals,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Watch every directory of `project`.
    pub fn watch(&self, project: Arc<Project>) -> Result<(), WatcherError> {
        let mut state = self.state.lock();
        state.register_tree(&project, project.root())?;
        info!(project = project.id(), root = %project.root().display(), "watching project");
        Ok(())
    }

    /// Stop watching the directories of `project`.
    pub fn unwatch(&self, project: &Project) {
        let mut state = self.state.lock();
        state.forget_tree(project.root());
        info!(project = project.id(), "stopped watching project");
    }

    /// Number of directories currently watched.
    pub fn watched_dirs(&self) -> usize {
        self.state.lock().dirs.len()
    }

    pub fn is_watching(&self, dir: &Path) -> bool {
        self.state.lock().dirs.contains_key(dir)
    }

    /// Stop the watcher thread and release every watch.
    pub fn shutdown(&self) {
        let _ = self.signals.send(Signal::Shutdown);
        {
            let mut state = self.state.lock();
            state.watcher = None;
            state.dirs.clear();
        }
        if let Some(thread) = self.thread.lock().take() {
            // Dropped from a listener on the watcher thread itself.
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!("watcher thread panicked");
            }
        }
    }
}

impl Drop for ResourceWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(state: &Mutex<WatchState>, events: &EventBus, inbox: mpsc::Receiver<Signal>) {
    debug!("watcher thread started");
    let mut last_deleted: Option<PathBuf> = None;
    // Ends on shutdown, or when the watch primitive drops its sender.
    for signal in inbox {
        let event = match signal {
            Signal::Shutdown => break,
            Signal::Fs(Err(err)) => {
                warn!(error = %err, "watch error");
                continue;
            }
            Signal::Fs(Ok(event)) => event,
        };
        for (kind, path) in classify(&event) {
            if kind == RepositoryEventType::Deleted {
                // A deleted directory is reported by its own watch and by
                // its parent's.
                if last_deleted.as_deref() == Some(path) {
                    continue;
                }
                last_deleted = Some(path.to_path_buf());
            } else if last_deleted.as_deref() == Some(path) {
                last_deleted = None;
            }
            for event in observe(state, kind, path) {
                events.fire(&event);
            }
        }
    }
    debug!("watcher thread stopped");
}

/// Map a notification onto repository event types, one per path.
fn classify(event: &Event) -> Vec<(RepositoryEventType, &Path)> {
    use RepositoryEventType::*;

    fn each(event: &Event, kind: RepositoryEventType) -> Vec<(RepositoryEventType, &Path)> {
        event.paths.iter().map(|p| (kind, p.as_path())).collect()
    }

    match &event.kind {
        EventKind::Create(_) => each(event, Created),
        EventKind::Remove(_) => each(event, Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(event, Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(event, Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![(Deleted, from.as_path()), (Created, to.as_path())],
            _ => Vec::new(),
        },
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| (if p.exists() { Created } else { Deleted }, p.as_path()))
            .collect(),
        EventKind::Modify(
            ModifyKind::Data(_)
            | ModifyKind::Any
            | ModifyKind::Other
            | ModifyKind::Metadata(MetadataKind::WriteTime),
        ) => each(event, Modified),
        _ => Vec::new(),
    }
}

/// Turn one observed change into events, updating the watch set for
/// directories that appear or disappear.
///
/// The state lock is held only to look up the owner and to change the
/// watch set. Reading and hashing happen outside it.
fn observe(state: &Mutex<WatchState>, kind: RepositoryEventType, path: &Path) -> Vec<RepositoryEvent> {
    let (project, relative) = {
        let mut state = state.lock();
        let Some(project) = state.owner(path) else {
            trace!(path = %path.display(), "change outside watched directories");
            return Vec::new();
        };
        let Some(relative) = relative_path(project.root(), path) else {
            return Vec::new();
        };
        if kind == RepositoryEventType::Deleted {
            state.forget_tree(path);
        }
        (project, relative)
    };

    if kind == RepositoryEventType::Deleted {
        return vec![RepositoryEvent::new(
            kind,
            Resource::unknown(relative, now_millis()),
            project.id(),
        )];
    }

    let resource = match snapshot(relative, path) {
        Ok(Some(resource)) => resource,
        Ok(None) => {
            trace!(path = %path.display(), "resource vanished before it was read");
            return Vec::new();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping change");
            return Vec::new();
        }
    };
    let is_folder = resource.kind() == crate::ResourceType::Folder;
    if kind == RepositoryEventType::Modified && is_folder {
        return Vec::new();
    }
    let mut out = vec![RepositoryEvent::new(kind, resource, project.id())];
    if kind == RepositoryEventType::Created && is_folder {
        if let Err(err) = state.lock().register_tree(&project, path) {
            warn!(path = %path.display(), error = %err, "could not watch new directory");
        }
        out.extend(existing_children(&project, path));
    }
    out
}

/// Everything already inside a directory that was just created; it
/// appeared before the directory was watched.
fn existing_children(project: &Arc<Project>, dir: &Path) -> Vec<RepositoryEvent> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let relative = relative_path(project.root(), entry.path())?;
            match snapshot(relative, entry.path()) {
                Ok(resource) => resource,
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "skipping new entry");
                    None
                }
            }
        })
        .map(|resource| RepositoryEvent::new(RepositoryEventType::Created, resource, project.id()))
        .collect()
}
