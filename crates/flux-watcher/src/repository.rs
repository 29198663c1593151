use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use smol_str::SmolStr;

use crate::{EventBus, Project, ResourceWatcher, WatcherError};

/// The projects this participant synchronizes, each one watched.
pub struct Repository {
    projects: RwLock<Vec<Arc<Project>>>,
    events: Arc<EventBus>,
    watcher: ResourceWatcher,
}

impl Repository {
    pub fn new() -> Result<Self, WatcherError> {
        Self::with_event_bus(Arc::new(EventBus::new()))
    }

    pub fn with_event_bus(events: Arc<EventBus>) -> Result<Self, WatcherError> {
        let watcher = ResourceWatcher::new(events.clone())?;
        Ok(Self {
            projects: RwLock::new(Vec::new()),
            events,
            watcher,
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn watcher(&self) -> &ResourceWatcher {
        &self.watcher
    }

    /// Add and start watching project `id`. Adding an id that is already
    /// present returns the existing project unchanged.
    pub fn add_project(
        &self,
        id: impl Into<SmolStr>,
        root: impl AsRef<Path>,
    ) -> Result<Arc<Project>, WatcherError> {
        let id = id.into();
        let mut projects = self.projects.write();
        if let Some(existing) = projects.iter().find(|p| p.id() == id) {
            return Ok(existing.clone());
        }
        let project = Arc::new(Project::open(id, root)?);
        self.watcher.watch(project.clone())?;
        projects.push(project.clone());
        Ok(project)
    }

    /// Stop watching and forget project `id`.
    pub fn remove_project(&self, id: &str) -> Option<Arc<Project>> {
        let mut projects = self.projects.write();
        let index = projects.iter().position(|p| p.id() == id)?;
        let project = projects.remove(index);
        self.watcher.unwatch(&project);
        Some(project)
    }

    pub fn project(&self, id: &str) -> Option<Arc<Project>> {
        self.projects.read().iter().find(|p| p.id() == id).cloned()
    }

    /// Every project currently synchronized, in the order they were added.
    pub fn synchronized_projects(&self) -> Vec<Arc<Project>> {
        self.projects.read().clone()
    }
}
