use smol_str::SmolStr;

use crate::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryEventType {
    Created,
    Modified,
    Deleted,
}

/// One observed change to a resource of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryEvent {
    pub kind: RepositoryEventType,
    pub resource: Resource,
    /// Id of the project the resource belongs to.
    pub project: SmolStr,
}

impl RepositoryEvent {
    pub fn new(kind: RepositoryEventType, resource: Resource, project: impl Into<SmolStr>) -> Self {
        Self {
            kind,
            resource,
            project: project.into(),
        }
    }
}
