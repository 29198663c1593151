//! A project: a named directory whose contents are synchronized.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use smol_str::SmolStr;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::resource::{millis, relative_path, resolve};
use crate::{Resource, ResourceType, WatcherError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    id: SmolStr,
    root: PathBuf,
}

impl Project {
    /// Open the project `id` rooted at the existing directory `root`.
    pub fn open(id: impl Into<SmolStr>, root: impl AsRef<Path>) -> Result<Self, WatcherError> {
        let root = root.as_ref();
        let root = fs::canonicalize(root).map_err(WatcherError::io(root))?;
        if !root.is_dir() {
            return Err(WatcherError::NotADirectory { path: root });
        }
        Ok(Self {
            id: id.into(),
            root,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Canonical absolute root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every file and folder below the root, sorted by path. Entries that
    /// vanish or cannot be read while walking are skipped.
    pub fn resources(&self) -> Vec<Resource> {
        let mut resources = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(project = %self.id, error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let Some(relative) = relative_path(&self.root, entry.path()) else {
                continue;
            };
            match snapshot(relative, entry.path()) {
                Ok(Some(resource)) => resources.push(resource),
                Ok(None) => {}
                Err(err) => warn!(project = %self.id, error = %err, "skipping unreadable entry"),
            }
        }
        resources.sort_by(|a, b| a.path().cmp(b.path()));
        resources
    }

    /// Current state of `path`, or `None` if it does not exist.
    pub fn resource(&self, path: &str) -> Result<Option<Resource>, WatcherError> {
        let absolute = resolve(&self.root, path)?;
        snapshot(path.into(), &absolute)
    }

    pub fn has_resource(&self, path: &str) -> bool {
        resolve(&self.root, path).is_ok_and(|p| p.exists())
    }

    /// Create `resource` on disk unless something already exists at its
    /// path. Unknown resources are ignored. Returns whether anything was
    /// written.
    pub fn create_resource(&self, resource: &Resource) -> Result<bool, WatcherError> {
        let absolute = resolve(&self.root, resource.path())?;
        if absolute.exists() {
            return Ok(false);
        }
        match resource.kind() {
            ResourceType::Folder => {
                fs::create_dir_all(&absolute).map_err(WatcherError::io(&absolute))?;
            }
            ResourceType::File => {
                if let Some(parent) = absolute.parent() {
                    fs::create_dir_all(parent).map_err(WatcherError::io(parent))?;
                }
                fs::write(&absolute, resource.content().unwrap_or_default())
                    .map_err(WatcherError::io(&absolute))?;
            }
            ResourceType::Unknown => return Ok(false),
        }
        set_timestamp(&absolute, resource.timestamp());
        debug!(project = %self.id, resource = %resource, "created resource");
        Ok(true)
    }

    /// Overwrite an existing file with `resource`. Returns whether the file
    /// existed.
    pub fn update_resource(&self, resource: &Resource) -> Result<bool, WatcherError> {
        if resource.kind() != ResourceType::File {
            return Err(WatcherError::NotAFile {
                path: resource.path().into(),
            });
        }
        let absolute = resolve(&self.root, resource.path())?;
        if !absolute.is_file() {
            return Ok(false);
        }
        fs::write(&absolute, resource.content().unwrap_or_default())
            .map_err(WatcherError::io(&absolute))?;
        set_timestamp(&absolute, resource.timestamp());
        debug!(project = %self.id, resource = %resource, "updated resource");
        Ok(true)
    }

    /// Delete `path`, recursively for folders. Returns whether it existed.
    pub fn delete_resource(&self, path: &str) -> Result<bool, WatcherError> {
        let absolute = resolve(&self.root, path)?;
        let result = if absolute.is_dir() {
            fs::remove_dir_all(&absolute)
        } else {
            fs::remove_file(&absolute)
        };
        match result {
            Ok(()) => {
                debug!(project = %self.id, resource = path, "deleted resource");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(WatcherError::Io {
                path: absolute,
                source: err,
            }),
        }
    }
}

/// Read the resource at `absolute`, or `None` if nothing is there.
pub(crate) fn snapshot(relative: SmolStr, absolute: &Path) -> Result<Option<Resource>, WatcherError> {
    let metadata = match fs::metadata(absolute) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(WatcherError::Io {
                path: absolute.to_path_buf(),
                source: err,
            });
        }
    };
    let timestamp = metadata.modified().map(millis).unwrap_or_default();
    if metadata.is_dir() {
        return Ok(Some(Resource::folder(relative, timestamp)));
    }
    match fs::read(absolute) {
        Ok(content) => Ok(Some(Resource::file(relative, timestamp, content))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(WatcherError::Io {
            path: absolute.to_path_buf(),
            source: err,
        }),
    }
}

/// Stamp `path` with a remote modification time so the watcher's own
/// report of the write carries the remote timestamp.
fn set_timestamp(path: &Path, timestamp: i64) {
    let Ok(millis) = u64::try_from(timestamp) else {
        return;
    };
    let time = UNIX_EPOCH + Duration::from_millis(millis);
    let result = if path.is_dir() {
        fs::File::open(path).and_then(|f| f.set_modified(time))
    } else {
        fs::File::options()
            .write(true)
            .open(path)
            .and_then(|f| f.set_modified(time))
    };
    if let Err(err) = result {
        debug!(path = %path.display(), error = %err, "could not set modification time");
    }
}
