use std::borrow::Cow;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ring::digest::{SHA1_FOR_LEGACY_USE_ONLY, digest};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::WatcherError;

/// Hash of anything without content.
pub const NULL_CONTENT_HASH: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    File,
    Folder,
    Unknown,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::File => "file",
            ResourceType::Folder => "folder",
            ResourceType::Unknown => "unknown",
        }
    }

    /// Parse a wire name, case-insensitively. Anything unrecognized is
    /// [`ResourceType::Unknown`].
    pub fn parse(name: &str) -> Self {
        if name.eq_ignore_ascii_case("file") {
            ResourceType::File
        } else if name.eq_ignore_ascii_case("folder") {
            ResourceType::Folder
        } else {
            ResourceType::Unknown
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A snapshot of one file or folder in a project.
///
/// `path` is relative to the project root with `/` separators; `timestamp`
/// is milliseconds since the Unix epoch. Files carry their content and its
/// lowercase hex SHA-1; everything else hashes to [`NULL_CONTENT_HASH`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    path: SmolStr,
    timestamp: i64,
    hash: SmolStr,
    kind: ResourceType,
    content: Option<Vec<u8>>,
}

impl Resource {
    pub fn file(path: impl Into<SmolStr>, timestamp: i64, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            timestamp,
            hash: sha1_hex(&content),
            kind: ResourceType::File,
            content: Some(content),
        }
    }

    pub fn folder(path: impl Into<SmolStr>, timestamp: i64) -> Self {
        Self::without_content(path, timestamp, ResourceType::Folder)
    }

    /// A resource that no longer exists, or whose type cannot be told.
    pub fn unknown(path: impl Into<SmolStr>, timestamp: i64) -> Self {
        Self::without_content(path, timestamp, ResourceType::Unknown)
    }

    fn without_content(path: impl Into<SmolStr>, timestamp: i64, kind: ResourceType) -> Self {
        Self {
            path: path.into(),
            timestamp,
            hash: NULL_CONTENT_HASH.into(),
            kind,
            content: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn kind(&self) -> ResourceType {
        self.kind
    }

    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    pub fn content_str(&self) -> Option<Cow<'_, str>> {
        self.content.as_deref().map(String::from_utf8_lossy)
    }

    /// True when a remote copy stamped `timestamp` with `hash` should
    /// replace this one: it is strictly newer and differs in content.
    pub fn is_outdated_by(&self, hash: &str, timestamp: i64) -> bool {
        self.timestamp < timestamp && self.hash != hash
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}, {})",
            self.path, self.kind, self.hash, self.timestamp
        )
    }
}

pub fn sha1_hex(content: &[u8]) -> SmolStr {
    hex::encode(digest(&SHA1_FOR_LEGACY_USE_ONLY, content)).into()
}

pub(crate) fn millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

pub(crate) fn now_millis() -> i64 {
    millis(SystemTime::now())
}

/// `path` relative to `root`, with `/` separators. `None` for the root
/// itself and for paths outside it.
pub(crate) fn relative_path(root: &Path, path: &Path) -> Option<SmolStr> {
    let relative = path.strip_prefix(root).ok()?;
    let mut out = String::new();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return None;
        };
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&part.to_string_lossy());
    }
    (!out.is_empty()).then(|| out.into())
}

/// Resolve a project-relative `/`-separated path under `root`, refusing
/// anything that would escape it.
pub(crate) fn resolve(root: &Path, relative: &str) -> Result<PathBuf, WatcherError> {
    let mut out = root.to_path_buf();
    let mut depth = 0;
    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(WatcherError::InvalidPath {
                    path: relative.into(),
                });
            }
            part => {
                if Path::new(part).components().count() != 1 || Path::new(part).is_absolute() {
                    return Err(WatcherError::InvalidPath {
                        path: relative.into(),
                    });
                }
                out.push(part);
                depth += 1;
            }
        }
    }
    if depth == 0 {
        return Err(WatcherError::InvalidPath {
            path: relative.into(),
        });
    }
    Ok(out)
}
