use std::path::PathBuf;

use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

/// Errors from project storage and filesystem watching.
#[derive(Debug, Error, Diagnostic)]
pub enum WatcherError {
    #[error("failed to access {}", path.display())]
    #[diagnostic(code(flux::watcher::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("project root {} is not a directory", path.display())]
    #[diagnostic(code(flux::watcher::root), help("pass an existing directory"))]
    NotADirectory { path: PathBuf },

    #[error("resource path {path:?} escapes its project")]
    #[diagnostic(code(flux::watcher::path))]
    InvalidPath { path: SmolStr },

    #[error("resource {path:?} is not a file")]
    #[diagnostic(code(flux::watcher::not_a_file))]
    NotAFile { path: SmolStr },

    #[error("watch primitive failed")]
    #[diagnostic(code(flux::watcher::notify))]
    Notify(#[from] notify::Error),

    #[error("failed to start the watcher thread")]
    #[diagnostic(code(flux::watcher::spawn))]
    Spawn(#[source] std::io::Error),

    #[error("resource watcher has shut down")]
    #[diagnostic(code(flux::watcher::shutdown))]
    Shutdown,
}

impl WatcherError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| WatcherError::Io { path, source }
    }
}

/// Error returned by an event listener; logged by the event bus.
#[derive(Debug, Error, Diagnostic)]
pub enum ListenerError {
    #[error(transparent)]
    #[diagnostic(code(flux::watcher::listener))]
    Send(#[from] flux_common::transport::BusError),

    #[error("{0}")]
    #[diagnostic(code(flux::watcher::listener))]
    Failed(String),
}
