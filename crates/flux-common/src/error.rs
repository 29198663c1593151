use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::transport::{BusError, ResponseError, TransportError};

/// Top-level error type for flux operations
#[derive(Debug, Error, Diagnostic)]
pub enum FluxError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Response(#[from] ResponseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(code(flux::io))]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("missing environment variable {var}")]
    #[diagnostic(code(config::missing_env), help("set {var} or add it to .env"))]
    MissingEnv { var: &'static str },

    #[error("invalid url {url}: {message}")]
    #[diagnostic(code(config::url))]
    UrlParse { url: String, message: String },

    #[error("invalid value {value:?} for {var}")]
    #[diagnostic(code(config::value))]
    InvalidValue { var: &'static str, value: String },

    #[error("unsupported config format for {}", path.display())]
    #[diagnostic(code(config::format), help("use a .json or .toml file"))]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to access config file {}", path.display())]
    #[diagnostic(code(config::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {message}", path.display())]
    #[diagnostic(code(config::parse))]
    Parse { path: PathBuf, message: String },
}
