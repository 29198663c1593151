//! Error types for synchronization.

use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

use crate::OperationId;

/// Protocol errors raised while creating or applying operations.
///
/// An operation that fails never touches the document.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncError {
    /// The operation builds on an operation this controller never applied.
    #[error("operation {operation} follows unknown operation {previous}")]
    #[diagnostic(code(flux::sync::unknown_previous))]
    UnknownPreviousOperation {
        operation: OperationId,
        previous: OperationId,
    },

    /// The operation's context names operations not applied here yet.
    #[error("operation {operation} depends on {needed} operations of {participant}, only {applied} applied")]
    #[diagnostic(code(flux::sync::missing_dependency))]
    MissingDependency {
        operation: OperationId,
        participant: SmolStr,
        needed: u64,
        applied: u64,
    },

    /// A participant's operations arrived with a gap.
    #[error("operation {operation} arrived out of order, expected counter {expected}")]
    #[diagnostic(code(flux::sync::out_of_order))]
    OutOfOrder {
        operation: OperationId,
        expected: u64,
    },

    /// A position or range falls outside the document.
    #[error("position {position} out of bounds for length {len}")]
    #[diagnostic(code(flux::sync::bounds))]
    PositionOutOfBounds { position: usize, len: usize },

    /// The operation could not be decoded.
    #[error("malformed operation: {0}")]
    #[diagnostic(code(flux::sync::malformed))]
    Malformed(String),

    /// A seed would discard an operation applied here.
    #[error("cannot seed over operation {operation}, which the seed does not contain")]
    #[diagnostic(
        code(flux::sync::seed_conflict),
        help("seed a controller before editing through it")
    )]
    SeedConflict { operation: OperationId },

    /// The controller no longer accepts operations.
    #[error("sync controller disposed")]
    #[diagnostic(code(flux::sync::disposed))]
    Disposed,
}
