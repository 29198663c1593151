//! Operational transformation for concurrently edited text.
//!
//! Every participant owns a [`SyncController`] per document. Local edits
//! become [`Operation`]s that are applied locally and broadcast; remote
//! operations are transformed against whatever this controller applied
//! concurrently, so all participants converge on the same text regardless
//! of delivery order.
//!
//! Positions inside operations address the document *model*: the text plus
//! tombstones of deleted characters. Editor-facing offsets (chars) are
//! translated at the edges, when operations are created and when they are
//! applied to a [`TextTarget`].

mod controller;
mod document;
mod error;
mod id;
mod operation;
pub mod session;
mod target;
mod transform;
mod version;

pub use controller::{Applied, HistoryEntry, SyncController};
pub use error::SyncError;
pub use id::OperationId;
pub use operation::{DeleteOperation, InsertOperation, Operation};
pub use session::{DocumentKey, LiveEditSession, SavePoint};
pub use target::{StringTarget, TextTarget};
pub use transform::{Edit, TransformedOperation};
pub use version::VersionVector;
