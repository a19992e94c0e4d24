//! Media worker context
//!
//! The worker owns every capture resource: input streams, monitor playback,
//! the mixing route and the encoder. The coordinator reaches it only through
//! `WorkerHost`, which spawns and closes the worker task on demand.

mod artifact;
mod host;
mod media_worker;
mod stream_set;

pub use artifact::{extension_for, Artifact, DirectorySink, DownloadSink, DEFAULT_MIME_TYPE};
pub use host::WorkerHost;
pub use media_worker::{MediaWorker, WorkerDeps, WorkerSettings};
pub use stream_set::StreamSet;
