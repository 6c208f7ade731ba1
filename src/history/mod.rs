//! history: which videos have already been announced as uploads.
//!
//! The pipeline asks `has` to tell a first sighting (upload) from a repeat
//! (edit) and calls `add` after an upload. Two stores ship with the crate:
//! a bounded in-memory set and a per-channel append log on disk.

pub mod file;
pub mod memory;

use std::io;

use async_trait::async_trait;

use crate::model::Video;

pub use file::FileHistory;
pub use memory::InMemoryHistory;

/// Default capacity of the in-memory store.
pub const DEFAULT_CAPACITY: usize = 5000;

/// Default number of IDs kept per channel by the file store.
pub const DEFAULT_PER_CHANNEL: usize = 100;

#[async_trait]
pub trait VideoHistory: Send + Sync {
    /// Has this video ID been recorded before?
    async fn has(&self, video: &Video) -> io::Result<bool>;

    /// Record the video ID. Re-adding a known ID must keep `has` true.
    async fn add(&self, video: &Video) -> io::Result<()>;
}
