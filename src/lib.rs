// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod blocking;
pub mod config;
pub mod error;
pub mod feed;
pub mod history;
pub mod hub;
pub mod metrics;
pub mod model;
pub mod notifier;
pub mod registry;
pub mod signature;
pub mod tunnel;
pub mod webhook;

// ---- Re-exports for stable public API ----
pub use crate::blocking::BlockingNotifier;
pub use crate::config::NotifierConfig;
pub use crate::error::{NotifierError, Result};
pub use crate::history::{FileHistory, InMemoryHistory, VideoHistory};
pub use crate::model::{Channel, NotificationKind, Stats, Thumbnail, Timestamp, Video};
pub use crate::notifier::{Notifier, NotifierBuilder};
pub use crate::registry::{Listener, ListenerId, Scope};
