//! # Listener registry
//! Maps `(kind, channel scope)` to an ordered list of callbacks.
//!
//! Lookup for a delivery concatenates four buckets in a fixed order:
//! exact kind + channel, exact kind + wildcard, `Any` + channel, `Any` +
//! wildcard. Registration order is kept inside each bucket and a callback
//! registered in two matching buckets runs twice.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::NotifierError;
use crate::model::{NotificationKind, Video, WILDCARD_CHANNEL};

/// Callback invoked for a classified video.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_video(&self, video: &Video);
}

#[async_trait]
impl<F, Fut> Listener for F
where
    F: Fn(Video) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_video(&self, video: &Video) {
        (self)(video.clone()).await
    }
}

pub type DynListener = Arc<dyn Listener>;

/// Handle returned by registration; pass it to [`ListenerRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Which channels a listener is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Channels(Vec<String>),
}

impl Scope {
    pub fn channel(id: impl Into<String>) -> Self {
        Scope::Channels(vec![id.into()])
    }

    pub fn channels<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Scope::Channels(ids.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for Scope {
    fn from(id: &str) -> Self {
        Scope::channel(id)
    }
}

impl From<Vec<String>> for Scope {
    fn from(ids: Vec<String>) -> Self {
        Scope::Channels(ids)
    }
}

type BucketKey = (NotificationKind, String);

struct Entry {
    id: ListenerId,
    listener: DynListener,
}

#[derive(Default)]
pub struct ListenerRegistry {
    buckets: RwLock<HashMap<BucketKey, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `kind` on `scope`.
    ///
    /// Fails with `InvalidArgument` if the reserved wildcard appears as an
    /// explicit channel ID; nothing is registered in that case.
    pub fn register(
        &self,
        kind: NotificationKind,
        scope: Scope,
        listener: DynListener,
    ) -> Result<ListenerId, NotifierError> {
        let keys: Vec<String> = match scope {
            Scope::All => vec![WILDCARD_CHANNEL.to_string()],
            Scope::Channels(ids) => {
                if let Some(bad) = ids.iter().find(|id| id.as_str() == WILDCARD_CHANNEL) {
                    return Err(NotifierError::InvalidArgument(format!(
                        "channel id cannot be the reserved '{bad}'"
                    )));
                }
                ids
            }
        };

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut buckets = self.buckets.write().expect("registry lock poisoned");
        for key in keys {
            tracing::debug!(kind = %kind, scope = %key, "listener registered");
            buckets.entry((kind, key)).or_default().push(Entry {
                id,
                listener: listener.clone(),
            });
        }
        Ok(id)
    }

    /// Remove every bucket entry registered under `id`. Returns whether
    /// anything was removed.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut buckets = self.buckets.write().expect("registry lock poisoned");
        let mut removed = false;
        for entries in buckets.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            removed |= entries.len() != before;
        }
        buckets.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Snapshot of the callbacks that apply to a delivery of `kind` on
    /// `channel_id`, in dispatch order.
    pub fn lookup(&self, kind: NotificationKind, channel_id: &str) -> Vec<DynListener> {
        let buckets = self.buckets.read().expect("registry lock poisoned");

        let mut order: Vec<(NotificationKind, &str)> = Vec::with_capacity(4);
        if kind != NotificationKind::Any {
            order.push((kind, channel_id));
            order.push((kind, WILDCARD_CHANNEL));
        }
        order.push((NotificationKind::Any, channel_id));
        order.push((NotificationKind::Any, WILDCARD_CHANNEL));

        let mut out = Vec::new();
        for (k, scope) in order {
            if let Some(entries) = buckets.get(&(k, scope.to_string())) {
                out.extend(entries.iter().map(|e| e.listener.clone()));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.buckets
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
