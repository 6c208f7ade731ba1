//! Bounded, insertion-ordered in-memory history.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{VideoHistory, DEFAULT_CAPACITY};
use crate::model::Video;

/// Keeps the most recent `capacity` video IDs. Eviction is by insertion
/// age only; `has` does not refresh an entry.
#[derive(Debug)]
pub struct InMemoryHistory {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    order: VecDeque<String>,
    ids: HashSet<String>,
    cap: usize,
}

impl Inner {
    fn evict_overflow(&mut self) {
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }
}

impl InMemoryHistory {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: VecDeque::with_capacity(cap.min(10_000)),
                ids: HashSet::with_capacity(cap.min(10_000)),
                cap,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().expect("history mutex poisoned").cap
    }

    /// Change the capacity; shrinking evicts the oldest entries immediately.
    pub fn set_capacity(&self, cap: usize) {
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        inner.cap = cap;
        inner.evict_overflow();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("history mutex poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("history mutex poisoned")
            .ids
            .contains(id)
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl VideoHistory for InMemoryHistory {
    async fn has(&self, video: &Video) -> io::Result<bool> {
        Ok(self.contains_id(&video.id))
    }

    async fn add(&self, video: &Video) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        if inner.ids.contains(&video.id) {
            return Ok(());
        }
        tracing::debug!(video_id = %video.id, "adding video to history");
        inner.ids.insert(video.id.clone());
        inner.order.push_back(video.id.clone());
        inner.evict_overflow();
        Ok(())
    }
}
