//! Blocking facade over [`Notifier`] for callers without a runtime.
//!
//! Owns a multi-thread tokio runtime; every method delegates to the async
//! core with `block_on`. `run_in_thread` parks the event loop on a worker
//! thread so the caller keeps control and can `stop` it later.

use std::sync::Arc;
use std::thread;

use tokio::runtime::Runtime;

use crate::config::NotifierConfig;
use crate::error::{NotifierError, Result};
use crate::model::NotificationKind;
use crate::notifier::{Notifier, NotifierBuilder};
use crate::registry::{DynListener, Listener, ListenerId, Scope};

pub struct BlockingNotifier {
    runtime: Arc<Runtime>,
    inner: Notifier,
}

impl BlockingNotifier {
    pub fn new(config: NotifierConfig) -> Result<Self> {
        Self::from_builder(Notifier::builder(config))
    }

    pub fn from_builder(builder: NotifierBuilder) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("push-notifier")
            .build()?;
        let inner = builder.build()?;
        Ok(Self {
            runtime: Arc::new(runtime),
            inner,
        })
    }

    /// The async core, for code that has a runtime after all.
    pub fn notifier(&self) -> &Notifier {
        &self.inner
    }

    pub fn subscribe<I, S>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runtime.block_on(self.inner.subscribe(ids))
    }

    pub fn unsubscribe<I, S>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runtime.block_on(self.inner.unsubscribe(ids))
    }

    pub fn add_listener(
        &self,
        kind: NotificationKind,
        scope: impl Into<Scope>,
        listener: DynListener,
    ) -> Result<ListenerId> {
        self.inner.add_listener(kind, scope, listener)
    }

    pub fn on_upload<L: Listener + 'static>(&self, scope: impl Into<Scope>, listener: L) -> Result<ListenerId> {
        self.inner.on_upload(scope, listener)
    }

    pub fn on_edit<L: Listener + 'static>(&self, scope: impl Into<Scope>, listener: L) -> Result<ListenerId> {
        self.inner.on_edit(scope, listener)
    }

    pub fn on_any<L: Listener + 'static>(&self, scope: impl Into<Scope>, listener: L) -> Result<ListenerId> {
        self.inner.on_any(scope, listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    pub fn callback_url(&self) -> Option<String> {
        self.inner.callback_url()
    }

    /// Block until [`BlockingNotifier::stop`] is called from elsewhere.
    pub fn run(&self) -> Result<()> {
        self.runtime.block_on(self.inner.serve())
    }

    /// Run on a dedicated thread and return immediately.
    pub fn run_in_thread(&self) -> Result<thread::JoinHandle<Result<()>>> {
        let runtime = self.runtime.clone();
        let notifier = self.inner.clone();
        thread::Builder::new()
            .name("push-notifier-run".into())
            .spawn(move || runtime.block_on(notifier.serve()))
            .map_err(NotifierError::Io)
    }

    pub fn stop(&self) {
        self.inner.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Video;

    #[test]
    fn queues_and_registers_without_a_caller_runtime() {
        let n = BlockingNotifier::new(NotifierConfig {
            callback_url: Some("http://127.0.0.1:1/".into()),
            ..Default::default()
        })
        .unwrap();
        n.subscribe(["UC1"]).unwrap();
        assert_eq!(n.notifier().subscribed_channels(), vec!["UC1".to_string()]);
        assert!(n.on_any(Scope::All, |_v: Video| async {}).is_ok());
        assert!(!n.is_ready());
        n.stop();
    }
}
