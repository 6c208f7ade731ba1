//! # Lifecycle coordinator
//! Owns readiness, the subscription intent set, renewal and shutdown.
//!
//! `run` goes through these phases:
//! 1. bind, resolve the callback (opening a tunnel when none is configured),
//! 2. serve, polling the callback with a synthetic challenge until it answers,
//! 3. flush the queued subscriptions and start the renewal timer,
//! 4. on cancellation stop accepting deliveries, unsubscribe everything
//!    (skipped for tunnel callbacks), then release the socket and tunnel.
//!
//! `stop` only signals; it is safe from any thread and any number of times.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use axum::Router;
use metrics::counter;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api;
use crate::config::NotifierConfig;
use crate::error::{NotifierError, Result};
use crate::history::VideoHistory;
use crate::hub::{CallbackTarget, HubClient, IntentSet, Mode};
use crate::model::{validate_channel_id, NotificationKind};
use crate::registry::{DynListener, Listener, ListenerId, ListenerRegistry, Scope};
use crate::tunnel::{NoTunnel, Tunnel, TunnelProvider};
use crate::webhook::Pipeline;

/// Upper bound for the readiness wait of the temporary shutdown server.
const SHUTDOWN_READY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct NotifierBuilder {
    config: NotifierConfig,
    history: Option<Arc<dyn VideoHistory>>,
    tunnel: Option<Arc<dyn TunnelProvider>>,
    routes: Option<Router>,
}

impl NotifierBuilder {
    /// Replace the history store named by the config.
    pub fn history(mut self, history: Arc<dyn VideoHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn tunnel(mut self, provider: Arc<dyn TunnelProvider>) -> Self {
        self.tunnel = Some(provider);
        self
    }

    /// Extra routes served next to the callback endpoint (e.g. `/metrics`).
    pub fn routes(mut self, routes: Router) -> Self {
        self.routes = Some(routes);
        self
    }

    pub fn build(self) -> Result<Notifier> {
        let config = self.config;
        if let Some(url) = &config.callback_url {
            reqwest::Url::parse(url)
                .map_err(|e| NotifierError::Config(format!("callback_url {url:?}: {e}")))?;
        }
        let secret = config.resolve_secret();
        if secret.is_empty() {
            tracing::warn!(target: "notifier", "empty secret: deliveries are not authenticated");
        }

        let hub = HubClient::from_config(&config)?;
        let registry = Arc::new(ListenerRegistry::new());
        let intents = Arc::new(IntentSet::new());
        let callback_url = Arc::new(RwLock::new(None));
        let history = self.history.unwrap_or_else(|| config.history.build());

        let pipeline = Arc::new(Pipeline::new(
            registry.clone(),
            history,
            intents.clone(),
            hub.clone(),
            secret.clone(),
            callback_url.clone(),
        ));

        Ok(Notifier {
            inner: Arc::new(Inner {
                config,
                secret,
                hub,
                registry,
                intents,
                pipeline,
                callback_url,
                tunnel: self.tunnel.unwrap_or_else(|| Arc::new(NoTunnel)),
                routes: self.routes,
                ready: AtomicBool::new(false),
                ephemeral: AtomicBool::new(false),
                running: AtomicBool::new(false),
                local_addr: RwLock::new(None),
                stop: Mutex::new(CancellationToken::new()),
            }),
        })
    }
}

struct Inner {
    config: NotifierConfig,
    secret: String,
    hub: HubClient,
    registry: Arc<ListenerRegistry>,
    intents: Arc<IntentSet>,
    pipeline: Arc<Pipeline>,
    callback_url: Arc<RwLock<Option<String>>>,
    tunnel: Arc<dyn TunnelProvider>,
    routes: Option<Router>,
    ready: AtomicBool,
    ephemeral: AtomicBool,
    running: AtomicBool,
    local_addr: RwLock<Option<SocketAddr>>,
    stop: Mutex<CancellationToken>,
}

/// Async notifier. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    pub fn builder(config: NotifierConfig) -> NotifierBuilder {
        NotifierBuilder {
            config,
            history: None,
            tunnel: None,
            routes: None,
        }
    }

    pub fn new(config: NotifierConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.inner.config
    }

    pub fn secret(&self) -> &str {
        &self.inner.secret
    }

    pub fn history(&self) -> Arc<dyn VideoHistory> {
        self.inner.pipeline.history().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Resolved callback address, once `run` has bound it.
    pub fn callback_url(&self) -> Option<String> {
        self.inner
            .callback_url
            .read()
            .expect("callback lock poisoned")
            .clone()
    }

    /// True when the callback came from a tunnel and dies with the process.
    pub fn is_ephemeral(&self) -> bool {
        self.inner.ephemeral.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.read().expect("addr lock poisoned")
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        self.inner.intents.snapshot()
    }

    // ---- listeners ----

    pub fn add_listener(
        &self,
        kind: NotificationKind,
        scope: impl Into<Scope>,
        listener: DynListener,
    ) -> Result<ListenerId> {
        let scope = scope.into();
        if let Scope::Channels(ids) = &scope {
            for id in ids {
                validate_channel_id(id)?;
            }
        }
        self.inner.registry.register(kind, scope, listener)
    }

    pub fn on_upload<L: Listener + 'static>(
        &self,
        scope: impl Into<Scope>,
        listener: L,
    ) -> Result<ListenerId> {
        self.add_listener(NotificationKind::Upload, scope, Arc::new(listener))
    }

    pub fn on_edit<L: Listener + 'static>(
        &self,
        scope: impl Into<Scope>,
        listener: L,
    ) -> Result<ListenerId> {
        self.add_listener(NotificationKind::Edit, scope, Arc::new(listener))
    }

    pub fn on_any<L: Listener + 'static>(
        &self,
        scope: impl Into<Scope>,
        listener: L,
    ) -> Result<ListenerId> {
        self.add_listener(NotificationKind::Any, scope, Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.registry.remove(id)
    }

    // ---- subscriptions ----

    /// Queue `ids` until ready; once ready, verify the ones not yet
    /// subscribed, then add each to the set as soon as the hub accepts it.
    pub async fn subscribe<I, S>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = checked_ids(ids)?;

        if !self.is_ready() {
            tracing::debug!(target: "notifier", count = ids.len(), "queueing subscriptions until ready");
            self.inner.intents.insert_all(&ids);
            return Ok(());
        }

        let fresh: Vec<String> = ids
            .into_iter()
            .filter(|id| !self.inner.intents.contains(id))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        self.inner.hub.verify_channel_ids(&fresh).await?;
        // one at a time, so a failure keeps the ones the hub already accepted
        for id in &fresh {
            let id = std::slice::from_ref(id);
            self.register(id, Mode::Subscribe).await?;
            self.inner.intents.insert_all(id);
        }
        Ok(())
    }

    /// Drop `ids` from the set; when ready, unsubscribe the ones that were in it.
    pub async fn unsubscribe<I, S>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids = checked_ids(ids)?;
        let removed = self.inner.intents.remove_all(&ids);
        if removed.is_empty() || !self.is_ready() {
            return Ok(());
        }
        self.register(&removed, Mode::Unsubscribe).await
    }

    async fn register(&self, ids: &[String], mode: Mode) -> Result<()> {
        let callback_url = self
            .callback_url()
            .ok_or_else(|| NotifierError::NotReady {
                mode,
                channel_id: ids.first().cloned().unwrap_or_default(),
            })?;
        let target = CallbackTarget {
            callback_url: &callback_url,
            secret: &self.inner.secret,
        };
        self.inner.hub.register(ids, mode, target).await
    }

    // ---- lifecycle ----

    /// Ask a running `run` to shut down.
    pub fn stop(&self) {
        tracing::debug!(target: "notifier", "stop requested");
        self.inner.ready.store(false, Ordering::SeqCst);
        self.inner
            .stop
            .lock()
            .expect("stop lock poisoned")
            .cancel();
    }

    /// `run` until [`Notifier::stop`] is called.
    pub async fn serve(&self) -> Result<()> {
        self.run(CancellationToken::new()).await
    }

    /// Spawn [`Notifier::serve`] on the current runtime. The run is claimed
    /// before this returns, so an immediate `stop` is honoured.
    pub fn run_in_background(&self) -> JoinHandle<Result<()>> {
        let this = self.clone();
        let started = self.begin_run();
        tokio::spawn(async move {
            let stop = started?;
            this.finish_run(stop, CancellationToken::new()).await
        })
    }

    /// Full lifecycle. Returns after `cancel` fires (or `stop` is called)
    /// and the shutdown sweep has finished.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let stop = self.begin_run()?;
        self.finish_run(stop, cancel).await
    }

    /// Mark the notifier running and install the token `stop` cancels.
    /// Both happen under the stop lock, so no `stop` falls between them.
    fn begin_run(&self) -> Result<CancellationToken> {
        let mut guard = self.inner.stop.lock().expect("stop lock poisoned");
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(NotifierError::InvalidArgument("notifier is already running".into()));
        }
        *guard = CancellationToken::new();
        Ok(guard.clone())
    }

    async fn finish_run(&self, stop: CancellationToken, cancel: CancellationToken) -> Result<()> {
        let result = self.run_inner(stop, cancel).await;
        self.inner.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self, stop: CancellationToken, cancel: CancellationToken) -> Result<()> {
        let cfg = &self.inner.config;
        let listener = TcpListener::bind((cfg.host.as_str(), cfg.port)).await?;
        let local = listener.local_addr()?;
        *self.inner.local_addr.write().expect("addr lock poisoned") = Some(local);

        let (callback, tunnel) = self.resolve_callback(local).await?;
        // fold the caller's token into ours
        let forward = {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => stop.cancel(),
                    _ = stop.cancelled() => {}
                }
            })
        };
        tracing::info!(target: "notifier", %local, callback_url = %callback, "callback address");
        self.inner.pipeline.set_accepting(true);

        let server_token = CancellationToken::new();
        let mut server = tokio::spawn(serve_app(listener, self.app(), server_token.clone()));
        let mut server_exited = false;
        let renewal_token = CancellationToken::new();

        let became_ready = tokio::select! {
            _ = self.wait_until_ready(&callback) => true,
            _ = stop.cancelled() => false,
            res = &mut server => {
                log_server_exit(res);
                server_exited = true;
                false
            }
        };

        if became_ready && !stop.is_cancelled() {
            self.inner.ready.store(true, Ordering::SeqCst);
            tracing::info!(target: "notifier", "ready to receive push notifications");
            self.flush_intents().await;
            self.spawn_renewal(renewal_token.clone());

            tokio::select! {
                _ = stop.cancelled() => {}
                res = &mut server => {
                    log_server_exit(res);
                    server_exited = true;
                }
            }
        }

        // shutdown
        self.inner.ready.store(false, Ordering::SeqCst);
        self.inner.pipeline.set_accepting(false);
        renewal_token.cancel();
        tracing::info!(target: "notifier", "shutting down");

        if became_ready && tunnel.is_none() {
            self.unsubscribe_all(local, &callback, server_exited).await;
        }

        server_token.cancel();
        if !server_exited {
            log_server_exit(server.await);
        }
        if let Some(t) = tunnel {
            if let Err(e) = t.close().await {
                tracing::warn!(target: "notifier", error = %e, "closing tunnel failed");
            }
        }
        stop.cancel();
        let _ = forward.await;
        tracing::info!(target: "notifier", "stopped");
        Ok(())
    }

    async fn resolve_callback(&self, local: SocketAddr) -> Result<(String, Option<Box<dyn Tunnel>>)> {
        let cfg = &self.inner.config;
        let (url, tunnel) = match &cfg.callback_url {
            Some(url) => (url.clone(), None),
            None => {
                let t = self.inner.tunnel.open(local).await?;
                let url = format!("{}{}", t.public_url(), cfg.endpoint);
                (url, Some(t))
            }
        };
        self.inner
            .ephemeral
            .store(tunnel.is_some(), Ordering::SeqCst);
        *self
            .inner
            .callback_url
            .write()
            .expect("callback lock poisoned") = Some(url.clone());
        Ok((url, tunnel))
    }

    fn app(&self) -> Router {
        let router = api::router(self.inner.pipeline.clone(), &self.inner.config.route_path());
        match &self.inner.routes {
            Some(extra) => router.merge(extra.clone()),
            None => router,
        }
    }

    async fn wait_until_ready(&self, callback: &str) {
        let poll = self.inner.config.readiness_poll();
        while !self.inner.hub.callback_reachable(callback).await {
            tokio::time::sleep(poll).await;
        }
    }

    async fn flush_intents(&self) {
        let ids = self.inner.intents.snapshot();
        if ids.is_empty() {
            return;
        }
        tracing::info!(target: "notifier", count = ids.len(), "subscribing queued channels");
        let res = match self.inner.hub.verify_channel_ids(&ids).await {
            Ok(()) => self.register(&ids, Mode::Subscribe).await,
            Err(e) => Err(e),
        };
        if let Err(e) = res {
            tracing::warn!(target: "notifier", error = %e, "initial subscription failed; renewal will retry");
        }
    }

    fn spawn_renewal(&self, token: CancellationToken) {
        let this = self.clone();
        let every = self.inner.config.renewal_interval();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut ticker = tokio::time::interval_at(start, every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let ids = this.inner.intents.snapshot();
                if ids.is_empty() {
                    continue;
                }
                tracing::debug!(target: "notifier", count = ids.len(), "renewing subscriptions");
                if let Err(e) = this.register(&ids, Mode::Subscribe).await {
                    counter!("notifier_renewal_failures_total").increment(1);
                    tracing::warn!(target: "notifier", error = %e, "renewal failed");
                }
            }
        });
    }

    /// Best-effort unsubscribe of the whole set. The hub verifies through our
    /// callback, so a temporary server is brought up if ours already exited.
    async fn unsubscribe_all(&self, local: SocketAddr, callback: &str, server_exited: bool) {
        let ids = self.inner.intents.snapshot();
        if ids.is_empty() {
            return;
        }

        let mut temporary = None;
        if server_exited {
            tracing::debug!(target: "notifier", "starting temporary server to unsubscribe");
            match TcpListener::bind(local).await {
                Ok(listener) => {
                    let token = CancellationToken::new();
                    let handle = tokio::spawn(serve_app(listener, self.app(), token.clone()));
                    temporary = Some((token, handle));
                }
                Err(e) => {
                    tracing::warn!(target: "notifier", error = %e, "cannot rebind for unsubscription");
                    return;
                }
            }
            if tokio::time::timeout(SHUTDOWN_READY_TIMEOUT, self.wait_until_ready(callback))
                .await
                .is_err()
            {
                tracing::warn!(target: "notifier", "temporary server never became reachable");
            }
        }

        if let Err(e) = self.register(&ids, Mode::Unsubscribe).await {
            tracing::warn!(target: "notifier", error = %e, "shutdown unsubscription failed");
        }

        if let Some((token, handle)) = temporary {
            token.cancel();
            log_server_exit(handle.await);
        }
    }
}

fn checked_ids<I, S>(ids: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
    for id in &ids {
        validate_channel_id(id)?;
    }
    Ok(ids)
}

async fn serve_app(listener: TcpListener, app: Router, token: CancellationToken) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}

fn log_server_exit(res: std::result::Result<std::io::Result<()>, tokio::task::JoinError>) {
    match res {
        Ok(Ok(())) => tracing::debug!(target: "notifier", "server exited"),
        Ok(Err(e)) => tracing::warn!(target: "notifier", error = %e, "server failed"),
        Err(e) => tracing::warn!(target: "notifier", error = %e, "server task panicked"),
    }
}
