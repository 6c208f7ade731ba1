//! # Webhook ingestion pipeline
//! Authenticates, parses, classifies and dispatches hub deliveries.
//!
//! Order of work for one POST:
//! 1. signature check on the raw body (nothing is parsed before this),
//! 2. Atom decode; a tombstone feed is acknowledged and dropped,
//! 3. per entry: channels we no longer want are unsubscribed and skipped,
//!    everything else is classified and handed to the listeners in order.
//!
//! Classification and the history write happen under one lock, so two
//! concurrent deliveries of the same new video cannot both be UPLOAD.
//! The lock is released before listeners run.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::feed::{Feed, FeedError};
use crate::history::VideoHistory;
use crate::hub::{CallbackTarget, HubClient, IntentSet, Mode};
use crate::model::{NotificationKind, Video};
use crate::registry::ListenerRegistry;
use crate::signature;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("missing hub.challenge")]
    MissingChallenge,

    #[error("unauthorized: {0}")]
    Unauthorized(#[from] signature::SignatureError),

    #[error("{0}")]
    Parse(FeedError),

    #[error("{0}")]
    Structural(FeedError),

    #[error("history store: {0}")]
    History(#[from] io::Error),

    #[error("shutting down")]
    ShuttingDown,
}

impl From<FeedError> for DeliveryError {
    fn from(e: FeedError) -> Self {
        if e.is_parse() {
            DeliveryError::Parse(e)
        } else {
            DeliveryError::Structural(e)
        }
    }
}

impl DeliveryError {
    pub fn status(&self) -> StatusCode {
        match self {
            DeliveryError::MissingChallenge | DeliveryError::Parse(_) => StatusCode::BAD_REQUEST,
            DeliveryError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DeliveryError::Structural(_) | DeliveryError::History(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DeliveryError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// What happened to one accepted delivery.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub tombstone: bool,
    pub dispatched: Vec<(String, NotificationKind)>,
    pub stale_channels: Vec<String>,
}

/// `published == updated` is UPLOAD without asking the history; otherwise
/// a video we have seen before is an EDIT.
pub async fn classify(history: &dyn VideoHistory, video: &Video) -> io::Result<NotificationKind> {
    if video.timestamp.is_first_publication() {
        return Ok(NotificationKind::Upload);
    }
    Ok(if history.has(video).await? {
        NotificationKind::Edit
    } else {
        NotificationKind::Upload
    })
}

/// Echo the hub's verification token.
pub fn answer_challenge(token: Option<&str>) -> Result<String, DeliveryError> {
    token.map(str::to_string).ok_or(DeliveryError::MissingChallenge)
}

pub struct Pipeline {
    registry: Arc<ListenerRegistry>,
    history: Arc<dyn VideoHistory>,
    intents: Arc<IntentSet>,
    hub: HubClient,
    secret: String,
    callback_url: Arc<RwLock<Option<String>>>,
    classify_lock: Mutex<()>,
    accepting: AtomicBool,
}

impl Pipeline {
    pub fn new(
        registry: Arc<ListenerRegistry>,
        history: Arc<dyn VideoHistory>,
        intents: Arc<IntentSet>,
        hub: HubClient,
        secret: String,
        callback_url: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            registry,
            history,
            intents,
            hub,
            secret,
            callback_url,
            classify_lock: Mutex::new(()),
            accepting: AtomicBool::new(true),
        }
    }

    pub fn history(&self) -> &Arc<dyn VideoHistory> {
        &self.history
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Handle one POST body. `signature_header` is the raw `X-Hub-Signature`.
    pub async fn deliver(
        &self,
        signature_header: Option<&str>,
        body: &[u8],
    ) -> Result<DeliveryReport, DeliveryError> {
        if !self.is_accepting() {
            return Err(DeliveryError::ShuttingDown);
        }
        counter!("notifier_deliveries_total").increment(1);

        if !self.secret.is_empty() {
            if let Err(e) = signature::verify(self.secret.as_bytes(), body, signature_header) {
                counter!("notifier_auth_failures_total").increment(1);
                tracing::warn!(target: "webhook", error = %e, "rejected delivery");
                return Err(e.into());
            }
        }

        let feed = Feed::parse(body).map_err(|e| {
            counter!("notifier_parse_failures_total").increment(1);
            tracing::warn!(target: "webhook", error = %e, "unparseable delivery");
            DeliveryError::from(e)
        })?;

        let mut report = DeliveryReport::default();
        if let Some(t) = feed.tombstone() {
            tracing::debug!(target: "webhook", reference = ?t.reference, when = ?t.when, "ignoring deleted entry");
            report.tombstone = true;
            return Ok(report);
        }

        for entry in feed.entries() {
            let channel_id = entry.channel_id().map_err(structural)?;
            if !self.intents.contains(channel_id) {
                self.drop_stale(channel_id).await;
                report.stale_channels.push(channel_id.to_string());
                continue;
            }

            let video = feed.to_video(entry).map_err(structural)?;
            let kind = self.classify_and_record(&video).await?;
            tracing::debug!(
                target: "webhook",
                video_id = %video.id,
                channel_id = %video.channel.id,
                kind = %kind,
                "delivery classified"
            );
            counter!("notifier_notifications_total", "kind" => kind.as_str()).increment(1);

            for listener in self.registry.lookup(kind, &video.channel.id) {
                listener.on_video(&video).await;
            }
            report.dispatched.push((video.id, kind));
        }

        Ok(report)
    }

    async fn classify_and_record(&self, video: &Video) -> Result<NotificationKind, DeliveryError> {
        let _guard = self.classify_lock.lock().await;
        let kind = classify(self.history.as_ref(), video).await?;
        if kind == NotificationKind::Upload {
            self.history.add(video).await?;
        }
        Ok(kind)
    }

    /// The hub is still pushing a channel nobody asked for; tell it to stop.
    async fn drop_stale(&self, channel_id: &str) {
        counter!("notifier_stale_channels_total").increment(1);
        let callback = self
            .callback_url
            .read()
            .expect("callback lock poisoned")
            .clone();
        let Some(callback_url) = callback else {
            tracing::warn!(target: "webhook", channel_id = %channel_id, "stale channel but no callback url yet");
            return;
        };

        tracing::info!(target: "webhook", channel_id = %channel_id, "unsubscribing unrequested channel");
        let target = CallbackTarget {
            callback_url: &callback_url,
            secret: &self.secret,
        };
        if let Err(e) = self
            .hub
            .register(&[channel_id.to_string()], Mode::Unsubscribe, target)
            .await
        {
            tracing::warn!(target: "webhook", channel_id = %channel_id, error = %e, "stale unsubscribe failed");
        }
    }
}

fn structural(e: FeedError) -> DeliveryError {
    tracing::error!(target: "webhook", error = %e, "delivery does not match the expected schema");
    DeliveryError::Structural(e)
}
