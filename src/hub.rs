//! # Hub subscription client
//! Talks to the WebSub hub (subscribe / unsubscribe) and to the content
//! provider (channel existence check).
//!
//! Batches are processed sequentially, one channel at a time; the first
//! failure aborts the rest of the batch. Renewal is just another
//! `subscribe` replay.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::RwLock;

use metrics::{counter, gauge};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::NotifierConfig;
use crate::error::{NotifierError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Subscribe,
    Unsubscribe,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Subscribe => "subscribe",
            Mode::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the hub lives and how topics / channel pages are addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubEndpoints {
    pub hub_url: String,
    /// Prefix the channel ID is appended to, forming `hub.topic`.
    pub topic_base: String,
    /// Prefix the channel ID is appended to for the existence check.
    pub channel_base: String,
}

impl HubEndpoints {
    pub fn topic_for(&self, channel_id: &str) -> String {
        format!("{}{}", self.topic_base, channel_id)
    }

    pub fn channel_page_for(&self, channel_id: &str) -> String {
        format!("{}{}", self.channel_base, channel_id)
    }
}

impl From<&NotifierConfig> for HubEndpoints {
    fn from(cfg: &NotifierConfig) -> Self {
        Self {
            hub_url: cfg.hub_url.clone(),
            topic_base: cfg.topic_base.clone(),
            channel_base: cfg.channel_base.clone(),
        }
    }
}

/// What the hub needs to know about us for a registration.
#[derive(Debug, Clone, Copy)]
pub struct CallbackTarget<'a> {
    pub callback_url: &'a str,
    pub secret: &'a str,
}

#[derive(Debug, Clone)]
pub struct HubClient {
    http: Client,
    endpoints: HubEndpoints,
    lease_seconds: Option<u64>,
}

impl HubClient {
    pub fn new(endpoints: HubEndpoints, lease_seconds: Option<u64>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("push-notifier/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoints,
            lease_seconds,
        })
    }

    pub fn from_config(cfg: &NotifierConfig) -> Result<Self> {
        Self::new(HubEndpoints::from(cfg), cfg.lease_seconds)
    }

    pub fn endpoints(&self) -> &HubEndpoints {
        &self.endpoints
    }

    /// HEAD every channel page; the first non-success aborts the batch.
    pub async fn verify_channel_ids(&self, ids: &[String]) -> Result<()> {
        for channel_id in ids {
            let url = self.endpoints.channel_page_for(channel_id);
            let resp = self.http.head(&url).send().await?;
            let status = resp.status();
            if !status.is_success() {
                tracing::warn!(target: "hub", channel_id = %channel_id, status = status.as_u16(), "channel check failed");
                return Err(NotifierError::InvalidChannel {
                    channel_id: channel_id.clone(),
                    status: status.as_u16(),
                });
            }
            tracing::debug!(target: "hub", channel_id = %channel_id, "channel verified");
        }
        Ok(())
    }

    /// Send a signed `mode` request for each channel in order.
    pub async fn register(
        &self,
        ids: &[String],
        mode: Mode,
        target: CallbackTarget<'_>,
    ) -> Result<()> {
        for channel_id in ids {
            self.register_one(channel_id, mode, target).await?;
        }
        Ok(())
    }

    async fn register_one(
        &self,
        channel_id: &str,
        mode: Mode,
        target: CallbackTarget<'_>,
    ) -> Result<()> {
        tracing::debug!(target: "hub", channel_id = %channel_id, mode = %mode, "sending hub request");
        counter!("notifier_hub_requests_total", "mode" => mode.as_str()).increment(1);

        let topic = self.endpoints.topic_for(channel_id);
        let lease = self
            .lease_seconds
            .map(|s| s.to_string())
            .unwrap_or_default();
        let form = [
            ("hub.mode", mode.as_str()),
            ("hub.topic", topic.as_str()),
            ("hub.callback", target.callback_url),
            ("hub.verify", "sync"),
            ("hub.secret", target.secret),
            ("hub.lease_seconds", lease.as_str()),
            ("hub.verify_token", ""),
        ];

        let resp = self
            .http
            .post(&self.endpoints.hub_url)
            .form(&form)
            .send()
            .await?;
        let status = resp.status();

        if status == StatusCode::CONFLICT && !self.callback_reachable(target.callback_url).await {
            return Err(NotifierError::NotReady {
                mode,
                channel_id: channel_id.to_string(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(
                target: "hub",
                channel_id = %channel_id,
                mode = %mode,
                status = status.as_u16(),
                body = %body.trim(),
                "hub rejected request"
            );
            return Err(NotifierError::Hub {
                mode,
                channel_id: channel_id.to_string(),
                status: status.as_u16(),
            });
        }

        tracing::info!(target: "hub", channel_id = %channel_id, "successfully {mode}d channel");
        Ok(())
    }

    /// Does our callback answer a synthetic challenge with 200?
    pub async fn callback_reachable(&self, callback_url: &str) -> bool {
        match self
            .http
            .head(callback_url)
            .query(&[("hub.challenge", "1")])
            .send()
            .await
        {
            Ok(resp) => resp.status() == StatusCode::OK,
            Err(e) => {
                tracing::trace!(target: "hub", error = %e, "callback unreachable");
                false
            }
        }
    }
}

/// Channel IDs the caller wants subscribed. In memory only; a restarted
/// process starts empty.
#[derive(Debug, Default)]
pub struct IntentSet {
    ids: RwLock<BTreeSet<String>>,
}

impl IntentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.ids
            .read()
            .expect("intent lock poisoned")
            .contains(channel_id)
    }

    /// Add `ids`, returning the ones that were not there yet.
    pub fn insert_all(&self, ids: &[String]) -> Vec<String> {
        let mut set = self.ids.write().expect("intent lock poisoned");
        let added = ids.iter().filter(|id| set.insert((*id).clone())).cloned().collect();
        gauge!("notifier_subscribed_channels").set(set.len() as f64);
        added
    }

    /// Remove `ids`, returning the ones that were present.
    pub fn remove_all(&self, ids: &[String]) -> Vec<String> {
        let mut set = self.ids.write().expect("intent lock poisoned");
        let removed = ids.iter().filter(|id| set.remove(id.as_str())).cloned().collect();
        gauge!("notifier_subscribed_channels").set(set.len() as f64);
        removed
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.ids
            .read()
            .expect("intent lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ids.read().expect("intent lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
