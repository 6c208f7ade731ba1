use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Prometheus text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Only one recorder may exist per
    /// process; a second call fails.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        describe();
        Ok(Self { handle })
    }

    /// `GET /metrics`, mergeable next to the callback route.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(render))
            .with_state(self.handle.clone())
    }
}

async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], handle.render())
}

/// Register help text for every series the notifier emits.
pub fn describe() {
    DESCRIBED.get_or_init(|| {
        describe_counter!("notifier_deliveries_total", "POST deliveries received");
        describe_counter!(
            "notifier_notifications_total",
            "Classified videos handed to listeners, by kind"
        );
        describe_counter!("notifier_auth_failures_total", "Deliveries with a bad signature");
        describe_counter!("notifier_parse_failures_total", "Deliveries that were not a valid feed");
        describe_counter!(
            "notifier_stale_channels_total",
            "Deliveries for channels outside the subscription set"
        );
        describe_counter!("notifier_hub_requests_total", "Hub requests sent, by mode");
        describe_counter!("notifier_renewal_failures_total", "Failed renewal ticks");
        describe_gauge!("notifier_subscribed_channels", "Channels in the subscription set");
    });
}
