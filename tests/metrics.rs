// tests/metrics.rs
use std::sync::{Arc, RwLock};

use axum::body::{self, Body};
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use push_notifier::api;
use push_notifier::history::InMemoryHistory;
use push_notifier::hub::{HubClient, HubEndpoints, IntentSet};
use push_notifier::metrics::Metrics;
use push_notifier::registry::ListenerRegistry;
use push_notifier::webhook::Pipeline;

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    // one recorder per process; this is the only test in the binary
    let metrics = Metrics::init().expect("install recorder");

    let hub = HubClient::new(
        HubEndpoints {
            hub_url: "http://127.0.0.1:9/".into(),
            topic_base: "t=".into(),
            channel_base: "c/".into(),
        },
        None,
    )
    .unwrap();
    let pipeline = Pipeline::new(
        Arc::new(ListenerRegistry::new()),
        Arc::new(InMemoryHistory::default()),
        Arc::new(IntentSet::new()),
        hub,
        "secret".into(),
        Arc::new(RwLock::new(None)),
    );
    let app = api::router(Arc::new(pipeline), "/").merge(metrics.router());

    // unsigned → auth failure, still counted as a delivery
    let resp = app
        .clone()
        .oneshot(Request::post("/").body(Body::from("<feed/>")).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        push_notifier::metrics::CONTENT_TYPE
    );
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in ["notifier_deliveries_total", "notifier_auth_failures_total"] {
        assert!(text.contains(needle), "missing {needle} in:\n{text}");
    }
}
