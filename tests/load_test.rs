//! Concurrency tests against a live gateway.

use std::time::Duration;

use axum::http::StatusCode;
use futures_util::future::join_all;
use marketplace_gateway::config::RateLimitRuleConfig;

mod common;

use common::{base_config, client, cluster, route, start_gateway};

#[tokio::test]
async fn concurrent_requests_all_succeed() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;

    let mut config = base_config();
    config
        .reverse_proxy
        .clusters
        .insert("catalog".into(), cluster(&[("c1", a), ("c2", b)]));
    config.reverse_proxy.routes = vec![route("catalog", "/api/catalog/*", "catalog", None)];
    let gw = start_gateway(config).await;

    let client = client();
    let requests = (0..50).map(|i| {
        let client = client.clone();
        let url = gw.url(&format!("/api/catalog/items/{}", i));
        async move { client.get(url).send().await.map(|r| r.status()) }
    });
    let results = join_all(requests).await;

    let ok = results
        .iter()
        .filter(|r| matches!(r, Ok(s) if *s == StatusCode::OK))
        .count();
    assert_eq!(ok, 50);

    // In-flight slots are released once each response body finishes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    for member in gw.snapshot.load().clusters.all_backends() {
        assert_eq!(member.active_requests(), 0);
    }
}

#[tokio::test]
async fn quota_holds_under_concurrency() {
    let backend = common::start_mock_backend("ok").await;

    let mut config = base_config();
    config.ip_rate_limiting.rules = vec![RateLimitRuleConfig {
        endpoint: "*".into(),
        period: Duration::from_secs(3600),
        limit: 20,
    }];
    config
        .reverse_proxy
        .clusters
        .insert("order".into(), cluster(&[("o1", backend)]));
    config.reverse_proxy.routes = vec![route("orders", "/api/orders/*", "order", None)];
    let gw = start_gateway(config).await;

    let client = client();
    let requests = (0..50).map(|_| {
        let client = client.clone();
        let url = gw.url("/api/orders/1");
        async move { client.get(url).send().await.map(|r| r.status()) }
    });
    let results = join_all(requests).await;

    let admitted = results
        .iter()
        .filter(|r| matches!(r, Ok(s) if *s == StatusCode::OK))
        .count();
    let limited = results
        .iter()
        .filter(|r| matches!(r, Ok(s) if *s == StatusCode::TOO_MANY_REQUESTS))
        .count();
    assert_eq!(admitted, 20);
    assert_eq!(limited, 30);
}
