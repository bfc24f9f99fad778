//! End-to-end cycles against mocked upstreams and an on-disk store

use std::collections::HashMap;
use std::sync::Arc;

use coinkit::alerting::{AlertDispatcher, DiscordWebhookSink, Engine, Scheduler};
use coinkit::config::{DatabaseConfig, EngineConfig, NotifierConfig};
use coinkit::db::Database;
use coinkit::models::{AlertKind, MoveBand, Severity};
use coinkit::sources::{SiloAdapter, SourceAdapter};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve_silo_apr(server: &MockServer, apr: &str) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/api/lending-market/avalanche/142"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "silo1": {"debtBaseApr": apr}
        })))
        .mount(server)
        .await;
}

async fn open_db(dir: &tempfile::TempDir) -> Database {
    let url = format!("sqlite://{}", dir.path().join("coinkit.db").display());
    Database::new(&DatabaseConfig { url }).await.unwrap()
}

fn silo(server: &MockServer) -> Vec<Arc<dyn SourceAdapter>> {
    vec![Arc::new(SiloAdapter::with_base_url(reqwest::Client::new(), server.uri()))]
}

#[tokio::test]
async fn anchor_survives_restarts_and_drift_adds_up() {
    let upstream = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // 8.0%
    serve_silo_apr(&upstream, "80000000000000000").await;
    {
        let db = open_db(&dir).await;
        let engine = Engine::new(silo(&upstream), &db, &EngineConfig::default());
        let report = engine.run_cycle().await.unwrap();

        assert_eq!(report.alerts.len(), 1);
        assert!(matches!(report.alerts[0].kind, AlertKind::AnchorSet { .. }));
        assert_eq!(report.alerts[0].adapter_tag.as_deref(), Some("silo"));
    }

    // Reopen the store: 8.6% is only 0.6 points off the anchor
    serve_silo_apr(&upstream, "86000000000000000").await;
    let db = open_db(&dir).await;
    let engine = Engine::new(silo(&upstream), &db, &EngineConfig::default());
    assert!(engine.run_cycle().await.unwrap().alerts.is_empty());

    // 9.1% is a full point off the first anchor
    serve_silo_apr(&upstream, "91000000000000000").await;
    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.alerts.len(), 1);
    match &report.alerts[0].kind {
        AlertKind::RateMoved { band, anchor, current, .. } => {
            assert_eq!(*band, MoveBand::Minor);
            assert!((anchor - 0.08).abs() < 1e-12);
            assert!((current - 0.091).abs() < 1e-12);
        }
        other => panic!("unexpected alert {other:?}"),
    }
    assert_eq!(report.alerts[0].severity, Severity::Minor);

    let anchor = db.metrics.get_last("silo:usdc:borrow:rate:anchor").await.unwrap();
    assert_eq!(anchor, Some(0.091));
}

#[tokio::test]
async fn tick_routes_alerts_to_the_adapter_webhook() {
    let upstream = MockServer::start().await;
    let discord = MockServer::start().await;
    serve_silo_apr(&upstream, "186000000000000000").await;
    Mock::given(method("POST"))
        .and(path("/silo"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&discord)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db = open_db(&dir).await;
    let engine = Arc::new(Engine::new(silo(&upstream), &db, &EngineConfig::default()));
    let notifier = NotifierConfig {
        routes: HashMap::from([("silo".to_string(), format!("{}/silo", discord.uri()))]),
        ..Default::default()
    };
    let sink = Arc::new(DiscordWebhookSink::new(Duration::from_secs(5)).unwrap());
    let dispatcher = Arc::new(AlertDispatcher::new(sink, &notifier, db.subscriptions.clone()));

    let report = Scheduler::new(engine, dispatcher, Duration::from_secs(300))
        .tick()
        .await
        .unwrap();

    assert_eq!(report.alerts.len(), 1);

    let requests = discord.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(
        body["content"],
        ":smirk_cat: Silo savUSD/USDC Borrow APR anchor set: 18.60%"
    );
}

#[tokio::test]
async fn upstream_outage_is_reported_not_fatal() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&upstream)
        .await;

    let db = Database::in_memory();
    let engine = Engine::new(silo(&upstream), &db, &EngineConfig::default());
    let report = engine.run_cycle().await.unwrap();

    assert!(report.alerts.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].adapter, "silo");
    assert!(db.visible_metrics().await.unwrap().is_empty());
}
