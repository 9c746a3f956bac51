//! Snapshot materialization after commits, against a mock generator

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::*;
use xfsync::backend::server::SyncServices;
use xfsync::backend::versioning::{HttpSnapshotGenerator, VersionStore};
use xfsync::shared::config::VersioningConfig;
use xfsync::shared::{AppConfig, BindResponse, DataType, VersionChangedEvent};

fn versioning_config(server: &MockServer) -> AppConfig {
    AppConfig::builder()
        .jwt_secret(SECRET)
        .sync(test_sync_config())
        .versioning(VersioningConfig {
            generator_url: Some(format!("{}/snapshots", server.uri())),
            min_update_interval_secs: 0,
            min_cmd_count: 1,
            ..VersioningConfig::default()
        })
        .build()
        .expect("versioning config is valid")
}

fn services_for(config: &AppConfig) -> Arc<SyncServices> {
    let mut backends = backends(config);
    let url = config.versioning.generator_url.clone().expect("generator url");
    let generator = HttpSnapshotGenerator::new(url, Duration::from_secs(5)).expect("generator client");
    backends.generator = Some(Arc::new(generator));
    Arc::new(SyncServices::assemble(backends, config))
}

#[tokio::test]
async fn test_commit_materializes_and_notifies_bound_sessions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/snapshots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "versionId": "v-1",
            "lastCmdVerId": 2
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let config = versioning_config(&server);
    let services = services_for(&config);
    let mut alice = SessionDriver::connect(services.clone(), EDITOR);
    alice.join(DOC, 0).await;

    ok_reply(alice.request(DataType::Op, commit_data(&["a", "b"])).await);

    let pushed = alice.push(DataType::Version).await;
    let event: VersionChangedEvent = pushed.payload().unwrap();
    assert_eq!(event.document_id, DOC);
    assert_eq!(event.version_id, "v-1");
    assert_eq!(event.version_start_with, 1);
    assert_eq!(event.last_cmd_ver_id, 2);

    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["documentInfo"]["id"], DOC);
    assert_eq!(body["cmdItemList"].as_array().map(Vec::len), Some(2));
    assert!(body["lastVersion"].is_null());

    let latest = services.versions.latest(DOC).await.unwrap().expect("version recorded");
    assert_eq!(latest.version_id, "v-1");

    // a new session binds to the snapshot and catches up from after it
    let mut bob = SessionDriver::connect(services.clone(), OWNER);
    let bound: BindResponse = ok_reply(bob.bind(DOC).await).payload().unwrap();
    assert_eq!(bound.version_id, "v-1");
    ok_reply(bob.start(0).await);
    assert!(op_items(&bob.push(DataType::Op).await).is_empty());

    let mut carol = SessionDriver::connect(services, READER);
    carol.join(DOC, 1).await;
    assert_eq!(ver_ids(&op_items(&carol.push(DataType::Op).await)), vec![2]);

    alice.close().await;
    bob.close().await;
    carol.close().await;
}

#[tokio::test]
async fn test_generator_failure_keeps_previous_version() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/snapshots"))
        .respond_with(ResponseTemplate::new(500).set_body_string("generator down"))
        .mount(&server)
        .await;

    let config = versioning_config(&server);
    let services = services_for(&config);
    let mut alice = SessionDriver::connect(services.clone(), EDITOR);
    alice.join(DOC, 0).await;

    ok_reply(alice.request(DataType::Op, commit_data(&["a"])).await);
    alice.expect_no_push(DataType::Version, Duration::from_millis(500)).await;

    assert!(!server.received_requests().await.unwrap_or_default().is_empty());
    assert_eq!(services.versions.latest(DOC).await.unwrap(), None);
    let bound: BindResponse = ok_reply(alice.bind(DOC).await).payload().unwrap();
    assert_eq!(bound.version_id, "v0");

    // the commit itself was not affected
    assert_eq!(ver_ids(&services.oplog.pull(DOC, 1, 0).await.unwrap()), vec![1]);
    alice.close().await;
}

#[tokio::test]
async fn test_without_generator_commits_only() {
    let services = services();
    assert!(services.materializer.is_none());

    let mut alice = SessionDriver::connect(services.clone(), EDITOR);
    alice.join(DOC, 0).await;
    ok_reply(alice.request(DataType::Op, commit_data(&["a"])).await);
    alice.expect_no_push(DataType::Version, Duration::from_millis(200)).await;
    assert_eq!(services.versions.latest(DOC).await.unwrap(), None);
    alice.close().await;
}

#[tokio::test]
async fn test_burst_of_commits_materializes_once_per_interval() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/snapshots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "versionId": "v-burst" })))
        .mount(&server)
        .await;

    let mut config = versioning_config(&server);
    config.versioning.min_update_interval_secs = 60;
    let fleet_backends = backends(&config);
    let url = config.versioning.generator_url.clone().expect("generator url");
    let generator: Arc<HttpSnapshotGenerator> =
        Arc::new(HttpSnapshotGenerator::new(url, Duration::from_secs(5)).expect("generator client"));

    // two processes over the same backends
    let processes: Vec<Arc<SyncServices>> = (0..2)
        .map(|_| {
            let mut backends = fleet_backends.clone();
            backends.generator = Some(generator.clone());
            Arc::new(SyncServices::assemble(backends, &config))
        })
        .collect();

    let mut drivers = Vec::new();
    for services in &processes {
        let mut driver = SessionDriver::connect(services.clone(), EDITOR);
        driver.join(DOC, 0).await;
        drivers.push(driver);
    }
    for round in 0..10 {
        for (p, driver) in drivers.iter_mut().enumerate() {
            let id = format!("r{}-p{}", round, p);
            ok_reply(driver.request(DataType::Op, commit_data(&[id.as_str()])).await);
        }
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1);
    let latest = processes[0].versions.latest(DOC).await.unwrap().expect("version recorded");
    assert_eq!(latest.version_id, "v-burst");

    for driver in drivers {
        driver.close().await;
    }
}
