//! Reconciliation through the HTTP platform client and a real session.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rio_auth::config::{PASSWORD, PROJECT_ID, USERNAME};
use rio_auth::{Method, MockTransport, PlatformConfig, Session, SessionSettings, StaticConfig};
use rio_control::{HttpPlatformClient, NetworkSpec, ReconcileOptions, Reconciler};
use rio_store::{Credential, MemoryStore, StoreExt};
use serde_json::json;

const LOGIN: &str = "https://auth.test/user/login";
const NETWORKS: &str = "https://catalog.test/routednetwork";

fn reconciler(
    transport: Arc<MockTransport>,
    store: Arc<MemoryStore>,
    config: StaticConfig,
) -> Reconciler {
    let settings = SessionSettings {
        login_url: LOGIN.to_string(),
        token_validity: Duration::from_secs(3600),
        expiry_skew: Duration::from_secs(60),
    };
    let session = Session::new(transport, store, Arc::new(config), &settings);
    let platform = PlatformConfig {
        catalog_host: "https://catalog.test".to_string(),
        core_host: "https://core.test".to_string(),
        ..PlatformConfig::default()
    };
    Reconciler::new(Arc::new(HttpPlatformClient::new(Arc::new(session), &platform)))
}

fn full_config() -> StaticConfig {
    StaticConfig::new()
        .with(PROJECT_ID, "project-1")
        .with(USERNAME, "ops@example.com")
        .with(PASSWORD, "secret")
}

fn spec() -> NetworkSpec {
    NetworkSpec {
        name: "robot-net".to_string(),
        runtime: "cloud".to_string(),
        ros_distro: "melodic".to_string(),
        parameters: json!({"limits": {"cpu": 1}}),
    }
}

#[tokio::test]
async fn creates_network_with_one_login() {
    let transport = Arc::new(MockTransport::new());
    transport.respond_json(Method::POST, LOGIN, 200, &json!({"data": {"token": "tok"}}));
    transport.respond_json(Method::GET, NETWORKS, 200, &json!([]));
    transport.respond_json(Method::POST, NETWORKS, 200, &json!({"guid": "net-1"}));

    let reconciler = reconciler(transport.clone(), Arc::new(MemoryStore::new()), full_config());
    let outcome = reconciler
        .network_present(&spec(), ReconcileOptions::default())
        .await
        .unwrap();

    assert!(outcome.succeeded);
    assert_eq!(outcome.changed, Some(true));
    assert_eq!(transport.count(&Method::POST, LOGIN), 1);

    let create = transport
        .requests()
        .into_iter()
        .find(|r| r.method == Method::POST && r.url == NETWORKS)
        .unwrap();
    assert_eq!(create.body, Some(spec().desired()));
    assert_eq!(create.header_value("project"), Some("project-1"));
}

#[tokio::test]
async fn stale_cached_token_is_replaced_once() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    store
        .save_credential(&Credential {
            token: "stale".to_string(),
            issued_at: now,
            expires_at: now + chrono::Duration::hours(1),
        })
        .unwrap();

    let transport = Arc::new(MockTransport::new());
    transport.respond_json(Method::POST, LOGIN, 200, &json!({"data": {"token": "fresh"}}));
    transport.respond(Method::GET, NETWORKS, 401, "token expired");
    transport.respond_json(
        Method::GET,
        NETWORKS,
        200,
        &json!([{
            "guid": "net-1",
            "name": "robot-net",
            "runtime": "cloud",
            "rosDistro": "melodic",
            "parameters": {"limits": {"cpu": 1}},
            "internalDeploymentStatus": {"phase": "Succeeded"},
        }]),
    );
    transport.respond_json(
        Method::GET,
        &format!("{NETWORKS}/net-1"),
        200,
        &json!({
            "guid": "net-1",
            "name": "robot-net",
            "runtime": "cloud",
            "rosDistro": "melodic",
            "parameters": {"limits": {"cpu": 1}},
        }),
    );

    let reconciler = reconciler(transport.clone(), store.clone(), full_config());
    let outcome = reconciler
        .network_present(&spec(), ReconcileOptions::default())
        .await
        .unwrap();

    assert!(outcome.succeeded, "{outcome:?}");
    assert_eq!(outcome.changed, Some(false));
    assert_eq!(transport.count(&Method::POST, LOGIN), 1);
    assert_eq!(transport.count(&Method::GET, NETWORKS), 2);
    assert_eq!(store.load_credential().unwrap().unwrap().token, "fresh");
}

#[tokio::test]
async fn missing_project_is_returned_as_error() {
    let transport = Arc::new(MockTransport::new());
    let config = StaticConfig::new()
        .with(USERNAME, "ops@example.com")
        .with(PASSWORD, "secret");

    let reconciler = reconciler(transport.clone(), Arc::new(MemoryStore::new()), config);
    let err = reconciler
        .network_present(&spec(), ReconcileOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(transport.count(&Method::GET, NETWORKS), 0);
}

#[tokio::test]
async fn remote_failure_is_a_failed_outcome() {
    let transport = Arc::new(MockTransport::new());
    transport.respond_json(Method::POST, LOGIN, 200, &json!({"data": {"token": "tok"}}));
    transport.respond_json(
        Method::GET,
        NETWORKS,
        503,
        &json!({"error": "catalog unavailable"}),
    );

    let reconciler = reconciler(transport.clone(), Arc::new(MemoryStore::new()), full_config());
    let outcome = reconciler
        .network_present(&spec(), ReconcileOptions::default())
        .await
        .unwrap();

    assert!(!outcome.succeeded);
    assert!(outcome.message.contains("catalog unavailable"), "{}", outcome.message);
    assert_eq!(transport.count(&Method::POST, NETWORKS), 0);
}
