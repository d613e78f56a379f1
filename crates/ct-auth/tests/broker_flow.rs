//! End-to-end broker flows against a mock identity provider
//!
//! A small axum server stands in for the authority, the control plane,
//! and the managed-identity metadata endpoint. Every request is logged
//! so tests can assert exactly which network calls happened and in what
//! order.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Form, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::TempDir;

use ct_auth::{AuthError, BrokerConfig, TokenBroker, COMMON_TENANT};
use ct_core::{CredentialStore, Settings, Token};

/// Refresh tokens the mock authority accepts; anything else is an
/// `invalid_grant`
const GOOD_REFRESH_TOKENS: &[&str] = &["rt-common", "rt-good"];

#[derive(Default)]
struct Provider {
    /// Ordered log of every request the broker made
    calls: Mutex<Vec<String>>,
    /// Tenant ids returned by the directory listing
    tenants: Mutex<Vec<&'static str>>,
}

impl Provider {
    fn log(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn token_body(tenant: &str) -> serde_json::Value {
    json!({
        "access_token": format!("at-{tenant}"),
        "refresh_token": format!("rt-{tenant}"),
        "token_type": "Bearer",
        "resource": "https://management.core.windows.net/",
        "expires_in": "3600"
    })
}

async fn device_code(State(state): State<Arc<Provider>>, Path(tenant): Path<String>) -> Json<serde_json::Value> {
    state.log(format!("devicecode:{tenant}"));
    Json(json!({
        "user_code": "ABCD1234",
        "device_code": "opaque-device-code",
        "verification_url": "https://example.com/devicelogin",
        "expires_in": "900",
        "interval": "0",
        "message": "Open https://example.com/devicelogin and enter ABCD1234"
    }))
}

async fn token(
    State(state): State<Arc<Provider>>,
    Path(tenant): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> axum::response::Response {
    let grant = form.get("grant_type").cloned().unwrap_or_default();
    match grant.as_str() {
        "device_code" => {
            state.log(format!("token:{tenant}:device_code"));
            Json(token_body(&tenant)).into_response()
        }
        "refresh_token" => {
            let refresh = form.get("refresh_token").cloned().unwrap_or_default();
            state.log(format!("token:{tenant}:refresh:{refresh}"));
            if GOOD_REFRESH_TOKENS.contains(&refresh.as_str()) {
                Json(token_body(&tenant)).into_response()
            } else {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "invalid_grant",
                        "error_description": "refresh token is expired or revoked"
                    })),
                )
                    .into_response()
            }
        }
        other => {
            state.log(format!("token:{tenant}:{other}"));
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "unsupported_grant_type", "error_description": ""})),
            )
                .into_response()
        }
    }
}

async fn list_tenants(State(state): State<Arc<Provider>>) -> Json<serde_json::Value> {
    state.log("tenants".to_string());
    let tenants: Vec<serde_json::Value> = state
        .tenants
        .lock()
        .unwrap()
        .iter()
        .map(|id| json!({"tenantId": id, "displayName": id, "countryCode": "US"}))
        .collect();
    Json(json!({ "value": tenants }))
}

async fn msi_token(State(state): State<Arc<Provider>>) -> Json<serde_json::Value> {
    state.log("msi".to_string());
    Json(json!({
        "access_token": "at-msi",
        "refresh_token": "",
        "token_type": "Bearer",
        "resource": "https://management.core.windows.net/",
        "expires_in": "3600"
    }))
}

/// Start the mock provider; returns its state and base address
async fn start_provider(tenants: Vec<&'static str>) -> (Arc<Provider>, SocketAddr) {
    let state = Arc::new(Provider {
        tenants: Mutex::new(tenants),
        ..Provider::default()
    });

    let app = Router::new()
        .route("/:tenant/oauth2/devicecode", post(device_code))
        .route("/:tenant/oauth2/token", post(token))
        .route("/tenants", get(list_tenants))
        .route("/msi/token", get(msi_token))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (state, addr)
}

fn broker_for(addr: SocketAddr, dir: &TempDir) -> TokenBroker {
    let config = BrokerConfig {
        authority: format!("http://{addr}/"),
        management_url: format!("http://{addr}"),
        ..BrokerConfig::default()
    };
    TokenBroker::new(CredentialStore::new(dir.path().to_path_buf()), config).unwrap()
}

fn cached_token(refresh: &str, expires_on: chrono::DateTime<Utc>) -> Token {
    Token {
        access_token: "at-cached".to_string(),
        refresh_token: refresh.to_string(),
        token_type: "Bearer".to_string(),
        resource: "https://management.core.windows.net/".to_string(),
        expires_on,
    }
}

#[tokio::test]
async fn empty_cache_runs_device_flow_once_and_persists_tenant() {
    let (provider, addr) = start_provider(vec!["tenant-a"]).await;
    let dir = TempDir::new().unwrap();
    let broker = broker_for(addr, &dir);

    let bearer = broker.acquire_current().await.unwrap();
    assert_eq!(bearer, "Bearer at-tenant-a");

    // One interactive flow (common), then the anchor refresh for the
    // target tenant - never a second prompt
    let calls = provider.calls();
    let device_flows: Vec<_> = calls.iter().filter(|c| c.starts_with("devicecode:")).collect();
    assert_eq!(device_flows, vec!["devicecode:common"]);
    assert!(calls.contains(&"tenants".to_string()));
    assert!(calls.contains(&"token:tenant-a:refresh:rt-common".to_string()));

    // The resolved tenant is persisted as the active tenant
    let settings = broker.store().load_settings().unwrap();
    assert_eq!(settings.active_tenant, "tenant-a");

    // Both the anchor and the target tenant are cached
    assert!(broker.store().load_token(COMMON_TENANT).is_ok());
    assert!(broker.store().load_token("tenant-a").is_ok());
}

#[tokio::test]
async fn managed_identity_bypasses_tenant_logic() {
    let (provider, addr) = start_provider(vec!["tenant-a"]).await;
    let dir = TempDir::new().unwrap();

    let config = BrokerConfig {
        authority: format!("http://{addr}/"),
        management_url: format!("http://{addr}"),
        msi_endpoint: Some(format!("http://{addr}/msi/token")),
        ..BrokerConfig::default()
    };
    let broker =
        TokenBroker::new(CredentialStore::new(dir.path().to_path_buf()), config).unwrap();

    let bearer = broker.acquire_current().await.unwrap();
    assert_eq!(bearer, "Bearer at-msi");

    // One metadata call; no device flow, no tenant resolution
    assert_eq!(provider.calls(), vec!["msi"]);
    assert_eq!(
        broker.store().load_settings().unwrap(),
        Settings::default()
    );
}

#[tokio::test]
async fn valid_cache_is_reused_without_network() {
    // The authority is unroutable; any network attempt would fail
    let dir = TempDir::new().unwrap();
    let store = CredentialStore::new(dir.path().to_path_buf());
    store
        .save_token("tenant-a", &cached_token("rt-good", Utc::now() + Duration::hours(1)))
        .unwrap();

    let config = BrokerConfig {
        authority: "http://127.0.0.1:1/".to_string(),
        management_url: "http://127.0.0.1:1".to_string(),
        ..BrokerConfig::default()
    };
    let broker = TokenBroker::new(store, config).unwrap();

    let bearer = broker.acquire("tenant-a").await.unwrap();
    assert_eq!(bearer, "Bearer at-cached");
}

#[tokio::test]
async fn repeated_acquire_hits_the_network_only_once() {
    let (provider, addr) = start_provider(vec!["tenant-a"]).await;
    let dir = TempDir::new().unwrap();
    let broker = broker_for(addr, &dir);

    let first = broker.acquire(COMMON_TENANT).await.unwrap();
    let calls_after_first = provider.calls().len();

    let second = broker.acquire(COMMON_TENANT).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(provider.calls().len(), calls_after_first);
}

#[tokio::test]
async fn expired_cache_forces_a_refresh() {
    let (provider, addr) = start_provider(vec!["tenant-a"]).await;
    let dir = TempDir::new().unwrap();
    let broker = broker_for(addr, &dir);

    broker
        .store()
        .save_token("tenant-a", &cached_token("rt-good", Utc::now() - Duration::minutes(5)))
        .unwrap();

    let bearer = broker.acquire("tenant-a").await.unwrap();
    assert_eq!(bearer, "Bearer at-tenant-a");
    assert_eq!(
        provider.calls(),
        vec!["token:tenant-a:refresh:rt-good".to_string()]
    );

    // The refreshed token superseded the expired record
    let cached = broker.store().load_token("tenant-a").unwrap();
    assert_eq!(cached.access_token, "at-tenant-a");
    assert!(!cached.is_expired());
}

#[tokio::test]
async fn unrefreshable_tenant_falls_back_through_common() {
    let (provider, addr) = start_provider(vec!["tenant-a"]).await;
    let dir = TempDir::new().unwrap();
    let broker = broker_for(addr, &dir);

    // Target tenant: expired, with a refresh token the authority rejects
    broker
        .store()
        .save_token("tenant-a", &cached_token("rt-stale", Utc::now() - Duration::minutes(5)))
        .unwrap();
    // Common tenant: valid anchor
    broker
        .store()
        .save_token(COMMON_TENANT, &cached_token("rt-common", Utc::now() + Duration::hours(1)))
        .unwrap();

    let bearer = broker.acquire("tenant-a").await.unwrap();
    assert_eq!(bearer, "Bearer at-tenant-a");

    // Own refresh first, then the common anchor - in that order, with
    // no interactive flow
    assert_eq!(
        provider.calls(),
        vec![
            "token:tenant-a:refresh:rt-stale".to_string(),
            "token:tenant-a:refresh:rt-common".to_string(),
        ]
    );
}

#[tokio::test]
async fn zero_tenants_is_a_terminal_no_access_error() {
    let (_provider, addr) = start_provider(vec![]).await;
    let dir = TempDir::new().unwrap();
    let broker = broker_for(addr, &dir);

    let err = broker.acquire_current().await.unwrap_err();
    assert!(matches!(err, AuthError::NoAccess));
}

#[tokio::test]
async fn malformed_cache_file_is_surfaced() {
    let (_provider, addr) = start_provider(vec!["tenant-a"]).await;
    let dir = TempDir::new().unwrap();
    let broker = broker_for(addr, &dir);

    std::fs::write(
        broker.store().token_path("tenant-a"),
        b"{ definitely not json",
    )
    .unwrap();

    let err = broker.acquire("tenant-a").await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::Store(ct_core::StoreError::Decode { .. })
    ));
}
