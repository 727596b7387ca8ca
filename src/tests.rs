//! Integration tests for the CMP service.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::boot::{self, BootContext, Booted};
use crate::catalog::CatalogClient;
use crate::cmp::{Command, ProcessorState};
use crate::config::Config;
use crate::cookie::{ConsentCookieCodec, VENDOR_COOKIE_NAME};
use crate::db::{init_database, CookieStorage, SqliteCookieStorage};
use crate::errors::{BootError, BootStage};
use crate::models::{now_millis, CmpSchema, ConsentRecord};
use crate::notify::{CmpEvent, CMP_READY, IS_LOADED};
use crate::store::ConsentStore;
use crate::{create_router, AppState};

const VENDOR_LIST: &str = r#"{
    "vendorListVersion": 7,
    "purposes": [{"id": 1, "name": "Storage"}, {"id": 2, "name": "Personalisation"}],
    "vendors": [
        {"id": 1, "name": "Vendor One", "purposeIds": [1]},
        {"id": 2, "name": "Vendor Two", "purposeIds": [1, 2]},
        {"id": 3, "name": "Vendor Three", "purposeIds": [2]}
    ]
}"#;

const PURPOSE_LIST: &str = r#"{
    "version": 3,
    "purposes": [{"id": 1, "name": "Storage"}, {"id": 2, "name": "Personalisation"}],
    "publisherPurposeIds": [1, 2]
}"#;

/// Serve the two catalogs; an unavailable one answers 500.
async fn serve_catalogs(vendors_available: bool, purposes_available: bool) -> String {
    let vendors = if vendors_available {
        get(|| async { VENDOR_LIST.into_response() })
    } else {
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR.into_response() })
    };
    let purposes = if purposes_available {
        get(|| async { PURPOSE_LIST.into_response() })
    } else {
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR.into_response() })
    };
    let app = Router::new()
        .route("/vendorlist.json", vendors)
        .route("/purposes.json", purposes);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Knobs for a fixture.
struct FixtureOptions {
    psk: Option<String>,
    vendors_available: bool,
    purposes_available: bool,
    force_show_ui: Option<bool>,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            psk: Some("test-api-key".to_string()),
            vendors_available: true,
            purposes_available: true,
            force_show_ui: None,
        }
    }
}

/// Test fixture for integration tests. The CMP is not booted until
/// [`TestFixture::boot`] is called.
struct TestFixture {
    client: Client,
    base_url: String,
    state: AppState,
    ctx: BootContext,
    storage: Arc<SqliteCookieStorage>,
    _temp_dir: Option<TempDir>,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_options(FixtureOptions::default()).await
    }

    async fn with_options(options: FixtureOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("cookies.sqlite");
        let mut fixture = Self::at(&db_path, options).await;
        fixture._temp_dir = Some(temp_dir);
        fixture
    }

    /// Start a fixture on an existing cookie database.
    async fn at(db_path: &Path, options: FixtureOptions) -> Self {
        let catalog_base = serve_catalogs(options.vendors_available, options.purposes_available).await;

        let pool = init_database(db_path).await.expect("Failed to init DB");
        let storage = Arc::new(SqliteCookieStorage::new(pool));

        let config = Arc::new(Config {
            publisher_name: "Example Publisher".to_string(),
            force_show_ui: options.force_show_ui,
            vendor_list_url: format!("{}/vendorlist.json", catalog_base),
            purpose_list_url: format!("{}/purposes.json", catalog_base),
            db_path: db_path.to_path_buf(),
            api_psk: options.psk.clone(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            ..Config::default()
        });

        let state = AppState::new(Arc::clone(&config));
        let catalogs =
            CatalogClient::new(&config.vendor_list_url, &config.purpose_list_url).unwrap();
        let ctx = BootContext {
            config,
            storage: storage.clone(),
            catalogs,
            handle: state.handle.clone(),
            ui: Arc::clone(&state.ui),
        };

        let app = create_router(state.clone());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = options.psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            state,
            ctx,
            storage,
            _temp_dir: None,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn boot(&self) -> Result<Booted, BootError> {
        boot::boot(self.ctx.clone()).await
    }

    async fn command(&self, command: &str, parameter: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url("/api/cmp"))
            .json(&json!({ "command": command, "parameter": parameter }))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn status(&self) -> Value {
        let resp = self
            .client
            .get(self.url("/api/status"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"].clone()
    }

    /// Register a counting listener through the command entry point.
    async fn count_event(&self, event: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let command = Command::add_event_listener(
            event,
            Arc::new(move |_: &CmpEvent, _: &ConsentStore| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        self.state.handle.call(command).await;
        count
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_router_health_without_server() {
    let state = AppState::new(Arc::new(Config::default()));
    let resp = create_router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_auth_missing_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/status"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_invalid_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/status"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_auth_bearer_token() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/status"))
        .header("authorization", "Bearer test-api-key")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_auth_disabled_without_psk() {
    let fixture = TestFixture::with_options(FixtureOptions {
        psk: None,
        ..FixtureOptions::default()
    })
    .await;

    let resp = Client::new()
        .get(fixture.url("/api/status"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_status_before_boot() {
    let fixture = TestFixture::new().await;

    let status = fixture.status().await;
    assert_eq!(status["state"], "uninitialized");
    assert_eq!(status["queuedCommands"], 0);
    assert_eq!(status["cmpLoaded"], false);
    assert!(status.get("ui").is_none());
}

#[tokio::test]
async fn test_command_before_boot_is_answered_after_boot() {
    let fixture = Arc::new(TestFixture::new().await);

    let pending = {
        let fixture = Arc::clone(&fixture);
        tokio::spawn(async move { fixture.command("ping", Value::Null).await })
    };
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    assert_eq!(fixture.status().await["queuedCommands"], 1);
    assert!(!pending.is_finished());

    fixture.boot().await.unwrap();

    let (status, body) = pending.await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["cmpLoaded"], true);
    assert_eq!(body["data"]["gdprAppliesGlobally"], false);
}

#[tokio::test]
async fn test_full_boot_reaches_ready() {
    let fixture = TestFixture::new().await;
    let loaded = fixture.count_event(IS_LOADED).await;
    let ready = fixture.count_event(CMP_READY).await;

    let booted = fixture.boot().await.unwrap();
    assert!(booted.ui.show_ui);
    assert_eq!(loaded.load(Ordering::SeqCst), 1);
    assert_eq!(ready.load(Ordering::SeqCst), 1);

    let status = fixture.status().await;
    assert_eq!(status["state"], "ready");
    assert_eq!(status["cmpLoaded"], true);
    assert_eq!(status["cmpReady"], true);
    assert_eq!(status["ui"]["showUi"], true);
    assert_eq!(status["vendorListVersion"], 7);
    assert_eq!(status["purposeListVersion"], 3);

    let (code, body) = fixture.command("getVendorList", Value::Null).await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["vendorListVersion"], 7);

    let (_, body) = fixture.command("getPublisherConsents", Value::Null).await;
    assert_eq!(body["data"]["publisherName"], "Example Publisher");
    assert_eq!(body["data"]["publisherConsents"]["1"], false);
    assert_eq!(body["data"]["publisherConsents"]["2"], false);
}

#[tokio::test]
async fn test_catalog_failure_never_fires_ready() {
    let fixture = TestFixture::with_options(FixtureOptions {
        vendors_available: false,
        purposes_available: false,
        ..FixtureOptions::default()
    })
    .await;
    let loaded = fixture.count_event(IS_LOADED).await;
    let ready = fixture.count_event(CMP_READY).await;

    let err = match fixture.boot().await {
        Ok(_) => panic!("boot should fail when both catalogs are unreachable"),
        Err(e) => e,
    };
    assert_eq!(err.stage, BootStage::FetchCatalogs);
    assert_eq!(loaded.load(Ordering::SeqCst), 1);
    assert_eq!(ready.load(Ordering::SeqCst), 0);

    // The store still answers queries
    let (code, body) = fixture.command("ping", Value::Null).await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["cmpLoaded"], true);
    assert_eq!(body["data"]["cmpReady"], false);

    let (code, body) = fixture.command("getVendorList", Value::Null).await;
    assert_eq!(code, 503);
    assert_eq!(body["error"]["code"], "NOT_READY");

    let status = fixture.status().await;
    assert_eq!(status["cmpReady"], false);
    assert_eq!(status["ui"]["showUi"], true);
}

#[tokio::test]
async fn test_purpose_list_failure_keeps_vendor_list() {
    let fixture = TestFixture::with_options(FixtureOptions {
        purposes_available: false,
        ..FixtureOptions::default()
    })
    .await;
    let ready = fixture.count_event(CMP_READY).await;

    let err = match fixture.boot().await {
        Ok(_) => panic!("boot should not reach ready without the purpose list"),
        Err(e) => e,
    };
    assert_eq!(err.stage, BootStage::FetchCatalogs);
    assert_eq!(ready.load(Ordering::SeqCst), 0);

    let (code, body) = fixture.command("getVendorList", Value::Null).await;
    assert_eq!(code, 200);
    assert_eq!(body["data"]["vendorListVersion"], 7);

    let (code, body) = fixture.command("getVendorConsents", Value::Null).await;
    assert_eq!(code, 200);
    assert_eq!(
        body["data"]["vendorConsents"],
        json!({ "1": false, "2": false, "3": false })
    );
    assert_eq!(body["data"]["purposeConsents"], json!({}));

    let (_, body) = fixture
        .command("setVendorConsent", json!({ "id": 3, "consent": true }))
        .await;
    assert_eq!(body["data"]["applied"], true);

    let status = fixture.status().await;
    assert_eq!(status["cmpReady"], false);
    assert_eq!(status["vendorListVersion"], 7);
    assert!(status.get("purposeListVersion").is_none());
}

#[tokio::test]
async fn test_unreadable_cookies_are_discarded() {
    let fixture = TestFixture::new().await;
    fixture
        .storage
        .write(VENDOR_COOKIE_NAME, "not-a-cookie!", chrono::Duration::days(1))
        .await
        .unwrap();

    // A cookie was present, so the UI follows the returning-visitor path
    let booted = fixture.boot().await.unwrap();
    assert!(!booted.ui.show_ui);
    assert_eq!(fixture.storage.read(VENDOR_COOKIE_NAME).await.unwrap(), None);

    let (_, body) = fixture.command("getVendorConsents", Value::Null).await;
    assert_eq!(body["data"]["hasGlobalConsent"], false);
}

#[tokio::test]
async fn test_new_vendor_inherits_global_consent() {
    let fixture = TestFixture::new().await;

    let mut record = ConsentRecord::empty(CmpSchema::default(), now_millis());
    record.vendor_list_version = 6;
    record.global_consent = true;
    record.vendor_consent.insert(1, true);
    record.vendor_consent.insert(2, false);
    fixture
        .storage
        .write(
            VENDOR_COOKIE_NAME,
            &ConsentCookieCodec::encode_vendor(&record),
            chrono::Duration::days(1),
        )
        .await
        .unwrap();

    let booted = fixture.boot().await.unwrap();
    assert!(!booted.ui.show_ui);

    let (code, body) = fixture.command("getVendorConsents", Value::Null).await;
    assert_eq!(code, 200);
    let vendors = &body["data"]["vendorConsents"];
    assert_eq!(vendors["1"], true);
    assert_eq!(vendors["2"], false);
    assert_eq!(vendors["3"], true);
    assert_eq!(body["data"]["hasGlobalConsent"], true);

    let (_, body) = fixture.command("getVendorConsents", json!([2, 3])).await;
    let vendors = body["data"]["vendorConsents"].as_object().unwrap();
    assert_eq!(vendors.len(), 2);
    assert_eq!(vendors["3"], true);
}

#[tokio::test]
async fn test_unknown_command() {
    let fixture = TestFixture::new().await;
    fixture.boot().await.unwrap();

    let (code, body) = fixture.command("doSomethingElse", Value::Null).await;
    assert_eq!(code, 404);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNKNOWN_COMMAND");
}

#[tokio::test]
async fn test_invalid_parameter() {
    let fixture = TestFixture::new().await;
    fixture.boot().await.unwrap();

    let (code, body) = fixture
        .command("setVendorConsent", json!({ "id": "two" }))
        .await;
    assert_eq!(code, 400);
    assert_eq!(body["error"]["code"], "INVALID_PARAMETER");
}

#[tokio::test]
async fn test_consent_persists_across_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cookies.sqlite");

    let first = TestFixture::at(&db_path, FixtureOptions::default()).await;
    first.boot().await.unwrap();

    let (_, body) = first
        .command("setVendorConsent", json!({ "id": 2, "consent": true }))
        .await;
    assert_eq!(body["data"]["applied"], true);
    let (_, body) = first
        .command("setVendorConsent", json!({ "id": 99, "consent": true }))
        .await;
    assert_eq!(body["data"]["applied"], false);
    let (_, body) = first
        .command("setPublisherConsent", json!({ "id": 1, "consent": true }))
        .await;
    assert_eq!(body["data"]["applied"], true);
    first.state.handle.teardown().await;

    let second = TestFixture::at(&db_path, FixtureOptions::default()).await;
    let booted = second.boot().await.unwrap();
    assert!(!booted.ui.show_ui);

    let (_, body) = second.command("getVendorConsents", Value::Null).await;
    assert_eq!(body["data"]["vendorConsents"]["1"], false);
    assert_eq!(body["data"]["vendorConsents"]["2"], true);
    assert_eq!(body["data"]["vendorConsents"]["3"], false);

    let (_, body) = second.command("getPublisherConsents", json!([1])).await;
    assert_eq!(body["data"]["publisherConsents"]["1"], true);
}

#[tokio::test]
async fn test_force_show_ui_with_cookie() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cookies.sqlite");

    let first = TestFixture::at(&db_path, FixtureOptions::default()).await;
    first.boot().await.unwrap();
    first.command("setGlobalConsent", json!(true)).await;

    let forced = TestFixture::at(
        &db_path,
        FixtureOptions {
            force_show_ui: Some(true),
            ..FixtureOptions::default()
        },
    )
    .await;
    assert!(forced.boot().await.unwrap().ui.show_ui);

    let not_forced = TestFixture::at(
        &db_path,
        FixtureOptions {
            force_show_ui: Some(false),
            ..FixtureOptions::default()
        },
    )
    .await;
    assert!(!not_forced.boot().await.unwrap().ui.show_ui);
}

#[tokio::test]
async fn test_teardown_rejects_commands() {
    let fixture = TestFixture::new().await;
    fixture.boot().await.unwrap();

    fixture.state.handle.teardown().await;

    let (code, body) = fixture.command("ping", Value::Null).await;
    assert_eq!(code, 503);
    assert_eq!(body["error"]["code"], "NOT_READY");
    assert_eq!(fixture.status().await["state"], "tornDown");
    assert_eq!(fixture.state.handle.state().await, ProcessorState::TornDown);
}
