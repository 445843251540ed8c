//! End-to-end tests for the captive portal over real HTTP

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use hotspot_gate::config::PortalConfig;
use hotspot_gate::portal::{AssetDir, EmbeddedAssets, PageAssets};
use hotspot_gate::store::StoredAttempt;
use hotspot_gate::{CaptivePortalServer, CredentialStore, Outcome, Service, SqliteCredentialStore};
use reqwest::redirect::Policy;
use reqwest::StatusCode;

fn loopback() -> PortalConfig {
    PortalConfig {
        bind: IpAddr::from([127, 0, 0, 1]),
        port: 0,
        ..PortalConfig::default()
    }
}

/// Pages that take longer to load than any sane request timeout
struct SlowAssets;

#[async_trait]
impl PageAssets for SlowAssets {
    async fn read(&self, name: &str) -> std::io::Result<String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        EmbeddedAssets.read(name).await
    }
}

struct Harness {
    server: CaptivePortalServer,
    base: String,
    store: Arc<SqliteCredentialStore>,
    successes: Arc<AtomicUsize>,
    client: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        Self::with_assets(Arc::new(EmbeddedAssets)).await
    }

    async fn with_assets(assets: Arc<dyn PageAssets>) -> Self {
        Self::with_settings(loopback(), assets).await
    }

    async fn with_settings(settings: PortalConfig, assets: Arc<dyn PageAssets>) -> Self {
        let store = Arc::new(SqliteCredentialStore::in_memory().await.unwrap());
        let successes = Arc::new(AtomicUsize::new(0));
        let counter = successes.clone();

        let mut server = CaptivePortalServer::new(
            settings,
            assets,
            store.clone(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let addr: SocketAddr = server.start().unwrap();

        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .unwrap();

        Self {
            server,
            base: format!("http://{}", addr),
            store,
            successes,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> reqwest::Response {
        self.client.post(self.url(path)).form(form).send().await.unwrap()
    }

    async fn attempts(&self) -> Vec<StoredAttempt> {
        self.store.recent(100).await.unwrap()
    }

    fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn primary_page_is_served_on_every_alias() {
    let portal = Harness::start().await;

    for path in ["/", "/login.html", "/index.html"] {
        let resp = portal.get(path).await;
        assert_eq!(resp.status(), StatusCode::OK, "{}", path);
        assert!(resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html")));
        let body = resp.text().await.unwrap();
        assert!(body.contains(r#"action="/login""#), "{} has no login form", path);
    }
}

#[tokio::test]
async fn correct_secret_is_accepted_and_recorded() {
    let portal = Harness::start().await;

    let resp = portal.post_form("/login", &[("password", "password123")]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.text().await.unwrap().contains("Login Successful"));

    let attempts = portal.attempts().await;
    assert_eq!(attempts.len(), 1);
    let attempt = &attempts[0].attempt;
    assert_eq!(attempt.service, Service::Primary);
    assert_eq!(attempt.outcome, Outcome::Accepted);
    assert_eq!(attempt.typed_secret.as_deref(), Some("password123"));
    assert_eq!(attempt.client_identifier, "127.0.0.1");
    assert_eq!(portal.successes(), 1);
}

#[tokio::test]
async fn wrong_secret_is_rejected_and_recorded() {
    let portal = Harness::start().await;

    for secret in ["wrong", "Password123", "password123 ", ""] {
        let resp = portal.post_form("/login", &[("password", secret)]).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{:?}", secret);
        let body = resp.text().await.unwrap();
        assert!(body.contains("Login Failed"));
        assert!(body.contains("href='/'"));
    }

    let attempts = portal.attempts().await;
    assert_eq!(attempts.len(), 4);
    assert!(attempts.iter().all(|s| s.attempt.outcome == Outcome::Rejected));
    assert_eq!(portal.successes(), 0);
}

#[tokio::test]
async fn missing_secret_is_rejected() {
    let portal = Harness::start().await;

    let resp = portal.post_form("/login", &[("username", "guest")]).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let attempts = portal.attempts().await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt.typed_identity.as_deref(), Some("guest"));
    assert_eq!(attempts[0].attempt.typed_secret, None);
}

#[tokio::test]
async fn malformed_body_is_a_server_error_without_side_effects() {
    let portal = Harness::start().await;

    let resp = portal
        .client
        .post(portal.url("/login"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(vec![b'p', b'=', 0xff, 0xfe])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let resp = portal
        .client
        .post(portal.url("/login/mockgmail"))
        .body("email=%ff%fe")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert!(portal.attempts().await.is_empty());
    assert_eq!(portal.successes(), 0);
}

#[tokio::test]
async fn selectors_redirect_to_decoy_pages() {
    let portal = Harness::start().await;

    for (selector, page) in [
        ("/select_mock_gmail", "/mock_gmail_login.html"),
        ("/select_mock_outlook", "/mock_outlook_login.html"),
        ("/select_mock_icloud", "/mock_icloud_login.html"),
        ("/select_default", "/login.html"),
    ] {
        let resp = portal.get(selector).await;
        assert_eq!(resp.status(), StatusCode::FOUND, "{}", selector);
        assert_eq!(resp.headers().get("location").and_then(|v| v.to_str().ok()), Some(page));

        let resp = portal.get(page).await;
        assert_eq!(resp.status(), StatusCode::OK, "{}", page);
        assert!(resp.text().await.unwrap().contains("<form"));
    }
}

#[tokio::test]
async fn decoy_logins_accept_and_record_verbatim() {
    let portal = Harness::start().await;

    let cases = [
        ("/login/mockgmail", Service::MockGmail, "someone@example.com", "hunter2"),
        ("/login/mockoutlook", Service::MockOutlook, "a+b@example.org", "p&ss=word %20"),
        ("/login/mockicloud", Service::MockICloud, "ünï@example.net", ""),
    ];

    for (path, service, email, password) in cases {
        let resp = portal.post_form(path, &[("email", email), ("password", password)]).await;
        assert_eq!(resp.status(), StatusCode::OK, "{}", path);
        let body = resp.text().await.unwrap();
        assert!(body.contains(&format!("{} Login Successful!", service.as_str())));
    }

    let mut attempts = portal.attempts().await;
    attempts.reverse();
    assert_eq!(attempts.len(), 3);
    for (stored, (_, service, email, password)) in attempts.iter().zip(cases) {
        assert_eq!(stored.attempt.service, service);
        assert_eq!(stored.attempt.outcome, Outcome::Accepted);
        assert_eq!(stored.attempt.typed_identity.as_deref(), Some(email));
        assert_eq!(stored.attempt.typed_secret.as_deref(), Some(password));
    }
    assert_eq!(portal.successes(), 3);
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let portal = Harness::start().await;

    let resp = portal.get("/generate_204").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), "Not Found");

    let resp = portal.post_form("/select_mock_gmail", &[]).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = portal.get("/login").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = portal.post_form("/login/mockyahoo", &[("email", "x")]).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(portal.attempts().await.is_empty());
}

#[tokio::test]
async fn unreadable_asset_is_a_server_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("login.html"), "<form>from disk</form>").unwrap();
    let portal = Harness::with_assets(Arc::new(AssetDir::new(dir.path()))).await;

    let resp = portal.get("/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "<form>from disk</form>");

    let resp = portal.get("/mock_gmail_login.html").await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.text().await.unwrap(), "Error serving login page.");
}

#[tokio::test]
async fn stopped_server_refuses_connections() {
    let mut portal = Harness::start().await;
    assert!(portal.server.is_listening());

    portal.server.stop();
    assert!(!portal.server.is_listening());
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let fresh = reqwest::Client::new();
    assert!(fresh.get(portal.url("/")).send().await.is_err());
}

#[tokio::test]
async fn slow_request_is_cut_off_by_request_timeout() {
    let settings = PortalConfig {
        request_timeout: 1,
        ..loopback()
    };
    let portal = Harness::with_settings(settings, Arc::new(SlowAssets)).await;

    let started = Instant::now();
    let resp = portal.get("/").await;
    assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(4));
}
