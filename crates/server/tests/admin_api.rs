use lantern_discovery::config::NginxConfig;
use lantern_discovery::{
    default_collectors, BackendClient, ConfigProvider, MemoryOverrideStore, Reconciler,
    SourceRegistry, Supervisor, SystemConfig,
};
use lantern_protocol::{
    ConnectionTestResult, DiscoveredAppsView, ErrorEnvelope, SourceKind, SourceStatus,
};
use lantern_server::http_api::{router, AppState};
use lantern_server::server_security::AuthToken;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const SITE: &str = r#"
server {
    listen 443 ssl;
    server_name apps.lan;
    location /grafana { proxy_pass http://grafana:3000; }
    location /paperless/ { proxy_pass http://paperless:8000; }
}
"#;

struct Harness {
    _temp: TempDir,
    base: String,
    http: reqwest::Client,
    supervisor: Arc<Supervisor>,
}

impl Harness {
    async fn start(token: Option<&str>) -> Self {
        let temp = TempDir::new().expect("tempdir");
        let conf_d = temp.path().join("nginx").join("conf.d");
        std::fs::create_dir_all(&conf_d).expect("mkdir");
        std::fs::write(conf_d.join("apps.conf"), SITE).expect("write site");

        let config = SystemConfig {
            nginx: NginxConfig {
                enabled: false,
                config_path: Some(conf_d),
                include_roots: Vec::new(),
            },
            ..SystemConfig::default()
        };
        let registry = Arc::new(SourceRegistry::new());
        let client = BackendClient::new(Duration::from_secs(2)).expect("client");
        let supervisor = Arc::new(
            Supervisor::new(
                Arc::new(ConfigProvider::new(config)),
                registry.clone(),
                default_collectors(client),
            )
            .with_interval(Duration::from_millis(100)),
        );
        let state = Arc::new(AppState {
            supervisor: supervisor.clone(),
            reconciler: Reconciler::new(registry, Arc::new(MemoryOverrideStore::new())),
            auth_token: AuthToken::parse(token).expect("token"),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.expect("serve");
        });

        Self {
            _temp: temp,
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
            supervisor,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn view(&self) -> DiscoveredAppsView {
        self.http
            .get(self.url("/api/admin/discovered-apps"))
            .send()
            .await
            .expect("send")
            .json()
            .await
            .expect("json")
    }

    async fn enable_nginx(&self) {
        let response = self
            .http
            .put(self.url("/api/admin/discovery/nginx"))
            .json(&json!({"enabled": true}))
            .send()
            .await
            .expect("send");
        assert_eq!(response.status(), StatusCode::OK);

        let deadline = Instant::now() + Duration::from_secs(5);
        while self.supervisor.registry().snapshot(SourceKind::Nginx).len() < 2 {
            assert!(Instant::now() < deadline, "nginx discovery did not complete");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn error_code(response: reqwest::Response) -> String {
    response
        .json::<ErrorEnvelope>()
        .await
        .expect("error envelope")
        .code
}

#[tokio::test]
async fn toggling_a_source_drives_the_active_view() {
    let h = Harness::start(None).await;
    assert!(h.view().await.active.is_empty());

    h.enable_nginx().await;
    let view = h.view().await;
    let urls: Vec<&str> = view.active.iter().map(|a| a.app.url.as_str()).collect();
    assert_eq!(urls, vec!["https://apps.lan/grafana", "https://apps.lan/paperless/"]);

    let statuses: Vec<SourceStatus> = h
        .http
        .get(h.url("/api/admin/discovery"))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    let nginx = statuses
        .iter()
        .find(|s| s.source == SourceKind::Nginx)
        .expect("nginx status");
    assert!(nginx.enabled && nginx.running);
    assert_eq!(nginx.apps, 2);

    let response = h
        .http
        .put(h.url("/api/admin/discovery/nginx"))
        .json(&json!({"enabled": false}))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.view().await.active.is_empty());
}

#[tokio::test]
async fn bulk_show_then_stale_after_disable() {
    let h = Harness::start(None).await;
    h.enable_nginx().await;

    let response = h
        .http
        .post(h.url("/api/admin/discovered-apps/bulk"))
        .json(&json!({
            "urls": ["https://apps.lan/grafana"],
            "action": "show",
            "category": "Monitoring",
            "groups": ["admins"]
        }))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body, json!({"status": "ok", "updated": 1}));

    let view = h.view().await;
    let grafana = &view.active[0];
    assert!(grafana.overridden);
    assert_eq!(grafana.category, "Monitoring");
    assert_eq!(grafana.groups, vec!["admins"]);

    h.http
        .put(h.url("/api/admin/discovery/nginx"))
        .json(&json!({"enabled": false}))
        .send()
        .await
        .expect("send");
    let view = h.view().await;
    assert!(view.active.is_empty());
    assert_eq!(view.stale.len(), 1);
    assert_eq!(view.stale[0].url, "https://apps.lan/grafana");
}

#[tokio::test]
async fn bulk_validation_order() {
    let h = Harness::start(None).await;
    let bulk = h.url("/api/admin/discovered-apps/bulk");

    let response = h.http.get(&bulk).send().await.expect("send");
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(error_code(response).await, "method_not_allowed");

    let response = h.http.post(&bulk).body("{oops").send().await.expect("send");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let too_many: Vec<String> = (0..101).map(|i| format!("http://{i}")).collect();
    let cases = [
        (json!({"urls": [], "action": "nope"}), "No URLs provided"),
        (
            json!({"urls": too_many, "action": "nope"}),
            "Too many URLs (max 100)",
        ),
        (json!({"urls": ["http://a"], "action": "hide"}), "Invalid action: hide"),
    ];
    for (body, message) in cases {
        let response = h.http.post(&bulk).json(&body).send().await.expect("send");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let envelope: ErrorEnvelope = response.json().await.expect("json");
        assert_eq!(envelope.message, message);
    }

    let exactly_100: Vec<String> = (0..100).map(|i| format!("http://{i}")).collect();
    let response = h
        .http
        .post(&bulk)
        .json(&json!({"urls": exactly_100, "action": "show"}))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn single_override_put_and_delete() {
    let h = Harness::start(None).await;
    let endpoint = h.url("/api/admin/discovered-apps");

    let response = h
        .http
        .put(&endpoint)
        .json(&json!({"hidden": true}))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h
        .http
        .put(&endpoint)
        .json(&json!({"url": "http://old.lan", "hidden": true, "groups": null}))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::OK);
    let view = h.view().await;
    assert_eq!(view.stale.len(), 1);
    assert!(view.stale[0].groups.is_empty());

    let response = h.http.delete(&endpoint).send().await.expect("send");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h
        .http
        .delete(&endpoint)
        .query(&[("url", "http://old.lan")])
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.view().await.stale.is_empty());

    let response = h.http.patch(&endpoint).send().await.expect("send");
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn source_endpoints_validate_input() {
    let h = Harness::start(None).await;

    let response = h
        .http
        .put(h.url("/api/admin/discovery/gopher"))
        .json(&json!({"enabled": true}))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = h
        .http
        .put(h.url("/api/admin/discovery/docker"))
        .json(&json!({"enabled": true}))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_request");

    let result: ConnectionTestResult = h
        .http
        .post(h.url("/api/admin/discovery/unraid/test"))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    assert!(!result.ok);
    assert!(!result.auth_failed);
    assert!(result.error.is_some());

    let result: ConnectionTestResult = h
        .http
        .post(h.url("/api/admin/discovery/nginx/test"))
        .send()
        .await
        .expect("send")
        .json()
        .await
        .expect("json");
    assert!(result.ok);
    assert_eq!(result.apps, 2);
}

#[tokio::test]
async fn bearer_token_guards_admin_routes_only() {
    let h = Harness::start(Some("s3cret")).await;

    let response = h.http.get(h.url("/health")).send().await.expect("send");
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .http
        .get(h.url("/api/admin/discovered-apps"))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok()),
        Some("Bearer")
    );
    assert_eq!(error_code(response).await, "unauthorized");

    let response = h
        .http
        .get(h.url("/api/admin/discovered-apps"))
        .bearer_auth("s3cret")
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::OK);
}
