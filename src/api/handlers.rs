//! HTTP request handlers.

use std::path::PathBuf;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Html;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::application::Stage;
use crate::domain::{
    AppError, Contact, ExportFailure, ExportFormat, ExportJob, ExportSummary, MessageFilter,
    MessageKind, SessionSummary,
};

use super::response::{ok, ApiResult};
use super::state::AppState;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// Operator page.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Decrypt the running client's data and make it the active session.
pub async fn decrypt(State(state): State<AppState>) -> ApiResult<SessionSummary> {
    let summary = state.decrypt.decrypt().await?;
    ok(summary)
}

/// List the contacts of the active session.
pub async fn list_contacts(State(state): State<AppState>) -> ApiResult<Vec<Contact>> {
    let catalog = state.catalog.list_contacts().await?;
    ok(catalog.contacts)
}

/// Export request body.
#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub wxid: Option<String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub batch: bool,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    /// Message kind names; absent or empty means all kinds.
    #[serde(default)]
    pub message_types: Option<Vec<String>>,
}

fn default_format() -> String {
    ExportFormat::Html.name().to_string()
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub output_path: PathBuf,
    /// Seconds, two decimals.
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<Vec<ExportFailure>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
}

impl From<ExportSummary> for ExportResponse {
    fn from(summary: ExportSummary) -> Self {
        let duration = summary.duration_secs();
        let batch = matches!(summary.scope, crate::domain::ExportScope::Batch);
        Self {
            output_path: summary.output_dir,
            duration,
            count: batch.then_some(summary.exported),
            total: batch.then_some(summary.total),
            failures: batch.then_some(summary.failures),
            timed_out: batch.then_some(summary.timed_out),
        }
    }
}

/// Export one contact or, with `batch`, every contact.
///
/// A missing session is reported before anything in the request is checked.
pub async fn export(
    State(state): State<AppState>,
    payload: Result<Json<ExportRequest>, JsonRejection>,
) -> ApiResult<ExportResponse> {
    let Json(request) = payload.map_err(|e| AppError::invalid_request(e.body_text()))?;
    state.export.ready_database().await?;
    let job = build_job(&state, request)?;
    let summary = state.export.export(job).await?;
    ok(summary.into())
}

fn build_job(state: &AppState, request: ExportRequest) -> Result<ExportJob, AppError> {
    let format: ExportFormat = request.format.parse().map_err(AppError::unsupported_format)?;

    let job = if request.batch {
        ExportJob::batch(format)
    } else {
        let wxid = request
            .wxid
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::invalid_request("specify the contact (wxid) to export"))?;
        ExportJob::single(format, wxid)
    };

    let range = state
        .export_defaults
        .time_range(request.start_time.as_deref(), request.end_time.as_deref())?;

    let filter = request
        .message_types
        .filter(|names| !names.is_empty())
        .map(|names| {
            names
                .iter()
                .map(|name| name.parse::<MessageKind>())
                .collect::<Result<MessageFilter, String>>()
        })
        .transpose()
        .map_err(AppError::invalid_request)?;

    Ok(job.with_time_range(range).with_filter(filter))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub stage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSummary>,
    /// Formats with a writer installed.
    pub formats: Vec<&'static str>,
}

/// Where the pipeline stands and which formats can be exported.
pub async fn status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let active = state.store.get().await?;
    let stage = Stage::of(active.as_ref());

    ok(StatusResponse {
        stage: stage.as_str(),
        session: active.map(|a| a.session.summary()),
        formats: state
            .export
            .writers()
            .formats()
            .into_iter()
            .map(ExportFormat::name)
            .collect(),
    })
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub stage: &'static str,
}

/// Drop the active session.
pub async fn reset(State(state): State<AppState>) -> ApiResult<ResetResponse> {
    state.store.clear().await?;
    ok(ResetResponse {
        stage: Stage::NoSession.as_str(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::api::create_router;
    use crate::api::state::ExportDefaults;
    use crate::application::{
        CatalogService, DecryptService, DecryptSettings, ExportService, InMemorySessionStore,
        SessionStateStore, WriterRegistry,
    };
    use crate::domain::{DEFAULT_RANGE_END, DEFAULT_RANGE_START};
    use crate::test_support::{
        instance, raw_contact, text_message, write_version_table, FakeDatabase, FakeDecryptor,
        FakeDiscovery, FakeReader,
    };

    use super::AppState;

    struct TestApp {
        dir: tempfile::TempDir,
        router: Router,
    }

    impl TestApp {
        fn export_dir(&self) -> std::path::PathBuf {
            self.dir.path().join("exported_data")
        }
    }

    fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("wxid_me");
        fs::create_dir_all(&source).unwrap();
        let version_table = dir.path().join("version_list.json");
        write_version_table(&version_table, &["3.9.12.17"]);

        let database = FakeDatabase::with_contacts(vec![
            raw_contact("a", "Alice", ""),
            raw_contact("b", "", "Bob"),
            raw_contact("c", "", ""),
        ])
        .with_messages("a", vec![text_message(1, 1_700_000_000, false, "hello")]);

        let store: Arc<dyn SessionStateStore> = Arc::new(InMemorySessionStore::default());
        let decrypt = DecryptService::new(
            Arc::clone(&store),
            Arc::new(FakeDiscovery::new(vec![instance("wxid_me", "Me", &source)])),
            Arc::new(FakeDecryptor::default()),
            DecryptSettings {
                version_table,
                work_dir: dir.path().join("work"),
                preferred_owner: None,
            },
        );
        let catalog = CatalogService::new(Arc::clone(&store), Arc::new(FakeReader::new(database)));
        let export = ExportService::new(
            Arc::clone(&store),
            WriterRegistry::with_defaults(),
            dir.path().join("exported_data"),
            None,
        );

        let state = AppState {
            store,
            decrypt: Arc::new(decrypt),
            catalog: Arc::new(catalog),
            export: Arc::new(export),
            export_defaults: ExportDefaults {
                start_time: DEFAULT_RANGE_START.into(),
                end_time: DEFAULT_RANGE_END.into(),
            },
        };

        TestApp {
            dir,
            router: create_router(state),
        }
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> Value {
        let request = Request::builder().uri(uri).method(method);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn load_contacts(router: &Router) -> Value {
        let decrypted = call(router, Method::POST, "/api/decrypt", None).await;
        assert_eq!(decrypted["success"], true, "{decrypted}");
        call(router, Method::GET, "/api/contacts", None).await
    }

    #[tokio::test]
    async fn test_index_serves_page() {
        let app = test_app();
        let response = app
            .router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("/api/decrypt"));
    }

    #[tokio::test]
    async fn test_contacts_before_decrypt_fails_in_envelope() {
        let app = test_app();
        let json = call(&app.router, Method::GET, "/api/contacts", None).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "NO_ACTIVE_SESSION");
        assert!(json["error"].as_str().unwrap().contains("decrypt"));
    }

    #[tokio::test]
    async fn test_decrypt_then_contacts() {
        let app = test_app();

        let decrypted = call(&app.router, Method::POST, "/api/decrypt", None).await;
        assert_eq!(decrypted["data"]["wxid"], "wxid_me");
        assert_eq!(decrypted["data"]["nickname"], "Me");
        assert!(decrypted["data"]["db_path"].as_str().unwrap().ends_with("Msg"));

        let contacts = call(&app.router, Method::GET, "/api/contacts", None).await;
        assert_eq!(contacts["success"], true);
        assert_eq!(
            contacts["data"],
            json!([
                {"wxid": "a", "nickname": "Alice", "is_chatroom": false},
                {"wxid": "b", "nickname": "Bob", "is_chatroom": false},
                {"wxid": "c", "nickname": "c", "is_chatroom": false},
            ])
        );
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let app = test_app();
        load_contacts(&app.router).await;

        let json = call(
            &app.router,
            Method::POST,
            "/api/export",
            Some(json!({"wxid": "a", "format": "unsupported_x", "batch": false})),
        )
        .await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("Unsupported"));
        assert_eq!(json["code"], "UNSUPPORTED_FORMAT");
    }

    #[tokio::test]
    async fn test_export_without_session_reports_session_first() {
        let app = test_app();

        let json = call(
            &app.router,
            Method::POST,
            "/api/export",
            Some(json!({"wxid": "a", "format": "unsupported_x"})),
        )
        .await;
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "NO_ACTIVE_SESSION");

        call(&app.router, Method::POST, "/api/decrypt", None).await;
        let json = call(
            &app.router,
            Method::POST,
            "/api/export",
            Some(json!({"format": "unsupported_x", "batch": true})),
        )
        .await;
        assert_eq!(json["code"], "NO_ACTIVE_SESSION");
        assert!(json["error"].as_str().unwrap().contains("contact list"));
    }

    #[tokio::test]
    async fn test_known_format_without_writer_is_unsupported() {
        let app = test_app();
        load_contacts(&app.router).await;

        let json = call(
            &app.router,
            Method::POST,
            "/api/export",
            Some(json!({"format": "docx", "batch": true})),
        )
        .await;
        assert_eq!(json["code"], "UNSUPPORTED_FORMAT");
        assert!(json["error"].as_str().unwrap().contains("docx"));
    }

    #[tokio::test]
    async fn test_single_export_writes_document() {
        let app = test_app();
        load_contacts(&app.router).await;

        let json = call(
            &app.router,
            Method::POST,
            "/api/export",
            Some(json!({"wxid": "a", "format": "txt", "batch": false})),
        )
        .await;
        assert_eq!(json["success"], true, "{json}");
        assert!(json["data"]["duration"].is_number());
        assert!(json["data"].get("count").is_none());

        let text = fs::read_to_string(app.export_dir().join("Alice").join("Alice.txt")).unwrap();
        assert!(text.contains("hello"));
    }

    #[tokio::test]
    async fn test_single_export_unknown_contact() {
        let app = test_app();
        load_contacts(&app.router).await;

        let json = call(
            &app.router,
            Method::POST,
            "/api/export",
            Some(json!({"wxid": "nobody", "format": "html"})),
        )
        .await;
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "CONTACT_NOT_FOUND");
        assert_eq!(fs::read_dir(app.export_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_batch_export_reports_count() {
        let app = test_app();
        load_contacts(&app.router).await;

        let json = call(
            &app.router,
            Method::POST,
            "/api/export",
            Some(json!({"format": "markdown", "batch": true})),
        )
        .await;
        assert_eq!(json["success"], true, "{json}");
        assert_eq!(json["data"]["count"], 3);
        assert_eq!(json["data"]["total"], 3);
        assert_eq!(json["data"]["failures"], json!([]));
        assert!(app.export_dir().join("Bob").join("Bob.md").exists());
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let app = test_app();
        load_contacts(&app.router).await;

        let missing_wxid = call(
            &app.router,
            Method::POST,
            "/api/export",
            Some(json!({"format": "txt"})),
        )
        .await;
        assert_eq!(missing_wxid["code"], "INVALID_REQUEST");

        let bad_type = call(
            &app.router,
            Method::POST,
            "/api/export",
            Some(json!({"wxid": "a", "format": "txt", "message_types": ["hologram"]})),
        )
        .await;
        assert_eq!(bad_type["code"], "INVALID_REQUEST");

        let bad_range = call(
            &app.router,
            Method::POST,
            "/api/export",
            Some(json!({
                "wxid": "a",
                "format": "txt",
                "start_time": "2030-01-01 00:00:00",
                "end_time": "2021-01-01 00:00:00",
            })),
        )
        .await;
        assert_eq!(bad_range["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_malformed_body_is_reported_in_envelope() {
        let app = test_app();
        let request = Request::builder()
            .uri("/api/export")
            .method(Method::POST)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_status_follows_stages_and_reset() {
        let app = test_app();

        let status = call(&app.router, Method::GET, "/api/status", None).await;
        assert_eq!(status["data"]["stage"], "no_session");
        assert_eq!(status["data"]["formats"], json!(["html", "txt", "markdown"]));

        call(&app.router, Method::POST, "/api/decrypt", None).await;
        let status = call(&app.router, Method::GET, "/api/status", None).await;
        assert_eq!(status["data"]["stage"], "session_ready");
        assert_eq!(status["data"]["session"]["wxid"], "wxid_me");

        call(&app.router, Method::GET, "/api/contacts", None).await;
        let status = call(&app.router, Method::GET, "/api/status", None).await;
        assert_eq!(status["data"]["stage"], "catalog_ready");

        let reset = call(&app.router, Method::POST, "/api/reset", None).await;
        assert_eq!(reset["data"]["stage"], "no_session");
        let status = call(&app.router, Method::GET, "/api/status", None).await;
        assert_eq!(status["data"]["stage"], "no_session");
    }
}
