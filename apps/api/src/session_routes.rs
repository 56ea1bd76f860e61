use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use gfs_core::{ChunkingConfig, CustomMetadata, FileBlob, MetadataField};
use gfs_error::{GfsError, Result};
use gfs_session::{QueryOutcome, SessionService, SessionView};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionService,
}

pub fn router(state: AppState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/sessions", post(open_session))
        .route(
            "/api/v1/sessions/:id",
            get(get_session).delete(close_session),
        )
        .route("/api/v1/sessions/:id/store", post(create_store))
        .route(
            "/api/v1/sessions/:id/files",
            post(upload_files).layer(DefaultBodyLimit::max(max_request_bytes)),
        )
        .route("/api/v1/sessions/:id/files/:file_id", delete(remove_file))
        .route("/api/v1/sessions/:id/proceed", post(proceed))
        .route("/api/v1/sessions/:id/query", post(query))
        .route("/api/v1/sessions/:id/metadata", post(add_metadata))
        .route(
            "/api/v1/sessions/:id/metadata/:meta_id",
            patch(update_metadata).delete(remove_metadata),
        )
        .route("/api/v1/sessions/:id/chunking", put(set_chunking))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn open_session(State(state): State<AppState>) -> (StatusCode, Json<SessionView>) {
    (StatusCode::CREATED, Json(state.sessions.open_session().await))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>> {
    Ok(Json(state.sessions.view(id).await?))
}

async fn close_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    state.sessions.close_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CreateStoreReq {
    display_name: String,
}

async fn create_store(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateStoreReq>,
) -> Result<Json<SessionView>> {
    Ok(Json(
        state.sessions.create_store(id, &req.display_name).await?,
    ))
}

/// 读取所有名为 `file` 的 multipart 字段
async fn upload_files(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<SessionView>> {
    let bad_multipart = |e: axum::extract::multipart::MultipartError| GfsError::InvalidRequest {
        reason: format!("multipart: {}", e),
    };

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "upload.bin".into());
        let mime_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_default();
        let data = field.bytes().await.map_err(bad_multipart)?;
        files.push(FileBlob::new(name, mime_type, data.to_vec()));
    }
    Ok(Json(state.sessions.add_files(id, files).await?))
}

async fn remove_file(
    State(state): State<AppState>,
    Path((id, file_id)): Path<(Uuid, String)>,
) -> Result<Json<SessionView>> {
    Ok(Json(state.sessions.remove_file(id, &file_id).await?))
}

async fn proceed(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SessionView>> {
    Ok(Json(state.sessions.proceed_to_index(id).await?))
}

#[derive(Deserialize)]
struct QueryReq {
    question: String,
}

async fn query(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<QueryReq>,
) -> Result<Json<QueryOutcome>> {
    Ok(Json(state.sessions.ask(id, &req.question).await?))
}

async fn add_metadata(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<CustomMetadata>)> {
    let entry = state.sessions.add_metadata(id).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Deserialize)]
struct UpdateMetadataReq {
    field: MetadataField,
    text: String,
}

async fn update_metadata(
    State(state): State<AppState>,
    Path((id, meta_id)): Path<(Uuid, String)>,
    Json(req): Json<UpdateMetadataReq>,
) -> Result<Json<SessionView>> {
    Ok(Json(
        state
            .sessions
            .update_metadata(id, &meta_id, req.field, &req.text)
            .await?,
    ))
}

async fn remove_metadata(
    State(state): State<AppState>,
    Path((id, meta_id)): Path<(Uuid, String)>,
) -> Result<Json<SessionView>> {
    Ok(Json(state.sessions.remove_metadata(id, &meta_id).await?))
}

async fn set_chunking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(cfg): Json<ChunkingConfig>,
) -> Result<Json<SessionView>> {
    Ok(Json(state.sessions.set_chunking(id, cfg).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use gfs_core::{QueryAnswer, Source};
    use gfs_rag::QueryEngine;
    use gfs_session::{SimulatedBackend, UploadGuideline, WizardTimings};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct CannedEngine {
        fail: bool,
    }

    #[async_trait]
    impl QueryEngine for CannedEngine {
        async fn query(&self, files: &[Arc<FileBlob>], _question: &str) -> Result<QueryAnswer> {
            if self.fail {
                return Err(GfsError::LlmService {
                    provider: "gemini".to_string(),
                    message: "status=503 body=unavailable".to_string(),
                    retry_after: None,
                });
            }
            Ok(QueryAnswer {
                text: "grounded answer".to_string(),
                sources: files
                    .iter()
                    .map(|f| Source {
                        file_name: f.name.clone(),
                    })
                    .collect(),
            })
        }
    }

    fn app(fail: bool) -> Router {
        let sessions = SessionService::new(
            Arc::new(SimulatedBackend::new(WizardTimings::default())),
            Arc::new(CannedEngine { fail }),
            UploadGuideline::default(),
        );
        router(AppState { sessions }, 1024 * 1024)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn json_req(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_req(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn multipart_req(uri: &str, files: &[(&str, &str, &str)]) -> Request<Body> {
        let boundary = "gfs-test-boundary";
        let mut body = String::new();
        for (name, mime, content) in files {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: {mime}\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn open(app: &Router) -> String {
        let (status, body) = send(app, empty_req("POST", "/api/v1/sessions")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["step"], "create");
        body["id"].as_str().unwrap().to_string()
    }

    async fn walk_to_query(app: &Router) -> String {
        let id = open(app).await;
        let (status, _) = send(
            app,
            json_req(
                "POST",
                &format!("/api/v1/sessions/{id}/store"),
                json!({ "display_name": "Project Alpha" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(600)).await;

        let (status, body) = send(
            app,
            multipart_req(
                &format!("/api/v1/sessions/{id}/files"),
                &[("A.txt", "text/plain", "alpha"), ("B.pdf", "application/pdf", "%PDF")],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"].as_array().unwrap().len(), 2);
        assert_eq!(body["files"][0]["state"], "uploading");

        let (status, _) = send(app, empty_req("POST", &format!("/api/v1/sessions/{id}/proceed"))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        let (status, body) = send(app, empty_req("POST", &format!("/api/v1/sessions/{id}/proceed"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step"], "index");

        tokio::time::sleep(Duration::from_millis(1600)).await;
        let (_, body) = send(app, empty_req("GET", &format!("/api/v1/sessions/{id}"))).await;
        assert_eq!(body["step"], "query");
        id
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(false), empty_req("GET", "/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let uri = format!("/api/v1/sessions/{}", Uuid::new_v4());
        let (status, body) = send(&app(false), empty_req("GET", &uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("session"));
    }

    #[tokio::test]
    async fn test_empty_store_name_is_rejected() {
        let app = app(false);
        let id = open(&app).await;
        let (status, _) = send(
            &app,
            json_req(
                "POST",
                &format!("/api/v1/sessions/{id}/store"),
                json!({ "display_name": "   " }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, body) = send(&app, empty_req("GET", &format!("/api/v1/sessions/{id}"))).await;
        assert!(body["corpus"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_wizard_flow() {
        let app = app(false);
        let id = walk_to_query(&app).await;

        let (status, body) = send(
            &app,
            json_req(
                "POST",
                &format!("/api/v1/sessions/{id}/query"),
                json!({ "question": "What is in these?" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"]["role"], "model");
        assert_eq!(body["message"]["content"], "grounded answer");
        assert_eq!(
            body["message"]["sources"],
            json!([{ "file_name": "A.txt" }, { "file_name": "B.pdf" }])
        );
        assert_eq!(body["session"]["chat"].as_array().unwrap().len(), 2);
        assert!(body["session"]["error"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_query_is_not_an_http_error() {
        let app = app(true);
        let id = walk_to_query(&app).await;

        let (status, body) = send(
            &app,
            json_req(
                "POST",
                &format!("/api/v1/sessions/{id}/query"),
                json!({ "question": "Hello?" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["message"]["content"],
            "Sorry, I encountered an error while searching your files."
        );
        let banner = body["session"]["error"].as_str().unwrap();
        assert!(banner.starts_with("Error querying files:"));
        assert!(banner.contains("unavailable"));
        assert_eq!(body["session"]["chat"].as_array().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_and_chunking_routes() {
        let app = app(false);
        let id = open(&app).await;
        send(
            &app,
            json_req(
                "POST",
                &format!("/api/v1/sessions/{id}/store"),
                json!({ "display_name": "Docs" }),
            ),
        )
        .await;

        let (status, entry) = send(&app, empty_req("POST", &format!("/api/v1/sessions/{id}/metadata"))).await;
        assert_eq!(status, StatusCode::CREATED);
        let meta_id = entry["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            json_req(
                "PATCH",
                &format!("/api/v1/sessions/{id}/metadata/{meta_id}"),
                json!({ "field": "key", "text": "author" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["metadata"][0]["key"], "author");

        let (status, body) = send(
            &app,
            json_req(
                "PUT",
                &format!("/api/v1/sessions/{id}/chunking"),
                json!({ "max_tokens": 512, "overlap_tokens": 50 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chunking"]["max_tokens"], 512);

        let (status, _) = send(
            &app,
            empty_req("DELETE", &format!("/api/v1/sessions/{id}/metadata/{meta_id}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &app,
            empty_req("DELETE", &format!("/api/v1/sessions/{id}/metadata/{meta_id}")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_close_session() {
        let app = app(false);
        let id = open(&app).await;
        let (status, _) = send(&app, empty_req("DELETE", &format!("/api/v1/sessions/{id}"))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, empty_req("GET", &format!("/api/v1/sessions/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
