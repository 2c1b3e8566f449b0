use axum::{
    Json, Router,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use std::{collections::{BTreeMap, HashMap}, sync::Arc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{
    api::StudioApi,
    config::StudioSettings,
    error::{Operation, StudioError},
    models::{LoadState, Provider},
    session::StudioView,
    studio::Studio,
    upload::MISSING_IMAGE,
};

pub const EXPORT_FILE_NAME: &str = "google-vision-analysis-results.json";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<HashMap<Uuid, Arc<Studio>>>>,
    pub api: Arc<dyn StudioApi>,
    pub settings: StudioSettings,
}

impl AppState {
    pub fn new(api: Arc<dyn StudioApi>, settings: StudioSettings) -> Self {
        Self { store: Arc::default(), api, settings }
    }

    fn studio(&self, id: Uuid) -> Result<Arc<Studio>, ApiError> {
        self.store.read().get(&id).cloned().ok_or(ApiError::NotFound("studio not found"))
    }
}

pub fn router(state: AppState) -> Router {
    // Leave headroom over the image limit for multipart framing.
    let body_limit = state.settings.upload_max_bytes + 64 * 1024;
    Router::new()
        .route("/api/studios", post(create_studio))
        .route("/api/studios/:id", get(get_studio).delete(delete_studio))
        .route("/api/studios/:id/image", post(upload_image))
        .route("/api/studios/:id/clear", post(clear_studio))
        .route("/api/studios/:id/analyze", post(analyze))
        .route("/api/studios/:id/product-info", put(update_product_info))
        .route("/api/studios/:id/candidates/:index/loaded", post(candidate_loaded))
        .route("/api/studios/:id/candidates/:index/failed", post(candidate_failed))
        .route("/api/studios/:id/selection", post(toggle_selection))
        .route("/api/studios/:id/review", post(set_review))
        .route("/api/studios/:id/generate/:provider", post(generate))
        .route("/api/studios/:id/export", get(export_analysis))
        .route("/api/studios/:id/error", delete(dismiss_error))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(&'static str),
    Studio(Operation, StudioError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what.to_string()),
            ApiError::Studio(op, err) => {
                let status = match &err {
                    StudioError::Validation(_) => StatusCode::BAD_REQUEST,
                    StudioError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    StudioError::Transport { .. } | StudioError::Parse(_) => StatusCode::BAD_GATEWAY,
                };
                (status, err.user_message(op))
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn failed(op: Operation) -> impl Fn(StudioError) -> ApiError {
    move |err| ApiError::Studio(op, err)
}

pub async fn create_studio(State(state): State<AppState>) -> (StatusCode, Json<StudioView>) {
    let studio = Arc::new(Studio::new(Arc::clone(&state.api), state.settings.clone()));
    let view = studio.view();
    state.store.write().insert(studio.id(), studio);
    tracing::info!("🆕 Created studio {}", view.id);
    (StatusCode::CREATED, Json(view))
}

pub async fn get_studio(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<StudioView>, ApiError> {
    Ok(Json(state.studio(id)?.view()))
}

pub async fn delete_studio(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let studio = state.store.write().remove(&id).ok_or(ApiError::NotFound("studio not found"))?;
    studio.shutdown();
    tracing::info!("👋 Tore down studio {}", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn upload_image(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<StudioView>, ApiError> {
    let studio = state.studio(id)?;
    let malformed = |e: MultipartError| {
        let err = StudioError::Validation(format!("Malformed upload: {}", e));
        ApiError::Studio(Operation::Upload, studio.report(Operation::Upload, err))
    };
    loop {
        let Some(field) = multipart.next_field().await.map_err(malformed)? else {
            let err = StudioError::Validation(MISSING_IMAGE.to_string());
            return Err(ApiError::Studio(Operation::Upload, studio.report(Operation::Upload, err)));
        };
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(malformed)?;
        studio
            .select_image(&file_name, content_type.as_deref(), bytes)
            .map_err(failed(Operation::Upload))?;
        return Ok(Json(studio.view()));
    }
}

pub async fn clear_studio(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<StudioView>, ApiError> {
    let studio = state.studio(id)?;
    studio.clear();
    Ok(Json(studio.view()))
}

pub async fn analyze(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<StudioView>, ApiError> {
    let studio = state.studio(id)?;
    studio.analyze().await.map_err(failed(Operation::Analyze))?;
    Ok(Json(studio.view()))
}

pub async fn update_product_info(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(fields): Json<BTreeMap<String, String>>,
) -> Result<Json<StudioView>, ApiError> {
    let studio = state.studio(id)?;
    studio.update_product_info(fields);
    Ok(Json(studio.view()))
}

pub async fn candidate_loaded(
    Path((id, index)): Path<(Uuid, usize)>,
    State(state): State<AppState>,
) -> Result<Json<StudioView>, ApiError> {
    mark_candidate(&state, id, index, LoadState::Loaded)
}

pub async fn candidate_failed(
    Path((id, index)): Path<(Uuid, usize)>,
    State(state): State<AppState>,
) -> Result<Json<StudioView>, ApiError> {
    mark_candidate(&state, id, index, LoadState::Failed)
}

fn mark_candidate(
    state: &AppState,
    id: Uuid,
    index: usize,
    load_state: LoadState,
) -> Result<Json<StudioView>, ApiError> {
    let studio = state.studio(id)?;
    studio.set_load_state(index, load_state).map_err(failed(Operation::Review))?;
    Ok(Json(studio.view()))
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub url: String,
    pub index: usize,
}

pub async fn toggle_selection(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<StudioView>, ApiError> {
    let studio = state.studio(id)?;
    studio.toggle_selection(&body.url, body.index);
    Ok(Json(studio.view()))
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    #[serde(default = "default_open")]
    pub open: bool,
}

fn default_open() -> bool { true }

pub async fn set_review(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<ReviewRequest>,
) -> Result<Json<StudioView>, ApiError> {
    let studio = state.studio(id)?;
    studio.set_reviewing(body.open);
    Ok(Json(studio.view()))
}

pub async fn generate(
    Path((id, provider)): Path<(Uuid, String)>,
    State(state): State<AppState>,
) -> Result<Json<StudioView>, ApiError> {
    let studio = state.studio(id)?;
    let provider: Provider = provider
        .parse()
        .map_err(|e| ApiError::Studio(Operation::Generate, studio.report(Operation::Generate, e)))?;
    tracing::info!("🎯 Studio {} generating with {}", id, provider);
    studio.generate(provider).await.map_err(failed(Operation::Generate))?;
    Ok(Json(studio.view()))
}

#[derive(Debug, Deserialize, Default)]
pub struct ExportQuery {
    #[serde(default)]
    pub copy: bool,
}

pub async fn export_analysis(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let studio = state.studio(id)?;
    let body = studio.export_json().ok_or(ApiError::NotFound("no analysis to export"))?;
    if query.copy {
        return Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response());
    }
    let disposition = format!("attachment; filename=\"{}\"", EXPORT_FILE_NAME);
    Ok((
        [(header::CONTENT_TYPE, "application/json".to_string()), (header::CONTENT_DISPOSITION, disposition)],
        body,
    )
        .into_response())
}

pub async fn dismiss_error(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<StudioView>, ApiError> {
    let studio = state.studio(id)?;
    studio.dismiss_error();
    Ok(Json(studio.view()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::fake::FakeApi, upload::PNG_MAGIC};
    use axum::{body::{to_bytes, Body}, http::Request};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "studio-boundary";

    fn app(api: Arc<FakeApi>) -> (AppState, Router) {
        let state = AppState::new(api, StudioSettings::default());
        (state.clone(), router(state))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn empty(method: &str, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_image(uri: &str, field: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"shoe.png\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn create(app: &Router) -> String {
        let (status, view) = send_json(app, empty("POST", "/api/studios")).await;
        assert_eq!(status, StatusCode::CREATED);
        view["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn unknown_studio_is_not_found() {
        let (_, app) = app(Arc::new(FakeApi::default()));
        let (status, body) = send_json(&app, empty("GET", &format!("/api/studios/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "studio not found");
    }

    #[tokio::test]
    async fn upload_analyze_select_and_export() {
        let api = Arc::new(FakeApi::default());
        api.analyze.lock().push_back(Ok(json!({
            "status": "success",
            "data": { "web_matches": { "similar_images": ["https://a", "https://b"] } }
        })));
        let (_, app) = app(api);
        let id = create(&app).await;

        let (status, view) = send_json(&app, multipart_image(&format!("/api/studios/{id}/image"), "image", "image/png", PNG_MAGIC)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["image"]["file_name"], "shoe.png");

        let (status, view) = send_json(&app, empty("POST", &format!("/api/studios/{id}/analyze"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["total_count"], 2);

        let (_, view) = send_json(&app, empty("POST", &format!("/api/studios/{id}/candidates/0/failed"))).await;
        assert_eq!(view["valid_count"], 1);

        let toggle = json!({ "url": "https://b", "index": 1 });
        let (_, view) = send_json(&app, with_json("POST", &format!("/api/studios/{id}/selection"), toggle)).await;
        assert_eq!(view["selected"], json!([{ "url": "https://b", "index": 1 }]));

        let (status, body) = send(&app, empty("GET", &format!("/api/studios/{id}/export?copy=true"))).await;
        assert_eq!(status, StatusCode::OK);
        let exported: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(exported["status"], "success");
    }

    #[tokio::test]
    async fn non_image_upload_is_rejected_with_banner() {
        let (_, app) = app(Arc::new(FakeApi::default()));
        let id = create(&app).await;
        let (status, body) = send_json(&app, multipart_image(&format!("/api/studios/{id}/image"), "image", "text/plain", b"hello")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Only image files are supported");

        let (_, view) = send_json(&app, empty("GET", &format!("/api/studios/{id}"))).await;
        assert_eq!(view["error"], "Only image files are supported");
        let (_, view) = send_json(&app, empty("DELETE", &format!("/api/studios/{id}/error"))).await;
        assert_eq!(view["error"], Value::Null);
    }

    #[tokio::test]
    async fn unknown_provider_and_missing_export_are_reported() {
        let (_, app) = app(Arc::new(FakeApi::default()));
        let id = create(&app).await;
        let (status, body) = send_json(&app, empty("POST", &format!("/api/studios/{id}/generate/midjourney"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unknown provider: midjourney");
        let (_, view) = send_json(&app, empty("GET", &format!("/api/studios/{id}"))).await;
        assert_eq!(view["error"], "Unknown provider: midjourney");

        let (status, _) = send(&app, empty("GET", &format!("/api/studios/{id}/export"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_upload_sets_banner() {
        let (_, app) = app(Arc::new(FakeApi::default()));
        let id = create(&app).await;
        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/studios/{id}/image"))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"")))
            .unwrap();
        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, view) = send_json(&app, empty("GET", &format!("/api/studios/{id}"))).await;
        assert_eq!(view["error"], body["error"]);
        assert!(view["error"].is_string());
    }

    #[tokio::test]
    async fn product_info_edits_and_teardown() {
        let (state, app) = app(Arc::new(FakeApi::default()));
        let id = create(&app).await;
        let fields = json!({ "brand": "Acme", "SKU": "A-1" });
        let (_, view) = send_json(&app, with_json("PUT", &format!("/api/studios/{id}/product-info"), fields)).await;
        assert_eq!(view["product_info"]["brand"], "Acme");
        assert_eq!(view["product_info"]["SKU"], "A-1");

        let (status, _) = send(&app, empty("DELETE", &format!("/api/studios/{id}"))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.store.read().is_empty());
    }
}
