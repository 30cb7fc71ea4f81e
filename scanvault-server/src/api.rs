//! HTTP surface: corpus status and the search lifecycle.
//!
//! Handlers stay thin; they call pipeline entry points and translate errors
//! to status codes. While an ingest/index run holds the loading latch every
//! route answers 503.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tracing::error;

use scanvault_core::model::serialize;
use scanvault_core::{Corpus, Error, Megadoc, Pipeline, Search};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/search", post(create_search))
        .route("/search/{guid}", get(get_search).delete(delete_search))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error wrapper translating pipeline errors to status codes.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::BadInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Error::Busy(_) => (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string()),
            _ => {
                error!("internal error: {}", self.0);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".into())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn reject_while_loading(state: &AppState) -> Result<(), ApiError> {
    if state.pipeline.is_loading() {
        return Err(ApiError(Error::Busy("load in progress")));
    }
    Ok(())
}

/// Keys that never leave the server: local paths and internal foreign keys.
fn public_excl() -> HashSet<&'static str> {
    ["scan_guid", "search_guid", "json_path", "text_path", "path", "filename"].into()
}

async fn index(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    reject_while_loading(&state)?;

    let corpus = state
        .pipeline
        .db()
        .read(|conn| Corpus::get_latest(conn))?;

    let mut map = Map::new();
    map.insert(
        "api_version".into(),
        state.pipeline.config().app.version.clone().into(),
    );
    map.insert(
        "corpus".into(),
        corpus
            .map(|c| c.as_dict(&HashSet::new(), false))
            .unwrap_or_else(|| Value::Object(Map::new())),
    );
    Ok(Json(serialize::finish(map, &HashSet::new(), true)))
}

async fn create_search(
    State(state): State<AppState>,
    body: String,
) -> Result<Response, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError(Error::bad_input("empty request")));
    }
    let body: Value = serde_json::from_str(&body)
        .map_err(|_| ApiError(Error::bad_input("invalid request")))?;
    let data = serialize::from_js(body);
    let search_str = data
        .get("search_str")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    if search_str.is_empty() {
        return Err(ApiError(Error::bad_input("invalid request")));
    }

    let search = state.pipeline.create_search(&search_str)?;
    let guid = search.meta.guid.clone();

    let pipeline = state.pipeline.clone();
    let filetypes = state.pipeline.config().app.megadoc_types.clone();
    let task_guid = guid.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline.run_search(&task_guid, &filetypes).await {
            error!("search pipeline <{task_guid}> failed: {e}");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, format!("/search/{guid}"))],
    )
        .into_response())
}

async fn get_search(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    reject_while_loading(&state)?;

    let data_path = state.pipeline.config().data_path();
    let value = state.pipeline.db().read(|conn| {
        let Some(search) = Search::get(conn, &guid)? else {
            return Err(Error::not_found(format!("search <{guid}>")));
        };
        let corpus = search.corpus(conn)?;
        let document_count = search.document_count(conn)?;
        let megadocs: Vec<(Megadoc, u64)> = search
            .megadocs(conn)?
            .into_iter()
            .map(|m| {
                let filesize = m.filesize(&data_path);
                (m, filesize)
            })
            .collect();
        Ok(search.as_dict(&corpus, &megadocs, document_count, &public_excl(), true))
    })?;
    Ok(Json(value))
}

async fn delete_search(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> Result<StatusCode, ApiError> {
    reject_while_loading(&state)?;

    let deleted = state
        .pipeline
        .db()
        .write(|conn| Search::delete(conn, &guid))?;
    if !deleted {
        return Err(ApiError(Error::not_found(format!("search <{guid}>"))));
    }
    Ok(StatusCode::NO_CONTENT)
}
