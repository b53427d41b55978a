use std::sync::Arc;

use amber_core::Daemon;
use amber_model::{ContentHash, SourceConfig};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{AppError, AppResult};

pub async fn add_source(
    State(daemon): State<Arc<Daemon>>,
    Json(config): Json<SourceConfig>,
) -> AppResult<Json<Value>> {
    daemon.add_source(config).await?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn remove_source(
    State(daemon): State<Arc<Daemon>>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    daemon.remove_source(&id).await?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn list_sources(
    State(daemon): State<Arc<Daemon>>,
) -> Json<Vec<SourceConfig>> {
    Json(daemon.list_sources().await)
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

pub async fn set_src_enabled(
    State(daemon): State<Arc<Daemon>>,
    Path(id): Path<String>,
    Json(request): Json<SetEnabledRequest>,
) -> AppResult<Json<Value>> {
    daemon.set_src_enabled(&id, request.enabled).await?;
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
pub struct GetUpdateRequest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub merkle: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetUpdateResponse {
    pub content_hash: String,
}

pub async fn get_update(
    State(daemon): State<Arc<Daemon>>,
    Json(request): Json<GetUpdateRequest>,
) -> AppResult<Json<GetUpdateResponse>> {
    if request.name.is_empty() {
        return Err(AppError::bad_request("package name must not be empty"));
    }
    let merkle = match &request.merkle {
        Some(raw) => Some(raw.parse::<ContentHash>().map_err(|e| {
            AppError::bad_request(format!("invalid merkle: {e}"))
        })?),
        None => None,
    };
    let hash = daemon
        .get_update(&request.name, request.version.as_deref(), merkle)
        .await?;
    Ok(Json(GetUpdateResponse {
        content_hash: hash.to_string(),
    }))
}

pub async fn get_blob(
    State(daemon): State<Arc<Daemon>>,
    Path(hash): Path<String>,
) -> AppResult<Json<Value>> {
    let hash = hash.parse::<ContentHash>().map_err(|e| {
        AppError::bad_request(format!("invalid hash: {e}"))
    })?;
    daemon.get_blob(hash).await?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn check_for_system_update(
    State(daemon): State<Arc<Daemon>>,
) -> Json<Value> {
    let checking = daemon.check_for_system_update();
    Json(json!({"checking": checking}))
}
