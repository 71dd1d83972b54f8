//! Control-plane HTTP API.
//!
//! CRUD over rule lists plus a manual update trigger, mounted by the
//! embedding server under a prefix of its choosing. Request and response
//! bodies are JSON; errors are `{"error": "<message>"}`.

use crate::filter::RuleFilter;
use crate::store::{self, RuleList};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::future::join_all;
use serde_json::json;
use std::io;
use tracing::{error, info, warn};
use uuid::Uuid;

impl RuleFilter {
    /// The router for the control API, ready to be mounted by the host.
    pub fn api_router(&self) -> Router {
        Router::new()
            .route("/rules", get(list_rules).post(create_rule))
            .route("/rules/{id}", put(update_rule).delete(delete_rule))
            .route("/update", post(update_all))
            .with_state(self.clone())
    }
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn save_failed(err: anyhow::Error) -> Self {
        error!(%err, "failed to save manifest");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "failed to save config".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message }).to_string();
        (
            self.status,
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

/// Trims and checks the client-editable fields.
fn validated(mut body: RuleList) -> Result<RuleList, ApiError> {
    body.name = body.name.trim().to_string();
    body.url = body.url.trim().to_string();
    if body.name.is_empty() || body.url.is_empty() {
        return Err(ApiError::bad_request("name and url are required"));
    }
    if body.update_interval_hours < 0 {
        return Err(ApiError::bad_request(
            "update_interval_hours cannot be negative",
        ));
    }
    Ok(body)
}

async fn list_rules(State(filter): State<RuleFilter>) -> Json<Vec<RuleList>> {
    let mut lists: Vec<RuleList> = {
        let rules = filter.inner.rules.read().unwrap();
        rules.values().cloned().collect()
    };
    lists.sort_by(|a, b| a.name.cmp(&b.name));
    Json(lists)
}

async fn create_rule(
    State(filter): State<RuleFilter>,
    payload: Result<Json<RuleList>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload.map_err(|_| ApiError::bad_request("invalid request body"))?;
    let mut rule = validated(body)?;

    // The server owns identity: fresh id, derived path, no update yet.
    rule.id = Uuid::new_v4().to_string();
    rule.local_path = store::rule_file_path(&filter.inner.dir, &rule.id);
    rule.last_updated = None;

    {
        let mut rules = filter.inner.rules.write().unwrap();
        rules.insert(rule.id.clone(), rule.clone());
    }
    filter.save_manifest().await.map_err(ApiError::save_failed)?;

    if rule.enabled {
        let worker = filter.clone();
        let id = rule.id.clone();
        tokio::spawn(async move {
            if let Err(err) = worker.download_guarded(&id).await {
                error!(%err, "failed to download new rule list");
            }
            worker.trigger_reload();
        });
    }

    Ok((StatusCode::CREATED, Json(rule)))
}

async fn update_rule(
    State(filter): State<RuleFilter>,
    Path(id): Path<String>,
    payload: Result<Json<RuleList>, JsonRejection>,
) -> Result<Json<RuleList>, ApiError> {
    let Json(body) = payload.map_err(|_| ApiError::bad_request("invalid request body"))?;
    let body = validated(body)?;

    let updated = {
        let mut rules = filter.inner.rules.write().unwrap();
        let rule = rules
            .get_mut(&id)
            .ok_or_else(|| ApiError::not_found("rule list not found"))?;
        rule.name = body.name;
        rule.url = body.url;
        rule.enabled = body.enabled;
        rule.auto_update = body.auto_update;
        rule.update_interval_hours = body.update_interval_hours;
        rule.clone()
    };

    filter.save_manifest().await.map_err(ApiError::save_failed)?;
    filter.trigger_reload();
    Ok(Json(updated))
}

async fn delete_rule(
    State(filter): State<RuleFilter>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = {
        let mut rules = filter.inner.rules.write().unwrap();
        rules
            .remove(&id)
            .ok_or_else(|| ApiError::not_found("rule list not found"))?
    };

    match tokio::fs::remove_file(&removed.local_path).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(path = %removed.local_path.display(), %err, "failed to delete rule file");
        }
    }

    filter.save_manifest().await.map_err(ApiError::save_failed)?;
    filter.trigger_reload();
    Ok(StatusCode::NO_CONTENT)
}

async fn update_all(State(filter): State<RuleFilter>) -> impl IntoResponse {
    info!("manual update triggered for all enabled rule lists");

    let worker = filter.clone();
    tokio::spawn(async move {
        let ids: Vec<String> = {
            let rules = worker.inner.rules.read().unwrap();
            rules
                .values()
                .filter(|list| list.enabled)
                .map(|list| list.id.clone())
                .collect()
        };

        let this = &worker;
        join_all(ids.iter().map(|id| async move {
            if let Err(err) = this.download_guarded(id).await {
                error!(%err, "manual update download failed");
            }
        }))
        .await;

        info!("manual update finished");
        worker.trigger_reload();
    });

    (StatusCode::ACCEPTED, Json(json!({ "status": "update started" })))
}
