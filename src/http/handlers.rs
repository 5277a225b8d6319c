//! Route handlers. Each one is a thin adapter onto [`AppContext`](crate::context::AppContext).

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};

use super::types::{
    CommandRequest, CommandResponse, DeleteResponse, ItemView, ItemsResponse, KeysQuery,
    KeysResponse, SearchParams, SetRequest, StoreDeletedResponse, StoreResponse, UpdateRequest,
    ValueResponse,
};
use super::{AppError, SharedState};
use crate::context::{HealthReport, SearchOutcome};
use crate::error::Error;
use crate::services::search::SearchQuery;
use crate::services::snapshot::SnapshotInfo;

/// GET /health - Service status and current backend.
pub(crate) async fn health(State(state): State<SharedState>) -> Json<HealthReport> {
    Json(state.ctx.health().await)
}

/// GET /metrics - Prometheus exposition.
pub(crate) async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// GET /stores - Store names, sorted.
pub(crate) async fn list_stores(
    State(state): State<SharedState>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.ctx.list_stores().await?))
}

/// PUT /stores/{store} - Create a store (idempotent).
pub(crate) async fn create_store(
    State(state): State<SharedState>,
    Path(store): Path<String>,
) -> Result<Json<StoreResponse>, AppError> {
    state.ctx.create_store(&store).await?;
    Ok(Json(StoreResponse { ok: true, store }))
}

/// DELETE /stores/{store} - Remove a store and its entries.
pub(crate) async fn delete_store(
    State(state): State<SharedState>,
    Path(store): Path<String>,
) -> Result<Json<StoreDeletedResponse>, AppError> {
    if !state.ctx.delete_store(&store).await? {
        return Err(AppError::NotFound(format!("Store '{store}' not found")));
    }
    Ok(Json(StoreDeletedResponse {
        ok: true,
        deleted: store,
    }))
}

/// POST /stores/{store}/set - Set a scalar with optional TTL (seconds).
pub(crate) async fn set_item(
    State(state): State<SharedState>,
    Path(store): Path<String>,
    Json(req): Json<SetRequest>,
) -> Result<Json<ValueResponse>, AppError> {
    let ttl = req.ttl.map(Duration::from_secs);
    state
        .ctx
        .set(&store, &req.key, req.value.clone(), ttl)
        .await?;
    Ok(Json(ValueResponse {
        ok: true,
        store,
        key: req.key,
        value: req.value,
    }))
}

/// GET /stores/{store}/get/{key} - Read a scalar.
pub(crate) async fn get_item(
    State(state): State<SharedState>,
    Path((store, key)): Path<(String, String)>,
) -> Result<Json<ValueResponse>, AppError> {
    let value = state.ctx.get(&store, &key).await?;
    Ok(Json(ValueResponse {
        ok: true,
        store,
        key,
        value,
    }))
}

/// PUT /stores/{store}/update - Overwrite an existing scalar.
pub(crate) async fn update_item(
    State(state): State<SharedState>,
    Path(store): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<ValueResponse>, AppError> {
    let value = state.ctx.update(&store, &req.key, req.value).await?;
    Ok(Json(ValueResponse {
        ok: true,
        store,
        key: req.key,
        value,
    }))
}

/// DELETE /stores/{store}/del/{key} - Delete a key of any kind.
pub(crate) async fn delete_item(
    State(state): State<SharedState>,
    Path((store, key)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state.ctx.delete(&store, &key).await?;
    Ok(Json(DeleteResponse {
        ok: deleted,
        deleted,
        store,
        key,
    }))
}

/// GET /stores/{store}/keys - Keys, sorted, with optional prefix filter.
pub(crate) async fn list_keys(
    State(state): State<SharedState>,
    Path(store): Path<String>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<KeysResponse>, AppError> {
    let prefix = query.prefix.as_deref().filter(|p| !p.is_empty());
    let keys = state.ctx.keys(&store, prefix).await?;
    Ok(Json(KeysResponse {
        store,
        count: keys.len(),
        keys,
    }))
}

/// GET /stores/{store}/items - Every live entry with its kind.
pub(crate) async fn list_items(
    State(state): State<SharedState>,
    Path(store): Path<String>,
) -> Result<Json<ItemsResponse>, AppError> {
    let items: Vec<ItemView> = state
        .ctx
        .items(&store)
        .await?
        .into_iter()
        .map(|(key, value)| ItemView { key, value })
        .collect();
    Ok(Json(ItemsResponse {
        store,
        size: items.len(),
        items,
    }))
}

/// POST /command - LPUSH / LPOP / SADD (SPUSH) / SPOP on the default store.
pub(crate) async fn run_command(
    State(state): State<SharedState>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    let ctx = &state.ctx;
    let store = req.store.as_deref().unwrap_or(ctx.default_store());
    let name = req.stack_name;
    let command = req.command.to_uppercase();

    let response = match command.as_str() {
        "LPUSH" => {
            let value = require_value(&command, req.value)?;
            let length = ctx.lpush(store, &name, value).await?;
            CommandResponse {
                ok: true,
                kind: "list",
                name,
                length: Some(length),
                added: None,
                value: None,
            }
        },
        "LPOP" => {
            let value = empty_as_none(ctx.lpop(store, &name).await)?;
            CommandResponse {
                ok: true,
                kind: "list",
                name,
                length: None,
                added: None,
                value: Some(value),
            }
        },
        "SADD" | "SPUSH" => {
            let value = require_value(&command, req.value)?;
            let added = ctx.sadd(store, &name, value).await?;
            CommandResponse {
                ok: true,
                kind: "set",
                name,
                length: None,
                added: Some(added),
                value: None,
            }
        },
        "SPOP" => {
            let value = empty_as_none(ctx.spop(store, &name).await)?;
            CommandResponse {
                ok: true,
                kind: "set",
                name,
                length: None,
                added: None,
                value: Some(value),
            }
        },
        _ => {
            return Err(AppError::BadRequest(format!(
                "Unknown command: {}",
                req.command
            )));
        },
    };
    Ok(Json(response))
}

fn require_value(command: &str, value: Option<String>) -> Result<String, AppError> {
    value.ok_or_else(|| AppError::BadRequest(format!("{command} requires 'value'")))
}

/// Pops on an empty list or set answer `null` rather than 404.
fn empty_as_none(result: crate::error::Result<String>) -> Result<Option<String>, AppError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// GET /search - Cached search over one store.
pub(crate) async fn search(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchOutcome>, AppError> {
    let store = params
        .store
        .unwrap_or_else(|| state.ctx.default_store().to_string());
    let mut query = SearchQuery::new(store, params.q);
    if let Some(prefix) = params.prefix {
        query = query.with_prefix(prefix);
    }
    if let Some(limit) = params.limit {
        query = query.with_limit(limit);
    }
    Ok(Json(state.ctx.search(&query).await?))
}

/// POST /admin/snapshot - Snapshot now, regardless of the mutation counter.
pub(crate) async fn snapshot_now(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<SnapshotInfo>), AppError> {
    let info = state.ctx.snapshot_now().await?;
    Ok((StatusCode::CREATED, Json(info)))
}
