//! Table Routes
//!
//! Row access in the `/rest/v1/:table` convention:
//!
//! - GET /rest/v1/:table?col=eq.value&order=col.asc&limit=n
//! - POST /rest/v1/:table (one object or an array)
//! - PATCH /rest/v1/:table?col=eq.value (merge body into matching rows)
//! - DELETE /rest/v1/:table?col=eq.value
//!
//! PATCH and DELETE without a filter are rejected.

use axum::{
    extract::{Path, Query as Params, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::model::{Filter, Query, Table};
use crate::store::Backend;

type QueryPairs = Vec<(String, String)>;

fn parse_table(name: &str) -> ApiResult<Table> {
    name.parse::<Table>()
        .map_err(|_| ApiError::NotFound(format!("table '{}'", name)))
}

fn parse_query(params: &QueryPairs) -> ApiResult<Query> {
    Query::from_params(
        params
            .iter()
            .filter(|(k, _)| k != "apikey")
            .map(|(k, v)| (k.as_str(), v.as_str())),
    )
    .map_err(ApiError::Validation)
}

fn parse_filters(params: &QueryPairs) -> ApiResult<Vec<Filter>> {
    Ok(parse_query(params)?.filters)
}

/// GET /rest/v1/:table
pub async fn select_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Params(params): Params<QueryPairs>,
) -> ApiResult<Json<Vec<Value>>> {
    let table = parse_table(&table)?;
    let query = parse_query(&params)?;
    let rows = state.store.select(table, &query).await?;
    Ok(Json(rows))
}

/// POST /rest/v1/:table
pub async fn insert_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Vec<Value>>)> {
    let table = parse_table(&table)?;
    let rows = match body {
        Value::Array(rows) => rows,
        row @ Value::Object(_) => vec![row],
        _ => {
            return Err(ApiError::Validation(
                "body must be an object or an array of objects".to_string(),
            ))
        }
    };

    let inserted = state.store.insert(table, rows).await?;
    tracing::info!(table = %table, count = inserted.len(), "Rows inserted");
    Ok((StatusCode::CREATED, Json(inserted)))
}

/// PATCH /rest/v1/:table
pub async fn update_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Params(params): Params<QueryPairs>,
    Json(patch): Json<Value>,
) -> ApiResult<Json<Vec<Value>>> {
    let table = parse_table(&table)?;
    let filters = parse_filters(&params)?;
    let updated = state.store.update(table, &filters, patch).await?;
    tracing::info!(table = %table, count = updated.len(), "Rows updated");
    Ok(Json(updated))
}

/// DELETE /rest/v1/:table
pub async fn delete_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Params(params): Params<QueryPairs>,
) -> ApiResult<Json<Vec<Value>>> {
    let table = parse_table(&table)?;
    let filters = parse_filters(&params)?;
    let deleted = state.store.delete(table, &filters).await?;
    tracing::info!(table = %table, count = deleted.len(), "Rows deleted");
    Ok(Json(deleted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table() {
        assert_eq!(parse_table("patient_queue").unwrap(), Table::PatientQueue);
        assert!(matches!(parse_table("wards"), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_apikey_param_is_not_a_filter() {
        let params = vec![
            ("apikey".to_string(), "k".to_string()),
            ("status".to_string(), "eq.available".to_string()),
        ];
        let filters = parse_filters(&params).unwrap();
        assert_eq!(filters.len(), 1);
    }
}
