use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use super::list_body;
use crate::{error::AppResult, AppState};

// ── GET /api/reports/statistics ──────────────────────────────────────────────

pub async fn statistics(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let stats = state.products.statistics().await?;
    Ok((StatusCode::OK, Json(serde_json::json!({ "data": stats }))))
}

// ── GET /api/reports/categories ──────────────────────────────────────────────

pub async fn categories(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let groups = state.products.category_breakdown().await?;
    Ok((StatusCode::OK, Json(list_body(&groups))))
}

// ── GET /api/reports/suppliers ───────────────────────────────────────────────

pub async fn suppliers(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let groups = state.products.supplier_breakdown().await?;
    Ok((StatusCode::OK, Json(list_body(&groups))))
}

// ── GET /api/reports/export/csv ──────────────────────────────────────────────

pub async fn export_csv(State(state): State<AppState>) -> AppResult<Response> {
    let csv = state.products.export_csv().await?;
    info!(bytes = csv.len(), "Exported inventory CSV");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"inventory.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}
