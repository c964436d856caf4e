use std::time::Instant;

use axum::{extract::State, http::StatusCode};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::extract::{Json, Path, Query};
use super::{list_body, Actor};
use crate::{
    error::AppResult,
    models::{CreateProduct, Product, ProductStatus, ProductView, UpdateProduct},
    repository::Page,
    service::{products::today, sort_column, ListParams, ProductSearch},
    AppState,
};

type Reply = AppResult<(StatusCode, Json<serde_json::Value>)>;

const DEFAULT_PAGE_SIZE: u32 = 50;

fn views(products: Vec<Product>) -> Vec<ProductView> {
    let today = today();
    products.into_iter().map(|p| p.view(today)).collect()
}

fn found(products: Vec<Product>) -> Reply {
    Ok((StatusCode::OK, Json(list_body(&views(products)))))
}

fn one(status: StatusCode, product: Product) -> Reply {
    Ok((status, Json(json!({ "data": product.view(today()) }))))
}

// ── List ──────────────────────────────────────────────────────────────────────

/// Unpaged unless `page` or `page_size` is given.
pub async fn list_products(
    State(state): State<AppState>,
    Query(search): Query<ProductSearch>,
    Query(params): Query<ListParams>,
) -> Reply {
    let start = Instant::now();
    let order = params
        .sort
        .as_deref()
        .map(sort_column)
        .transpose()?
        .map(|column| (column, params.direction));

    let mut body = if params.page.is_some() || params.page_size.is_some() {
        let page = Page::new(
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        );
        let today = today();
        let paged = state
            .products
            .list_page(&search, order, page)
            .await?
            .map(|p| p.view(today));
        json!({
            "data": paged.items,
            "count": paged.items.len(),
            "total": paged.total,
            "page": paged.page,
            "page_size": paged.page_size,
        })
    } else {
        list_body(&views(state.products.list(&search, order).await?))
    };
    let elapsed = start.elapsed();

    info!(
        count = %body["count"],
        elapsed_ms = elapsed.as_millis(),
        "Listed products"
    );
    body["query_time_ms"] = json!(elapsed.as_secs_f64() * 1000.0);

    Ok((StatusCode::OK, Json(body)))
}

// ── Create ────────────────────────────────────────────────────────────────────

pub async fn create_product(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateProduct>,
) -> Reply {
    let product = state.products.create_product(payload, &actor.0).await?;
    one(StatusCode::CREATED, product)
}

// ── Get by ID ─────────────────────────────────────────────────────────────────

pub async fn get_product(State(state): State<AppState>, Path(id): Path<i64>) -> Reply {
    let product = state.products.require(id).await?;
    one(StatusCode::OK, product)
}

// ── Update ────────────────────────────────────────────────────────────────────

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
    Json(payload): Json<UpdateProduct>,
) -> Reply {
    let product = state.products.update_product(id, payload, &actor.0).await?;
    one(StatusCode::OK, product)
}

// ── Delete ────────────────────────────────────────────────────────────────────

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
) -> Reply {
    state.products.delete_product(id, &actor.0).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Product deleted", "id": id })),
    ))
}

// ── Lookups ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TextParams {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct PriceRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct MarginRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SinceParams {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct LowStockParams {
    pub threshold: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AttentionParams {
    pub days: Option<i64>,
}

pub async fn search(State(state): State<AppState>, Query(params): Query<TextParams>) -> Reply {
    found(state.products.text_search(&params.query).await?)
}

pub async fn by_category(State(state): State<AppState>, Path(category): Path<String>) -> Reply {
    found(state.products.find_by_category(&category).await?)
}

pub async fn by_supplier(State(state): State<AppState>, Path(supplier): Path<String>) -> Reply {
    found(state.products.find_by_supplier(&supplier).await?)
}

pub async fn by_brand(State(state): State<AppState>, Path(brand): Path<String>) -> Reply {
    found(state.products.find_by_brand(&brand).await?)
}

pub async fn by_batch(State(state): State<AppState>, Path(batch): Path<String>) -> Reply {
    found(state.products.find_by_batch(&batch).await?)
}

pub async fn by_condition(State(state): State<AppState>, Path(condition): Path<String>) -> Reply {
    found(state.products.find_by_condition(&condition).await?)
}

pub async fn by_status(State(state): State<AppState>, Path(status): Path<String>) -> Reply {
    found(state.products.find_by_status(&status).await?)
}

pub async fn by_city(State(state): State<AppState>, Path(city): Path<String>) -> Reply {
    found(state.products.find_by_city(&city).await?)
}

pub async fn by_invoice(State(state): State<AppState>, Path(invoice): Path<String>) -> Reply {
    found(state.products.find_by_invoice(&invoice).await?)
}

pub async fn price_range(State(state): State<AppState>, Query(range): Query<PriceRange>) -> Reply {
    found(state.products.find_by_price_range(range.min, range.max).await?)
}

pub async fn date_range(State(state): State<AppState>, Query(range): Query<DateRange>) -> Reply {
    found(state.products.find_by_purchase_dates(range.from, range.to).await?)
}

pub async fn margin_range(State(state): State<AppState>, Query(range): Query<MarginRange>) -> Reply {
    found(state.products.find_by_margin_range(range.min, range.max).await?)
}

pub async fn arrived_since(State(state): State<AppState>, Query(params): Query<SinceParams>) -> Reply {
    found(state.products.arrived_since(params.date).await?)
}

pub async fn low_stock(State(state): State<AppState>, Query(params): Query<LowStockParams>) -> Reply {
    found(state.products.low_stock(params.threshold).await?)
}

pub async fn attention(State(state): State<AppState>, Query(params): Query<AttentionParams>) -> Reply {
    found(state.products.attention_list(params.days).await?)
}

// ── Mutators ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StockBody {
    pub stock: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustBody {
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct PriceBody {
    pub selling_price_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct MarginBody {
    pub margin_percentage: f64,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

pub async fn set_stock(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
    Json(body): Json<StockBody>,
) -> Reply {
    let product = state.products.update_stock(id, body.stock, &actor.0).await?;
    one(StatusCode::OK, product)
}

pub async fn adjust_stock(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
    Json(body): Json<AdjustBody>,
) -> Reply {
    let product = state.products.adjust_stock(id, body.delta, &actor.0).await?;
    one(StatusCode::OK, product)
}

pub async fn set_price(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
    Json(body): Json<PriceBody>,
) -> Reply {
    let product = state
        .products
        .update_selling_price(id, body.selling_price_cents, &actor.0)
        .await?;
    one(StatusCode::OK, product)
}

pub async fn set_margin(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
    Json(body): Json<MarginBody>,
) -> Reply {
    let product = state
        .products
        .update_margin_percentage(id, body.margin_percentage, &actor.0)
        .await?;
    one(StatusCode::OK, product)
}

pub async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
    Json(body): Json<StatusBody>,
) -> Reply {
    let status: ProductStatus = body.status.parse()?;
    let product = state.products.change_status(id, status, &actor.0).await?;
    one(StatusCode::OK, product)
}

pub async fn mark_sold(State(state): State<AppState>, Path(id): Path<i64>, actor: Actor) -> Reply {
    one(StatusCode::OK, state.products.mark_as_sold(id, &actor.0).await?)
}

pub async fn mark_reserved(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
) -> Reply {
    one(StatusCode::OK, state.products.mark_as_reserved(id, &actor.0).await?)
}

pub async fn mark_available(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
) -> Reply {
    one(StatusCode::OK, state.products.mark_as_available(id, &actor.0).await?)
}

pub async fn mark_damaged(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
) -> Reply {
    one(StatusCode::OK, state.products.mark_as_damaged(id, &actor.0).await?)
}
