use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    http::HeaderValue,
    routing::{get, patch},
    Router,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

mod config;
mod error;
mod handlers;
mod models;
mod repository;
mod service;

use crate::config::{Config, StorageKind};
use crate::handlers::{products, references, reports};
use crate::models::{Brand, Color, Condition, Model, ProductType};
use crate::repository::{retry::RetryConfig, Entity, MemoryRepository, PgRepository, Repository};
use crate::service::{ProductService, ServiceSettings};

/// Shared application state. Cheap to clone, everything sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub products: Arc<ProductService>,
    pub brands: Arc<dyn Repository<Brand>>,
    pub models: Arc<dyn Repository<Model>>,
    pub colors: Arc<dyn Repository<Color>>,
    pub conditions: Arc<dyn Repository<Condition>>,
    pub product_types: Arc<dyn Repository<ProductType>>,
    pub environment: String,
    pub started_at: Instant,
}

/// Backend every repository is opened on.
enum Store {
    Memory,
    Postgres(PgPool, RetryConfig),
}

impl Store {
    fn open<E: Entity>(&self) -> Arc<dyn Repository<E>> {
        match self {
            Store::Memory => Arc::new(MemoryRepository::<E>::new()),
            Store::Postgres(pool, retry) => Arc::new(PgRepository::<E>::new(pool.clone(), *retry)),
        }
    }
}

impl AppState {
    fn new(config: &Config, store: Store) -> Self {
        Self {
            products: Arc::new(ProductService::new(
                store.open(),
                ServiceSettings::from(config),
            )),
            brands: store.open(),
            models: store.open(),
            colors: store.open(),
            conditions: store.open(),
            product_types: store.open(),
            environment: config.environment.clone(),
            started_at: Instant::now(),
        }
    }

    pub fn in_memory(config: &Config) -> Self {
        Self::new(config, Store::Memory)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (ignored in production where env vars are injected)
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,inventory_service=debug")),
        )
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env()?;
    info!(
        storage = ?config.storage,
        environment = %config.environment,
        "Starting inventory service"
    );

    let state = match config.storage {
        StorageKind::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            AppState::in_memory(&config)
        }
        StorageKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set when STORAGE=postgres")?;

            info!("Connecting to PostgreSQL...");
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(url)
                .await?;
            info!("Database connection pool established.");

            info!("Running migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Migrations complete.");

            AppState::new(&config, Store::Postgres(pool, config.retry))
        }
    };

    let app = build_router(state)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(cors_layer(&config.cors_allowed_origins)?);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Permissive when no origins are configured.
fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    if origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin '{}'", o)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

fn build_router(state: AppState) -> Router {
    Router::new()
        // ── Service ─────────────────────────────────────────────────────────
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))

        // ── Products CRUD ───────────────────────────────────────────────────
        .route(
            "/api/products",
            get(products::list_products).post(products::create_product),
        )
        .route(
            "/api/products/:id",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )

        // ── Product lookups ─────────────────────────────────────────────────
        .route("/api/products/search", get(products::search))
        .route("/api/products/category/:category", get(products::by_category))
        .route("/api/products/supplier/:supplier", get(products::by_supplier))
        .route("/api/products/brand/:brand", get(products::by_brand))
        .route("/api/products/batch/:batch", get(products::by_batch))
        .route("/api/products/condition/:condition", get(products::by_condition))
        .route("/api/products/status/:status", get(products::by_status))
        .route("/api/products/city/:city", get(products::by_city))
        .route("/api/products/invoice/:invoice", get(products::by_invoice))
        .route("/api/products/price-range", get(products::price_range))
        .route("/api/products/date-range", get(products::date_range))
        .route("/api/products/margin-range", get(products::margin_range))
        .route("/api/products/arrived-since", get(products::arrived_since))
        .route("/api/products/low-stock", get(products::low_stock))
        .route("/api/products/attention", get(products::attention))

        // ── Product mutators ────────────────────────────────────────────────
        .route("/api/products/:id/stock", patch(products::set_stock))
        .route("/api/products/:id/stock/adjust", patch(products::adjust_stock))
        .route("/api/products/:id/price", patch(products::set_price))
        .route("/api/products/:id/margin", patch(products::set_margin))
        .route("/api/products/:id/status", patch(products::set_status))
        .route("/api/products/:id/sold", patch(products::mark_sold))
        .route("/api/products/:id/reserved", patch(products::mark_reserved))
        .route("/api/products/:id/available", patch(products::mark_available))
        .route("/api/products/:id/damaged", patch(products::mark_damaged))

        // ── Reports ─────────────────────────────────────────────────────────
        .route("/api/reports/statistics", get(reports::statistics))
        .route("/api/reports/categories", get(reports::categories))
        .route("/api/reports/suppliers", get(reports::suppliers))
        .route("/api/reports/export/csv", get(reports::export_csv))

        // ── Reference data ──────────────────────────────────────────────────
        .nest("/api/brands", references::routes(state.brands.clone()))
        .nest("/api/models", references::routes(state.models.clone()))
        .nest("/api/colors", references::routes(state.colors.clone()))
        .nest("/api/conditions", references::routes(state.conditions.clone()))
        .nest("/api/product-types", references::routes(state.product_types.clone()))

        // ── Middleware ──────────────────────────────────────────────────────
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
