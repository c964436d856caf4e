mod extract;
pub mod products;
pub mod references;
pub mod reports;

use std::convert::Infallible;

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::AppState;

/// Header naming the user behind a write; recorded in the audit columns.
pub const ACTOR_HEADER: &str = "x-user";
const DEFAULT_ACTOR: &str = "system";

/// Who is making the request. Falls back to `system` when the header is
/// absent, blank or not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_ACTOR);
        Ok(Actor(actor.to_string()))
    }
}

/// `{ data, count }` envelope used by every list endpoint.
pub fn list_body<T: Serialize>(items: &[T]) -> serde_json::Value {
    json!({ "data": items, "count": items.len() })
}

// ── Service ───────────────────────────────────────────────────────────────────

pub async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.environment.as_str(),
        "endpoints": {
            "health": "/health",
            "products": "/api/products",
            "reports": "/api/reports",
            "brands": "/api/brands",
            "models": "/api/models",
            "colors": "/api/colors",
            "conditions": "/api/conditions",
            "product_types": "/api/product-types",
        },
    }))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let store = state.products.store_status().await;
    let (code, status) = if store.reachable {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": env!("CARGO_PKG_NAME"),
            "timestamp": Utc::now(),
            "environment": state.environment.as_str(),
            "uptime": state.started_at.elapsed().as_secs(),
            "storage": store,
        })),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::{build_router, config::Config, AppState};

    pub(crate) fn app() -> Router {
        let config = Config::from_lookup(|key| match key {
            "STORAGE" => Some("memory".to_string()),
            "APP_ENV" => Some("test".to_string()),
            _ => None,
        })
        .unwrap();
        build_router(AppState::in_memory(&config))
    }

    pub(crate) async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user", "tester");
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    /// Sends `body` verbatim as `application/json`.
    pub(crate) async fn send_raw(
        app: &Router,
        method: &str,
        uri: &str,
        body: &str,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_reports_memory_store() {
        let app = app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["environment"], "test");
        assert_eq!(body["storage"]["backend"], "memory");
        assert!(body["uptime"].is_u64());
    }

    #[tokio::test]
    async fn root_lists_endpoints() {
        let app = app();
        let (status, body) = send(&app, "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "inventory-service");
        assert_eq!(body["endpoints"]["products"], "/api/products");
    }
}
