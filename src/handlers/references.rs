//! CRUD for the lookup tables. One set of generic handlers, mounted once per
//! kind with its own repository as router state.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use serde_json::json;
use tracing::info;

use super::extract::{Json, Path};
use super::{list_body, Actor};
use crate::{
    error::{AppError, AppResult},
    models::{reference::Reference, reference::ReferenceKind, ReferencePayload},
    repository::{Direction, Query, Repository},
};

type Repo<K> = Arc<dyn Repository<Reference<K>>>;
type Reply = AppResult<(StatusCode, Json<serde_json::Value>)>;

pub fn routes<K: ReferenceKind, S>(repo: Repo<K>) -> Router<S> {
    Router::new()
        .route("/", get(list::<K>).post(create::<K>))
        .route("/:id", get(fetch::<K>).put(update::<K>).delete(remove::<K>))
        .with_state(repo)
}

async fn list<K: ReferenceKind>(State(repo): State<Repo<K>>) -> Reply {
    let items = repo.find(&Query::new().order_by("name", Direction::Asc)).await?;
    Ok((StatusCode::OK, Json(list_body(&items))))
}

async fn fetch<K: ReferenceKind>(State(repo): State<Repo<K>>, Path(id): Path<i64>) -> Reply {
    let item = repo
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found(K::NAME, id))?;
    Ok((StatusCode::OK, Json(json!({ "data": item }))))
}

async fn create<K: ReferenceKind>(
    State(repo): State<Repo<K>>,
    actor: Actor,
    Json(payload): Json<ReferencePayload>,
) -> Reply {
    let name = payload.validated_name()?;
    let item = repo
        .create(Reference::draft(name, payload.description, &actor.0))
        .await?;
    info!(id = item.id, kind = K::NAME, actor = %actor.0, "Created reference entry");
    Ok((StatusCode::CREATED, Json(json!({ "data": item }))))
}

async fn update<K: ReferenceKind>(
    State(repo): State<Repo<K>>,
    Path(id): Path<i64>,
    actor: Actor,
    Json(payload): Json<ReferencePayload>,
) -> Reply {
    let name = payload.validated_name()?;
    let mut item = repo
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found(K::NAME, id))?;
    if let Some(expected) = payload.version {
        item.audit.version = expected;
    }
    item.name = name;
    item.description = payload.description;
    item.audit.touch(&actor.0);

    let item = repo.update(&item).await?;
    info!(id, kind = K::NAME, actor = %actor.0, "Updated reference entry");
    Ok((StatusCode::OK, Json(json!({ "data": item }))))
}

async fn remove<K: ReferenceKind>(
    State(repo): State<Repo<K>>,
    Path(id): Path<i64>,
    actor: Actor,
) -> Reply {
    repo.delete(id, &actor.0).await?;
    info!(id, kind = K::NAME, actor = %actor.0, "Deleted reference entry");
    Ok((
        StatusCode::OK,
        Json(json!({ "message": format!("{} deleted", K::NAME), "id": id })),
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::handlers::tests::{app, send, send_raw};

    #[tokio::test]
    async fn brands_crud() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/brands",
            Some(json!({ "name": "Samsung", "description": "Korea" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["data"]["id"].as_i64().unwrap();
        assert_eq!(body["data"]["created_by"], "tester");

        send(&app, "POST", "/api/brands", Some(json!({ "name": "Apple" }))).await;
        let (_, body) = send(&app, "GET", "/api/brands", None).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["data"][0]["name"], "Apple");

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/brands/{id}"),
            Some(json!({ "name": "Samsung Electronics", "version": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Samsung Electronics");
        assert_eq!(body["data"]["version"], 2);

        let (status, _) = send(
            &app,
            "PUT",
            &format!("/api/brands/{id}"),
            Some(json!({ "name": "Stale", "version": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(&app, "DELETE", &format!("/api/brands/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, "GET", &format!("/api/brands/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], format!("Brand {id} not found"));
    }

    #[tokio::test]
    async fn kinds_are_isolated() {
        let app = app();
        send(&app, "POST", "/api/colors", Some(json!({ "name": "Midnight" }))).await;

        let (_, colors) = send(&app, "GET", "/api/colors", None).await;
        let (_, types) = send(&app, "GET", "/api/product-types", None).await;
        assert_eq!(colors["count"], 1);
        assert_eq!(types["count"], 0);

        let (status, _) = send(&app, "POST", "/api/conditions", Some(json!({ "name": " " }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = send_raw(&app, "POST", "/api/models", "[not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }
}
