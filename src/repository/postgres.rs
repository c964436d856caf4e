//! PostgreSQL repository backend.
//!
//! SQL is composed with `sqlx::QueryBuilder`. Column names only ever come
//! from `Entity::COLUMNS` or from code, never from request input; values are
//! always bound. Reads retry any transient error; writes retry only failures
//! that guarantee the statement was not applied.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::retry::{with_retry, with_write_retry, RetryConfig};
use super::{
    check_known, check_writable, Entity, Filter, Page, Paged, Query, Repository, StoreStatus,
    Value,
};
use crate::error::{AppError, AppResult};
use crate::models::audit::AUDIT_WRITABLE_COLUMNS;

pub struct PgRepository<E> {
    pool: PgPool,
    retry: RetryConfig,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for PgRepository<E> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            retry: self.retry,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> PgRepository<E> {
    pub fn new(pool: PgPool, retry: RetryConfig) -> Self {
        Self {
            pool,
            retry,
            _entity: PhantomData,
        }
    }

    fn op(name: &str) -> String {
        format!("{}.{}", E::TABLE, name)
    }

    /// After an UPDATE matched nothing: was the row missing or was the version stale?
    async fn missing_or_conflict(&self, id: i64, expected_version: Option<i64>) -> AppError {
        match self.exists(id).await {
            Ok(true) => AppError::Conflict(format!(
                "{} {} was modified concurrently (expected version {})",
                E::NAME,
                id,
                expected_version.map_or_else(|| "any".to_string(), |v| v.to_string())
            )),
            Ok(false) => AppError::not_found(E::NAME, id),
            Err(e) => e,
        }
    }
}

// ── SQL composition ───────────────────────────────────────────────────────────

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: Value) {
    match value {
        Value::Int(v) => qb.push_bind(v),
        Value::Float(v) => qb.push_bind(v),
        Value::Text(v) => qb.push_bind(v),
        Value::Date(v) => qb.push_bind(v),
        Value::Timestamp(v) => qb.push_bind(v),
    };
}

/// `LIKE` pattern matching `needle` literally anywhere in the text.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::Eq(column, value) if value.is_null() => {
            qb.push(*column).push(" IS NULL");
        }
        Filter::Eq(column, value) => {
            qb.push(*column).push(" = ");
            push_value(qb, value.clone());
        }
        Filter::EqIgnoreCase(column, text) => {
            qb.push("LOWER(")
                .push(*column)
                .push(") = LOWER(")
                .push_bind(text.clone())
                .push(")");
        }
        Filter::Contains(columns, needle) => {
            qb.push("(");
            for (i, column) in columns.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push(*column)
                    .push(" ILIKE ")
                    .push_bind(like_pattern(needle));
            }
            qb.push(")");
        }
        Filter::Gte(column, value) => {
            qb.push(*column).push(" >= ");
            push_value(qb, value.clone());
        }
        Filter::Lte(column, value) => {
            qb.push(*column).push(" <= ");
            push_value(qb, value.clone());
        }
        Filter::LeColumn(left, right) => {
            qb.push(*left).push(" <= ").push(*right);
        }
    }
}

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, query: &Query) {
    qb.push(" WHERE TRUE");
    if !query.includes_deleted() {
        qb.push(" AND deleted_at IS NULL");
    }
    for filter in query.filters() {
        qb.push(" AND ");
        push_filter(qb, filter);
    }
}

fn push_order(qb: &mut QueryBuilder<'_, Postgres>, query: &Query) {
    match query.order() {
        Some((column, direction)) if column != "id" => {
            qb.push(" ORDER BY ")
                .push(column)
                .push(" ")
                .push(direction.as_sql())
                .push(" NULLS LAST, id ASC");
        }
        Some((_, direction)) => {
            qb.push(" ORDER BY id ").push(direction.as_sql());
        }
        None => {
            qb.push(" ORDER BY id ASC");
        }
    }
}

fn select_sql<'a>(table: &str, query: &Query, page: Option<Page>) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT * FROM {}", table));
    push_where(&mut qb, query);
    push_order(&mut qb, query);
    if let Some(page) = page {
        qb.push(" LIMIT ")
            .push_bind(page.size as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);
    }
    qb
}

fn aggregate_sql<'a>(expr: &str, table: &str, query: &Query) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM {}", expr, table));
    push_where(&mut qb, query);
    qb
}

fn insert_sql<'a, E: Entity>(entity: &E) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("INSERT INTO {} (", E::TABLE));
    let values = entity.values();
    for (column, _) in &values {
        qb.push(*column).push(", ");
    }
    qb.push("created_at, created_by, updated_at, updated_by, version) VALUES (");
    for (_, value) in values {
        push_value(&mut qb, value);
        qb.push(", ");
    }
    let audit = entity.audit();
    qb.push_bind(audit.created_at)
        .push(", ")
        .push_bind(audit.created_by.clone())
        .push(", ")
        .push_bind(audit.updated_at)
        .push(", ")
        .push_bind(audit.updated_by.clone())
        .push(", 1) RETURNING *");
    qb
}

fn update_sql<'a, E: Entity>(
    id: i64,
    expected_version: Option<i64>,
    fields: Vec<(&'static str, Value)>,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", E::TABLE));
    for (column, value) in fields {
        qb.push(column).push(" = ");
        push_value(&mut qb, value);
        qb.push(", ");
    }
    qb.push("version = version + 1 WHERE id = ")
        .push_bind(id)
        .push(" AND deleted_at IS NULL");
    if let Some(version) = expected_version {
        qb.push(" AND version = ").push_bind(version);
    }
    qb.push(" RETURNING *");
    qb
}

// ── Repository impl ───────────────────────────────────────────────────────────

#[async_trait]
impl<E: Entity> Repository<E> for PgRepository<E> {
    async fn get_by_id(&self, id: i64) -> AppResult<Option<E>> {
        let query = Query::new().eq("id", id);
        let row = with_retry(&self.retry, &Self::op("get_by_id"), || async {
            select_sql(E::TABLE, &query, None)
                .build_query_as::<E>()
                .fetch_optional(&self.pool)
                .await
        })
        .await?;
        Ok(row)
    }

    async fn find(&self, query: &Query) -> AppResult<Vec<E>> {
        query.columns().into_iter().try_for_each(check_known::<E>)?;
        let rows = with_retry(&self.retry, &Self::op("find"), || async {
            select_sql(E::TABLE, query, None)
                .build_query_as::<E>()
                .fetch_all(&self.pool)
                .await
        })
        .await?;
        Ok(rows)
    }

    async fn page(&self, query: &Query, page: Page) -> AppResult<Paged<E>> {
        query.columns().into_iter().try_for_each(check_known::<E>)?;
        let total = self.count(query).await?;
        let items = with_retry(&self.retry, &Self::op("page"), || async {
            select_sql(E::TABLE, query, Some(page))
                .build_query_as::<E>()
                .fetch_all(&self.pool)
                .await
        })
        .await?;
        Ok(Paged {
            items,
            total,
            page: page.number,
            page_size: page.size,
        })
    }

    async fn exists(&self, id: i64) -> AppResult<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1 AND deleted_at IS NULL)",
            E::TABLE
        );
        let found = with_retry(&self.retry, &Self::op("exists"), || {
            sqlx::query_scalar::<_, bool>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
        })
        .await?;
        Ok(found)
    }

    async fn count(&self, query: &Query) -> AppResult<u64> {
        query.columns().into_iter().try_for_each(check_known::<E>)?;
        let n = with_retry(&self.retry, &Self::op("count"), || async {
            aggregate_sql("COUNT(*)", E::TABLE, query)
                .build_query_scalar::<i64>()
                .fetch_one(&self.pool)
                .await
        })
        .await?;
        Ok(n.max(0) as u64)
    }

    async fn sum(&self, column: &'static str, query: &Query) -> AppResult<f64> {
        check_known::<E>(column)?;
        query.columns().into_iter().try_for_each(check_known::<E>)?;
        let expr = format!("COALESCE(SUM({}), 0)::DOUBLE PRECISION", column);
        let total = with_retry(&self.retry, &Self::op("sum"), || async {
            aggregate_sql(&expr, E::TABLE, query)
                .build_query_scalar::<f64>()
                .fetch_one(&self.pool)
                .await
        })
        .await?;
        Ok(total)
    }

    async fn average(&self, column: &'static str, query: &Query) -> AppResult<Option<f64>> {
        check_known::<E>(column)?;
        query.columns().into_iter().try_for_each(check_known::<E>)?;
        let expr = format!("AVG({})::DOUBLE PRECISION", column);
        let mean = with_retry(&self.retry, &Self::op("average"), || async {
            aggregate_sql(&expr, E::TABLE, query)
                .build_query_scalar::<Option<f64>>()
                .fetch_one(&self.pool)
                .await
        })
        .await?;
        Ok(mean)
    }

    async fn create(&self, entity: E) -> AppResult<E> {
        let created = with_write_retry(&self.retry, &Self::op("create"), || async {
            insert_sql(&entity)
                .build_query_as::<E>()
                .fetch_one(&self.pool)
                .await
        })
        .await?;
        Ok(created)
    }

    async fn update(&self, entity: &E) -> AppResult<E> {
        let id = entity.id();
        let version = entity.audit().version;
        let mut fields = entity.values();
        fields.push(("updated_at", Value::from(entity.audit().updated_at)));
        fields.push(("updated_by", Value::from(entity.audit().updated_by.clone())));

        let updated = with_write_retry(&self.retry, &Self::op("update"), || async {
            update_sql::<E>(id, Some(version), fields.clone())
                .build_query_as::<E>()
                .fetch_optional(&self.pool)
                .await
        })
        .await?;

        match updated {
            Some(row) => Ok(row),
            None => Err(self.missing_or_conflict(id, Some(version)).await),
        }
    }

    async fn update_fields(
        &self,
        id: i64,
        expected_version: Option<i64>,
        fields: &[(&'static str, Value)],
    ) -> AppResult<E> {
        check_writable::<E>(fields)?;
        let mut fields = fields.to_vec();
        if !fields.iter().any(|(c, _)| AUDIT_WRITABLE_COLUMNS.contains(c)) {
            fields.push(("updated_at", Value::from(Utc::now())));
        }

        let updated = with_write_retry(&self.retry, &Self::op("update_fields"), || async {
            update_sql::<E>(id, expected_version, fields.clone())
                .build_query_as::<E>()
                .fetch_optional(&self.pool)
                .await
        })
        .await?;

        match updated {
            Some(row) => Ok(row),
            None => Err(self.missing_or_conflict(id, expected_version).await),
        }
    }

    async fn delete(&self, id: i64, by: &str) -> AppResult<()> {
        let sql = format!(
            "UPDATE {} SET deleted_at = $1, deleted_by = $2, version = version + 1 \
             WHERE id = $3 AND deleted_at IS NULL",
            E::TABLE
        );
        let now = Utc::now();
        let result = with_write_retry(&self.retry, &Self::op("delete"), || {
            sqlx::query(&sql)
                .bind(now)
                .bind(by)
                .bind(id)
                .execute(&self.pool)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(E::NAME, id));
        }
        Ok(())
    }

    async fn hard_delete(&self, id: i64) -> AppResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", E::TABLE);
        let result = with_write_retry(&self.retry, &Self::op("hard_delete"), || {
            sqlx::query(&sql).bind(id).execute(&self.pool)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(E::NAME, id));
        }
        Ok(())
    }

    async fn status(&self) -> StoreStatus {
        let reachable = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok();
        StoreStatus {
            backend: "postgres",
            reachable,
        }
    }
}
