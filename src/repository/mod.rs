//! Entity-agnostic persistence.
//!
//! Every stored type implements [`Entity`], which exposes its id, its audit
//! block and its column values. [`Repository`] is the CRUD + query contract
//! shared by the Postgres backend and the in-memory backend.

pub mod memory;
pub mod postgres;
pub mod query;
pub mod retry;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::FromRow;

use crate::error::{AppError, AppResult};
use crate::models::audit::{Audit, AUDIT_WRITABLE_COLUMNS};

pub use memory::MemoryRepository;
pub use postgres::PgRepository;
pub use query::{Direction, Filter, Page, Paged, Query, Value};

/// Capability set required from anything the repositories store.
pub trait Entity:
    Clone + Send + Sync + Unpin + std::fmt::Debug + 'static + for<'r> FromRow<'r, PgRow>
{
    const TABLE: &'static str;
    /// Human readable name used in error messages.
    const NAME: &'static str;
    /// Entity-owned writable columns, in the order [`Entity::values`] yields them.
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
    fn audit(&self) -> &Audit;
    fn audit_mut(&mut self) -> &mut Audit;

    /// Current value of every column in [`Entity::COLUMNS`].
    fn values(&self) -> Vec<(&'static str, Value)>;

    /// Write one entity-owned column. Unknown columns and type mismatches are
    /// validation failures.
    fn assign(&mut self, column: &str, value: Value) -> AppResult<()>;

    /// Read any column, including `id` and the audit columns.
    fn field(&self, column: &str) -> Option<Value> {
        if column == "id" {
            return Some(Value::from(self.id()));
        }
        self.audit().field(column).or_else(|| {
            self.values()
                .into_iter()
                .find(|(name, _)| *name == column)
                .map(|(_, value)| value)
        })
    }
}

/// Whether `column` may be written through [`Repository::update_fields`].
pub fn is_writable_column<E: Entity>(column: &str) -> bool {
    E::COLUMNS.contains(&column) || AUDIT_WRITABLE_COLUMNS.contains(&column)
}

/// Whether `column` exists at all on `E`'s table.
pub fn is_known_column<E: Entity>(column: &str) -> bool {
    column == "id" || is_writable_column::<E>(column) || Audit::is_column(column)
}

pub(crate) fn check_writable<E: Entity>(fields: &[(&'static str, Value)]) -> AppResult<()> {
    if fields.is_empty() {
        return Err(AppError::validation("no fields to update"));
    }
    match fields.iter().find(|(column, _)| !is_writable_column::<E>(column)) {
        Some((column, _)) => Err(AppError::validation(format!(
            "{} has no writable field '{}'",
            E::NAME,
            column
        ))),
        None => Ok(()),
    }
}

pub(crate) fn check_known<E: Entity>(column: &str) -> AppResult<()> {
    if is_known_column::<E>(column) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "{} has no field '{}'",
            E::NAME,
            column
        )))
    }
}

/// Backend reachability, reported by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub backend: &'static str,
    pub reachable: bool,
}

/// CRUD and query contract over one entity type.
///
/// Reads never return soft-deleted rows unless the query asks for them.
/// Writes against a missing or deleted id fail with `NotFound`; writes
/// carrying a stale version fail with `Conflict`.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    async fn get_by_id(&self, id: i64) -> AppResult<Option<E>>;

    async fn find(&self, query: &Query) -> AppResult<Vec<E>>;

    async fn page(&self, query: &Query, page: Page) -> AppResult<Paged<E>>;

    async fn exists(&self, id: i64) -> AppResult<bool>;

    async fn count(&self, query: &Query) -> AppResult<u64>;

    /// Sum of a numeric column over the rows matching `query`; 0 when none match.
    async fn sum(&self, column: &'static str, query: &Query) -> AppResult<f64>;

    /// Mean of a numeric column over the rows matching `query`.
    async fn average(&self, column: &'static str, query: &Query) -> AppResult<Option<f64>>;

    /// Store a new row. The id is assigned by the store and the version starts at 1.
    async fn create(&self, entity: E) -> AppResult<E>;

    /// Write every entity column plus `updated_at`/`updated_by`, guarded by
    /// `entity.audit().version`.
    async fn update(&self, entity: &E) -> AppResult<E>;

    /// Write only the named columns. `expected_version` of `None` skips the
    /// optimistic check.
    async fn update_fields(
        &self,
        id: i64,
        expected_version: Option<i64>,
        fields: &[(&'static str, Value)],
    ) -> AppResult<E>;

    /// Soft delete.
    async fn delete(&self, id: i64, by: &str) -> AppResult<()>;

    async fn hard_delete(&self, id: i64) -> AppResult<()>;

    async fn status(&self) -> StoreStatus;
}
