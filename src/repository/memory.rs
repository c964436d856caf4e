//! Process-local repository backend.
//!
//! Every write is a compare-and-set under the write lock, which gives the
//! same optimistic-concurrency behavior as the versioned SQL updates.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    check_known, check_writable, Direction, Entity, Page, Paged, Query, Repository, StoreStatus,
    Value,
};
use crate::error::{AppError, AppResult};
use crate::models::audit::Lifecycle;

#[derive(Debug)]
struct Table<E> {
    rows: BTreeMap<i64, E>,
    next_id: i64,
}

#[derive(Debug)]
pub struct MemoryRepository<E> {
    table: RwLock<Table<E>>,
}

impl<E> Default for MemoryRepository<E> {
    fn default() -> Self {
        Self {
            table: RwLock::new(Table {
                rows: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl<E: Entity> MemoryRepository<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_query(query: &Query) -> AppResult<()> {
        query.columns().into_iter().try_for_each(check_known::<E>)
    }

    fn select(table: &Table<E>, query: &Query) -> Vec<E> {
        let mut rows: Vec<E> = table
            .rows
            .values()
            .filter(|row| query.matches(*row))
            .cloned()
            .collect();

        if let Some((column, direction)) = query.order() {
            rows.sort_by(|a, b| {
                compare_nullable(a.field(column), b.field(column), direction)
                    .then_with(|| a.id().cmp(&b.id()))
            });
        }
        rows
    }

    /// Live row for a write, or the reason the write cannot proceed.
    fn writable_row<'a>(
        table: &'a mut Table<E>,
        id: i64,
        expected_version: Option<i64>,
    ) -> AppResult<&'a mut E> {
        let row = table
            .rows
            .get_mut(&id)
            .filter(|row| row.audit().lifecycle.is_active())
            .ok_or_else(|| AppError::not_found(E::NAME, id))?;

        if let Some(expected) = expected_version {
            if row.audit().version != expected {
                return Err(AppError::Conflict(format!(
                    "{} {} was modified concurrently (expected version {}, found {})",
                    E::NAME,
                    id,
                    expected,
                    row.audit().version
                )));
            }
        }
        Ok(row)
    }
}

/// Nulls sort last in either direction.
fn compare_nullable(a: Option<Value>, b: Option<Value>, direction: Direction) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = a.compare(&b).unwrap_or(Ordering::Equal);
            match direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        }
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for MemoryRepository<E> {
    async fn get_by_id(&self, id: i64) -> AppResult<Option<E>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .get(&id)
            .filter(|row| row.audit().lifecycle.is_active())
            .cloned())
    }

    async fn find(&self, query: &Query) -> AppResult<Vec<E>> {
        Self::check_query(query)?;
        let table = self.table.read().await;
        Ok(Self::select(&table, query))
    }

    async fn page(&self, query: &Query, page: Page) -> AppResult<Paged<E>> {
        Self::check_query(query)?;
        let table = self.table.read().await;
        let rows = Self::select(&table, query);
        let total = rows.len() as u64;
        let items = rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect();
        Ok(Paged {
            items,
            total,
            page: page.number,
            page_size: page.size,
        })
    }

    async fn exists(&self, id: i64) -> AppResult<bool> {
        Ok(self.get_by_id(id).await?.is_some())
    }

    async fn count(&self, query: &Query) -> AppResult<u64> {
        Self::check_query(query)?;
        let table = self.table.read().await;
        Ok(table.rows.values().filter(|row| query.matches(*row)).count() as u64)
    }

    async fn sum(&self, column: &'static str, query: &Query) -> AppResult<f64> {
        check_known::<E>(column)?;
        Ok(self
            .find(query)
            .await?
            .iter()
            .filter_map(|row| row.field(column).and_then(|v| v.as_f64()))
            .sum())
    }

    async fn average(&self, column: &'static str, query: &Query) -> AppResult<Option<f64>> {
        check_known::<E>(column)?;
        let values: Vec<f64> = self
            .find(query)
            .await?
            .iter()
            .filter_map(|row| row.field(column).and_then(|v| v.as_f64()))
            .collect();
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }

    async fn create(&self, mut entity: E) -> AppResult<E> {
        let mut table = self.table.write().await;
        let id = table.next_id;
        table.next_id += 1;

        entity.set_id(id);
        entity.audit_mut().version = 1;
        entity.audit_mut().lifecycle = Lifecycle::Active;
        table.rows.insert(id, entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: &E) -> AppResult<E> {
        let mut table = self.table.write().await;
        let row = Self::writable_row(&mut table, entity.id(), Some(entity.audit().version))?;

        let mut next = entity.clone();
        {
            let stored = row.audit();
            let audit = next.audit_mut();
            audit.created_at = stored.created_at;
            audit.created_by = stored.created_by.clone();
            audit.lifecycle = stored.lifecycle.clone();
            audit.version = stored.version + 1;
        }
        *row = next.clone();
        Ok(next)
    }

    async fn update_fields(
        &self,
        id: i64,
        expected_version: Option<i64>,
        fields: &[(&'static str, Value)],
    ) -> AppResult<E> {
        check_writable::<E>(fields)?;
        let mut table = self.table.write().await;
        let row = Self::writable_row(&mut table, id, expected_version)?;

        // Apply to a copy so a bad value leaves the stored row untouched.
        let mut next = row.clone();
        for (column, value) in fields {
            if !next.audit_mut().assign(column, value.clone())? {
                next.assign(column, value.clone())?;
            }
        }
        next.audit_mut().version += 1;
        *row = next.clone();
        Ok(next)
    }

    async fn delete(&self, id: i64, by: &str) -> AppResult<()> {
        let mut table = self.table.write().await;
        let row = Self::writable_row(&mut table, id, None)?;
        let audit = row.audit_mut();
        audit.lifecycle = Lifecycle::Deleted {
            at: Utc::now(),
            by: by.to_string(),
        };
        audit.version += 1;
        Ok(())
    }

    async fn hard_delete(&self, id: i64) -> AppResult<()> {
        let mut table = self.table.write().await;
        table
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(E::NAME, id))
    }

    async fn status(&self) -> StoreStatus {
        StoreStatus {
            backend: "memory",
            reachable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reference::Brand;

    fn brand(name: &str) -> Brand {
        Brand::draft(name.to_string(), None, "tester")
    }

    async fn seeded() -> MemoryRepository<Brand> {
        let repo = MemoryRepository::new();
        for name in ["Apple", "Samsung", "Xiaomi", "apple refurb"] {
            repo.create(brand(name)).await.unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids_and_version_one() {
        let repo = MemoryRepository::new();
        let a = repo.create(brand("Apple")).await.unwrap();
        let b = repo.create(brand("Samsung")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(a.audit.version, 1);
    }

    #[tokio::test]
    async fn missing_id_reads_as_absent() {
        let repo: MemoryRepository<Brand> = MemoryRepository::new();
        assert!(repo.get_by_id(99).await.unwrap().is_none());
        assert!(!repo.exists(99).await.unwrap());
    }

    #[tokio::test]
    async fn soft_delete_hides_row_but_keeps_it() {
        let repo = seeded().await;
        repo.delete(2, "auditor").await.unwrap();

        assert!(repo.get_by_id(2).await.unwrap().is_none());
        assert_eq!(repo.find(&Query::new()).await.unwrap().len(), 3);

        let all = repo.find(&Query::new().include_deleted().eq("id", 2_i64)).await.unwrap();
        assert_eq!(all.len(), 1);
        match &all[0].audit.lifecycle {
            Lifecycle::Deleted { by, .. } => assert_eq!(by, "auditor"),
            Lifecycle::Active => panic!("row should be deleted"),
        }
    }

    #[tokio::test]
    async fn writes_to_deleted_rows_are_not_found() {
        let repo = seeded().await;
        repo.delete(1, "auditor").await.unwrap();
        assert!(matches!(repo.delete(1, "auditor").await, Err(AppError::NotFound(_))));
        let err = repo
            .update_fields(1, None, &[("name", Value::from("Apple Inc."))])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_fields_touches_only_named_columns() {
        let repo = seeded().await;
        let before = repo.get_by_id(1).await.unwrap().unwrap();
        let after = repo
            .update_fields(1, Some(1), &[("description", Value::from("Cupertino"))])
            .await
            .unwrap();
        assert_eq!(after.name, before.name);
        assert_eq!(after.description.as_deref(), Some("Cupertino"));
        assert_eq!(after.audit.version, 2);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let repo = seeded().await;
        let mut stale = repo.get_by_id(1).await.unwrap().unwrap();
        repo.update_fields(1, Some(1), &[("name", Value::from("Apple Inc."))])
            .await
            .unwrap();

        stale.name = "Apple Computer".to_string();
        assert!(matches!(repo.update(&stale).await, Err(AppError::Conflict(_))));
        assert_eq!(repo.get_by_id(1).await.unwrap().unwrap().name, "Apple Inc.");
    }

    #[tokio::test]
    async fn unknown_column_is_rejected() {
        let repo = seeded().await;
        let err = repo
            .update_fields(1, None, &[("colour", Value::from("red"))])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn filters_and_ordering_compose() {
        let repo = seeded().await;
        let rows = repo
            .find(
                &Query::new()
                    .contains(&["name"], "APPLE")
                    .order_by("name", Direction::Desc),
            )
            .await
            .unwrap();
        let names: Vec<&str> = rows.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["apple refurb", "Apple"]);

        let exact = repo
            .find(&Query::new().eq_ignore_case("name", "samsung"))
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
    }

    #[tokio::test]
    async fn paging_reports_total() {
        let repo = seeded().await;
        let page = repo.page(&Query::new(), Page::new(2, 3)).await.unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "apple refurb");
    }

    #[tokio::test]
    async fn aggregates_respect_the_predicate() {
        let repo = seeded().await;
        let q = Query::new().gte("id", 2_i64);
        assert_eq!(repo.sum("id", &q).await.unwrap(), 9.0);
        assert_eq!(repo.average("id", &q).await.unwrap(), Some(3.0));
        assert_eq!(repo.count(&q).await.unwrap(), 3);
        assert_eq!(
            repo.average("id", &Query::new().gte("id", 100_i64)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn hard_delete_removes_the_row() {
        let repo = seeded().await;
        repo.hard_delete(3).await.unwrap();
        assert!(repo
            .find(&Query::new().include_deleted().eq("id", 3_i64))
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(repo.hard_delete(3).await, Err(AppError::NotFound(_))));
    }
}
