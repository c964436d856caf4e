use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info};

use super::reports::{self, GroupSummary, InventoryStatistics};
use super::search::ProductSearch;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::product::PRICING_COLUMNS;
use crate::models::{Audit, CreateProduct, Pricing, Product, ProductStatus, UpdateProduct};
use crate::repository::{Direction, Entity, Page, Paged, Query, Repository, StoreStatus};

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub default_min_stock_level: i64,
    pub attention_days: i64,
    /// Re-reads allowed after a version conflict before giving up.
    pub conflict_retries: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            default_min_stock_level: 5,
            attention_days: 30,
            conflict_retries: 5,
        }
    }
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_min_stock_level: config.default_min_stock_level,
            attention_days: config.attention_days,
            conflict_retries: config.conflict_retries,
        }
    }
}

/// Inventory business rules on top of a [`Repository<Product>`].
pub struct ProductService {
    repo: Arc<dyn Repository<Product>>,
    settings: ServiceSettings,
}

impl ProductService {
    pub fn new(repo: Arc<dyn Repository<Product>>, settings: ServiceSettings) -> Self {
        Self { repo, settings }
    }

    pub async fn store_status(&self) -> StoreStatus {
        self.repo.status().await
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    pub async fn get_product(&self, id: i64) -> AppResult<Option<Product>> {
        self.repo.get_by_id(id).await
    }

    pub async fn require(&self, id: i64) -> AppResult<Product> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(Product::NAME, id))
    }

    pub async fn search(&self, search: &ProductSearch) -> AppResult<Vec<Product>> {
        self.repo.find(&search.to_query()?).await
    }

    pub async fn list(
        &self,
        search: &ProductSearch,
        order: Option<(&'static str, Direction)>,
    ) -> AppResult<Vec<Product>> {
        let mut query = search.to_query()?;
        if let Some((column, direction)) = order {
            query = query.order_by(column, direction);
        }
        self.repo.find(&query).await
    }

    pub async fn list_page(
        &self,
        search: &ProductSearch,
        order: Option<(&'static str, Direction)>,
        page: Page,
    ) -> AppResult<Paged<Product>> {
        let mut query = search.to_query()?;
        if let Some((column, direction)) = order {
            query = query.order_by(column, direction);
        }
        self.repo.page(&query, page).await
    }

    async fn find_by(&self, search: ProductSearch) -> AppResult<Vec<Product>> {
        self.search(&search).await
    }

    pub async fn find_by_category(&self, category: &str) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            category: Some(category.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_supplier(&self, supplier: &str) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            supplier: Some(supplier.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_brand(&self, brand: &str) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            brand: Some(brand.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_batch(&self, batch: &str) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            batch: Some(batch.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_condition(&self, condition: &str) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            condition: Some(condition.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_status(&self, status: &str) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            status: Some(status.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_city(&self, city: &str) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            city: Some(city.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_invoice(&self, invoice: &str) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            invoice: Some(invoice.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_price_range(
        &self,
        min_cents: Option<i64>,
        max_cents: Option<i64>,
    ) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            min_price_cents: min_cents,
            max_price_cents: max_cents,
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_purchase_dates(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            purchased_from: from,
            purchased_to: to,
            ..Default::default()
        })
        .await
    }

    pub async fn find_by_margin_range(
        &self,
        min: Option<f64>,
        max: Option<f64>,
    ) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            min_margin: min,
            max_margin: max,
            ..Default::default()
        })
        .await
    }

    pub async fn arrived_since(&self, date: NaiveDate) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            arrived_since: Some(date),
            ..Default::default()
        })
        .await
    }

    pub async fn text_search(&self, text: &str) -> AppResult<Vec<Product>> {
        self.find_by(ProductSearch {
            query: Some(text.to_string()),
            ..Default::default()
        })
        .await
    }

    /// `stock <= threshold`, or `stock <= min_stock_level` without one.
    pub async fn low_stock(&self, threshold: Option<i64>) -> AppResult<Vec<Product>> {
        let query = match threshold {
            Some(t) if t < 0 => return Err(AppError::validation("threshold must be >= 0")),
            Some(t) => Query::new().lte("stock", t),
            None => Query::new().le_column("stock", "min_stock_level"),
        };
        self.repo.find(&query).await
    }

    /// Low-stock products that have been sitting for at least `days`.
    pub async fn attention_list(&self, days: Option<i64>) -> AppResult<Vec<Product>> {
        let days = days.unwrap_or(self.settings.attention_days);
        if days < 0 {
            return Err(AppError::validation("days must be >= 0"));
        }
        let today = today();
        let mut products = self.low_stock(None).await?;
        products.retain(|p| p.days_in_stock(today) >= days);
        Ok(products)
    }

    // ── Writes ────────────────────────────────────────────────────────────────

    pub async fn create_product(&self, input: CreateProduct, actor: &str) -> AppResult<Product> {
        let product = input.into_product(actor, self.settings.default_min_stock_level)?;
        let created = self.repo.create(product).await?;
        info!(
            id = created.id,
            actor,
            name = %created.name,
            selling_price_cents = created.pricing.selling_price_cents(),
            "Created product"
        );
        Ok(created)
    }

    pub async fn update_product(
        &self,
        id: i64,
        input: UpdateProduct,
        actor: &str,
    ) -> AppResult<Product> {
        let updated = self
            .mutate(id, actor, |product| {
                if let Some(expected) = input.version {
                    if product.audit.version != expected {
                        return Err(AppError::Conflict(format!(
                            "Product {} is at version {}, not {}",
                            id, product.audit.version, expected
                        )));
                    }
                }
                input.apply(product)?;
                Ok(Product::COLUMNS.to_vec())
            })
            .await?;
        info!(id, actor, version = updated.audit.version, "Updated product");
        Ok(updated)
    }

    pub async fn delete_product(&self, id: i64, actor: &str) -> AppResult<()> {
        self.repo.delete(id, actor).await?;
        info!(id, actor, "Deleted product");
        Ok(())
    }

    pub async fn update_stock(&self, id: i64, stock: i64, actor: &str) -> AppResult<Product> {
        if stock < 0 {
            return Err(AppError::validation("stock must be >= 0"));
        }
        let updated = self
            .mutate(id, actor, |product| {
                if product.stock == stock {
                    return Ok(vec![]);
                }
                product.stock = stock;
                Ok(vec!["stock"])
            })
            .await?;
        info!(id, actor, stock, "Set product stock");
        Ok(updated)
    }

    /// Relative stock change. A result below zero is rejected and the stored
    /// stock is left as it was.
    pub async fn adjust_stock(&self, id: i64, delta: i64, actor: &str) -> AppResult<Product> {
        let updated = self
            .mutate(id, actor, |product| {
                if delta == 0 {
                    return Ok(vec![]);
                }
                let next = product
                    .stock
                    .checked_add(delta)
                    .ok_or_else(|| AppError::validation("stock adjustment overflows"))?;
                if next < 0 {
                    return Err(AppError::validation(format!(
                        "cannot adjust stock of product {} by {}: only {} in stock",
                        id, delta, product.stock
                    )));
                }
                product.stock = next;
                Ok(vec!["stock"])
            })
            .await?;
        info!(id, actor, delta, stock = updated.stock, "Adjusted product stock");
        Ok(updated)
    }

    pub async fn update_selling_price(
        &self,
        id: i64,
        selling_price_cents: i64,
        actor: &str,
    ) -> AppResult<Product> {
        if selling_price_cents < 0 {
            return Err(AppError::validation("selling_price_cents must be >= 0"));
        }
        let updated = self
            .mutate(id, actor, |product| {
                product.pricing = product.pricing.with_selling_price(selling_price_cents)?;
                Ok(vec!["selling_price_cents"])
            })
            .await?;
        info!(id, actor, selling_price_cents, "Updated selling price");
        Ok(updated)
    }

    /// Reprices so the margin over total cost equals `margin_percentage`.
    pub async fn update_margin_percentage(
        &self,
        id: i64,
        margin_percentage: f64,
        actor: &str,
    ) -> AppResult<Product> {
        let updated = self
            .mutate(id, actor, |product| {
                let selling = Pricing::selling_price_for_margin(
                    product.pricing.total_cost_cents(),
                    margin_percentage,
                )?;
                product.pricing = product.pricing.with_selling_price(selling)?;
                Ok(vec!["selling_price_cents"])
            })
            .await?;
        info!(
            id,
            actor,
            margin_percentage,
            selling_price_cents = updated.pricing.selling_price_cents(),
            "Updated margin"
        );
        Ok(updated)
    }

    pub async fn change_status(
        &self,
        id: i64,
        next: ProductStatus,
        actor: &str,
    ) -> AppResult<Product> {
        let mut previous = next;
        let updated = self
            .mutate(id, actor, |product| {
                previous = product.status;
                if product.status == next {
                    return Ok(vec![]);
                }
                if !product.status.can_transition_to(next) {
                    return Err(AppError::validation(format!(
                        "product {} cannot move from {} to {}",
                        id, product.status, next
                    )));
                }
                product.status = next;
                Ok(vec!["status"])
            })
            .await?;
        info!(id, actor, from = %previous, to = %next, "Changed product status");
        Ok(updated)
    }

    pub async fn mark_as_sold(&self, id: i64, actor: &str) -> AppResult<Product> {
        self.change_status(id, ProductStatus::Sold, actor).await
    }

    pub async fn mark_as_reserved(&self, id: i64, actor: &str) -> AppResult<Product> {
        self.change_status(id, ProductStatus::Reserved, actor).await
    }

    pub async fn mark_as_available(&self, id: i64, actor: &str) -> AppResult<Product> {
        self.change_status(id, ProductStatus::Available, actor).await
    }

    pub async fn mark_as_damaged(&self, id: i64, actor: &str) -> AppResult<Product> {
        self.change_status(id, ProductStatus::Damaged, actor).await
    }

    /// Read, change, write back the touched columns under the read version.
    /// A version conflict re-reads and re-applies `change`, up to
    /// `conflict_retries` times. `change` returning no columns is a no-op.
    /// Touching any pricing column writes the whole pricing group, so the
    /// derived totals and margins never go stale in the store.
    async fn mutate<F>(&self, id: i64, actor: &str, mut change: F) -> AppResult<Product>
    where
        F: FnMut(&mut Product) -> AppResult<Vec<&'static str>> + Send,
    {
        let mut attempt = 0;
        loop {
            let mut product = self.require(id).await?;
            let version = product.audit.version;

            let mut columns = change(&mut product)?;
            if columns.is_empty() {
                return Ok(product);
            }
            if columns.iter().any(|c| PRICING_COLUMNS.contains(c)) {
                columns.retain(|c| !PRICING_COLUMNS.contains(c));
                columns.extend_from_slice(PRICING_COLUMNS);
            }

            let mut fields = columns
                .into_iter()
                .map(|column| {
                    product
                        .field(column)
                        .map(|value| (column, value))
                        .ok_or_else(|| AppError::Internal(format!("Product has no column '{}'", column)))
                })
                .collect::<AppResult<Vec<_>>>()?;
            fields.extend(Audit::touched_fields(actor));

            match self.repo.update_fields(id, Some(version), &fields).await {
                Err(AppError::Conflict(_)) if attempt < self.settings.conflict_retries => {
                    attempt += 1;
                    debug!(id, attempt, "Version conflict, re-reading product");
                    tokio::task::yield_now().await;
                }
                result => return result,
            }
        }
    }

    // ── Reports ───────────────────────────────────────────────────────────────

    pub async fn statistics(&self) -> AppResult<InventoryStatistics> {
        let active = Query::new();
        let products = self.repo.find(&active).await?;
        let totals = reports::value_totals(&products);

        let total_units = self.repo.sum("stock", &active).await?;
        let total_margin = self.repo.sum("margin_cents", &active).await?;
        let average_margin = self.repo.average("margin_percentage", &active).await?;
        let low_stock_count = self
            .repo
            .count(&Query::new().le_column("stock", "min_stock_level"))
            .await?;

        Ok(InventoryStatistics {
            product_count: products.len() as u64,
            total_units: total_units.round() as i64,
            total_stock_value_cents: totals.stock_value_cents,
            total_cost_value_cents: totals.cost_value_cents,
            total_margin_cents: total_margin.round() as i64,
            potential_profit_cents: totals.potential_profit_cents,
            average_margin_percentage: average_margin.unwrap_or(0.0),
            low_stock_count,
        })
    }

    pub async fn category_breakdown(&self) -> AppResult<Vec<GroupSummary>> {
        let products = self.repo.find(&Query::new()).await?;
        Ok(reports::breakdown(&products, |p| p.category.as_str()))
    }

    pub async fn supplier_breakdown(&self) -> AppResult<Vec<GroupSummary>> {
        let products = self.repo.find(&Query::new()).await?;
        Ok(reports::breakdown(&products, |p| p.supplier_name.as_str()))
    }

    pub async fn export_csv(&self) -> AppResult<String> {
        let products = self.repo.find(&Query::new()).await?;
        reports::to_csv(&products, today())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::product::tests::sample_create;
    use crate::repository::{MemoryRepository, Value};

    fn service() -> ProductService {
        ProductService::new(Arc::new(MemoryRepository::new()), ServiceSettings::default())
    }

    async fn seeded(svc: &ProductService, stock: i64) -> Product {
        let mut input = sample_create();
        input.stock = stock;
        svc.create_product(input, "tester").await.unwrap()
    }

    #[tokio::test]
    async fn create_then_get_returns_derived_pricing() {
        let svc = service();
        let created = seeded(&svc, 10).await;
        let fetched = svc.get_product(created.id).await.unwrap().unwrap();

        assert_eq!(fetched, created);
        assert_eq!(fetched.pricing.total_cost_cents(), 12_000);
        assert_eq!(fetched.pricing.margin_cents(), 6_000);
        assert!((fetched.pricing.margin_percentage() - 50.0).abs() < 1e-9);
        assert_eq!(fetched.min_stock_level, 5);
        assert_eq!(fetched.audit.version, 1);
    }

    #[tokio::test]
    async fn missing_product_is_not_found() {
        let svc = service();
        assert!(svc.get_product(99).await.unwrap().is_none());
        assert!(matches!(
            svc.adjust_stock(99, 1, "tester").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn adjust_below_zero_leaves_stock_unchanged() {
        let svc = service();
        let p = seeded(&svc, 3).await;

        let err = svc.adjust_stock(p.id, -4, "tester").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let after = svc.require(p.id).await.unwrap();
        assert_eq!(after.stock, 3);
        assert_eq!(after.audit.version, p.audit.version);
    }

    #[tokio::test]
    async fn stock_writes_record_the_actor() {
        let svc = service();
        let p = seeded(&svc, 10).await;

        let updated = svc.adjust_stock(p.id, -2, "warehouse").await.unwrap();
        assert_eq!(updated.stock, 8);
        assert_eq!(updated.audit.updated_by, "warehouse");
        assert_eq!(updated.audit.created_by, "tester");
        assert_eq!(updated.audit.version, 2);

        let updated = svc.update_stock(p.id, 40, "warehouse").await.unwrap();
        assert_eq!(updated.stock, 40);
        assert!(svc.update_stock(p.id, -1, "warehouse").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_adjustments_do_not_lose_updates() {
        let svc = Arc::new(service());
        let id = seeded(&svc, 10).await.id;

        let a = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.adjust_stock(id, -3, "a").await })
        };
        let b = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.adjust_stock(id, -4, "b").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let after = svc.require(id).await.unwrap();
        assert_eq!(after.stock, 3);
        assert_eq!(after.audit.version, 3);
    }

    #[tokio::test]
    async fn price_and_margin_mutators_keep_pricing_consistent() {
        let svc = service();
        let p = seeded(&svc, 1).await;

        let repriced = svc.update_selling_price(p.id, 15_000, "tester").await.unwrap();
        assert_eq!(repriced.pricing.margin_cents(), 3_000);
        assert!((repriced.pricing.margin_percentage() - 25.0).abs() < 1e-9);

        let target = svc.update_margin_percentage(p.id, 100.0, "tester").await.unwrap();
        assert_eq!(target.pricing.selling_price_cents(), 24_000);
        assert_eq!(target.pricing.total_cost_cents(), 12_000);

        assert!(svc.update_selling_price(p.id, -1, "tester").await.is_err());
        assert!(svc.update_margin_percentage(p.id, -120.0, "tester").await.is_err());
    }

    #[tokio::test]
    async fn margin_target_needs_a_cost() {
        let svc = service();
        let mut input = sample_create();
        input.purchase_price_cents = 0;
        input.transport_cost_cents = 0;
        let p = svc.create_product(input, "tester").await.unwrap();
        assert!(matches!(
            svc.update_margin_percentage(p.id, 10.0, "tester").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn status_follows_the_transition_table() {
        let svc = service();
        let p = seeded(&svc, 1).await;

        let reserved = svc.mark_as_reserved(p.id, "tester").await.unwrap();
        assert_eq!(reserved.status, ProductStatus::Reserved);

        let again = svc.mark_as_reserved(p.id, "tester").await.unwrap();
        assert_eq!(again.audit.version, reserved.audit.version);

        svc.mark_as_sold(p.id, "tester").await.unwrap();
        assert!(matches!(
            svc.mark_as_available(p.id, "tester").await,
            Err(AppError::Validation(_))
        ));

        svc.mark_as_damaged(p.id, "tester").await.unwrap();
        assert!(svc.mark_as_sold(p.id, "tester").await.is_err());
        assert_eq!(svc.require(p.id).await.unwrap().status, ProductStatus::Damaged);
    }

    #[tokio::test]
    async fn full_update_merges_and_checks_version() {
        let svc = service();
        let p = seeded(&svc, 10).await;

        let stale = UpdateProduct {
            name: Some("iPhone 15 Pro Max".into()),
            version: Some(p.audit.version + 7),
            ..Default::default()
        };
        assert!(matches!(
            svc.update_product(p.id, stale, "tester").await,
            Err(AppError::Conflict(_))
        ));

        let update = UpdateProduct {
            name: Some("iPhone 15 Pro Max".into()),
            purchase_price_cents: Some(11_000),
            version: Some(p.audit.version),
            ..Default::default()
        };
        let updated = svc.update_product(p.id, update, "editor").await.unwrap();
        assert_eq!(updated.name, "iPhone 15 Pro Max");
        assert_eq!(updated.pricing.total_cost_cents(), 13_000);
        assert_eq!(updated.pricing.margin_cents(), 5_000);
        assert_eq!(updated.supplier_city, "Milano");
        assert_eq!(updated.audit.updated_by, "editor");

        let negative = UpdateProduct {
            stock: Some(-5),
            ..Default::default()
        };
        assert!(svc.update_product(p.id, negative, "editor").await.is_err());
    }

    #[tokio::test]
    async fn soft_deleted_products_vanish_from_reads() {
        let svc = service();
        let keep = seeded(&svc, 10).await;
        let gone = seeded(&svc, 10).await;

        svc.delete_product(gone.id, "auditor").await.unwrap();

        assert!(svc.get_product(gone.id).await.unwrap().is_none());
        let listed = svc.list(&ProductSearch::default(), None).await.unwrap();
        assert_eq!(listed.iter().map(|p| p.id).collect::<Vec<_>>(), vec![keep.id]);

        let all = svc.repo.find(&Query::new().include_deleted()).await.unwrap();
        let row = all.iter().find(|p| p.id == gone.id).unwrap();
        assert_eq!(row.audit.lifecycle.deleted_by(), Some("auditor"));

        assert!(matches!(
            svc.delete_product(gone.id, "auditor").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lookups_are_case_insensitive() {
        let svc = service();
        let p = seeded(&svc, 10).await;

        assert_eq!(svc.find_by_category("smartphone").await.unwrap().len(), 1);
        assert_eq!(svc.find_by_city("MILANO").await.unwrap().len(), 1);
        assert_eq!(svc.find_by_status("Available").await.unwrap().len(), 1);
        assert!(svc.find_by_brand("samsung").await.unwrap().is_empty());
        assert_eq!(svc.text_search("titanium").await.unwrap()[0].id, p.id);
        assert_eq!(
            svc.find_by_price_range(Some(17_000), Some(18_000)).await.unwrap().len(),
            1
        );
        assert!(svc.find_by_margin_range(Some(60.0), None).await.unwrap().is_empty());
        assert!(svc.find_by_status("unknown").await.is_err());
    }

    #[tokio::test]
    async fn low_stock_uses_threshold_or_minimum() {
        let svc = service();
        let low = seeded(&svc, 5).await;
        let plenty = seeded(&svc, 50).await;

        let by_minimum = svc.low_stock(None).await.unwrap();
        assert_eq!(by_minimum.iter().map(|p| p.id).collect::<Vec<_>>(), vec![low.id]);
        assert!(by_minimum.iter().all(Product::is_low_stock));

        let by_threshold = svc.low_stock(Some(50)).await.unwrap();
        assert_eq!(by_threshold.len(), 2);
        assert!(by_threshold.iter().any(|p| p.id == plenty.id));
    }

    #[tokio::test]
    async fn attention_list_needs_low_stock_and_age() {
        let svc = service();
        // Arrived 2024-05-20 in the sample.
        let old_low = seeded(&svc, 1).await;
        seeded(&svc, 40).await;

        let mut fresh = sample_create();
        fresh.stock = 1;
        fresh.arrival_date = Some(today());
        svc.create_product(fresh, "tester").await.unwrap();

        let flagged = svc.attention_list(None).await.unwrap();
        assert_eq!(flagged.iter().map(|p| p.id).collect::<Vec<_>>(), vec![old_low.id]);

        assert_eq!(svc.attention_list(Some(0)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn statistics_aggregate_active_products() {
        let svc = service();
        seeded(&svc, 2).await;
        let p = seeded(&svc, 4).await;
        svc.update_selling_price(p.id, 24_000, "tester").await.unwrap();
        let gone = seeded(&svc, 100).await;
        svc.delete_product(gone.id, "tester").await.unwrap();

        let stats = svc.statistics().await.unwrap();
        assert_eq!(stats.product_count, 2);
        assert_eq!(stats.total_units, 6);
        assert_eq!(stats.total_stock_value_cents, 2 * 18_000 + 4 * 24_000);
        assert_eq!(stats.total_cost_value_cents, 6 * 12_000);
        assert_eq!(stats.total_margin_cents, 6_000 + 12_000);
        assert_eq!(stats.potential_profit_cents, 2 * 6_000 + 4 * 12_000);
        assert!((stats.average_margin_percentage - 75.0).abs() < 1e-9);
        assert_eq!(stats.low_stock_count, 2);
    }

    #[tokio::test]
    async fn empty_inventory_reports_zeroes() {
        let stats = service().statistics().await.unwrap();
        assert_eq!(stats.product_count, 0);
        assert_eq!(stats.average_margin_percentage, 0.0);
    }

    #[tokio::test]
    async fn paged_listing_honours_order() {
        let svc = service();
        for stock in [7, 3, 9] {
            seeded(&svc, stock).await;
        }
        let page = svc
            .list_page(
                &ProductSearch::default(),
                Some(("stock", Direction::Desc)),
                Page::new(1, 2),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.iter().map(|p| p.stock).collect::<Vec<_>>(), vec![9, 7]);
    }

    /// Records the columns handed to `update_fields`, then delegates.
    #[derive(Default)]
    struct RecordingRepo {
        inner: MemoryRepository<Product>,
        writes: std::sync::Mutex<Vec<Vec<(&'static str, Value)>>>,
    }

    impl RecordingRepo {
        fn written_columns(&self) -> Vec<Vec<&'static str>> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .map(|fields| fields.iter().map(|(c, _)| *c).collect())
                .collect()
        }

        fn last_value(&self, column: &str) -> Option<Value> {
            self.writes
                .lock()
                .unwrap()
                .last()?
                .iter()
                .find(|(c, _)| *c == column)
                .map(|(_, v)| v.clone())
        }
    }

    #[async_trait::async_trait]
    impl Repository<Product> for RecordingRepo {
        async fn get_by_id(&self, id: i64) -> AppResult<Option<Product>> {
            self.inner.get_by_id(id).await
        }
        async fn find(&self, query: &Query) -> AppResult<Vec<Product>> {
            self.inner.find(query).await
        }
        async fn page(&self, query: &Query, page: Page) -> AppResult<Paged<Product>> {
            self.inner.page(query, page).await
        }
        async fn exists(&self, id: i64) -> AppResult<bool> {
            self.inner.exists(id).await
        }
        async fn count(&self, query: &Query) -> AppResult<u64> {
            self.inner.count(query).await
        }
        async fn sum(&self, column: &'static str, query: &Query) -> AppResult<f64> {
            self.inner.sum(column, query).await
        }
        async fn average(&self, column: &'static str, query: &Query) -> AppResult<Option<f64>> {
            self.inner.average(column, query).await
        }
        async fn create(&self, entity: Product) -> AppResult<Product> {
            self.inner.create(entity).await
        }
        async fn update(&self, entity: &Product) -> AppResult<Product> {
            self.inner.update(entity).await
        }
        async fn update_fields(
            &self,
            id: i64,
            expected_version: Option<i64>,
            fields: &[(&'static str, Value)],
        ) -> AppResult<Product> {
            self.writes.lock().unwrap().push(fields.to_vec());
            self.inner.update_fields(id, expected_version, fields).await
        }
        async fn delete(&self, id: i64, by: &str) -> AppResult<()> {
            self.inner.delete(id, by).await
        }
        async fn hard_delete(&self, id: i64) -> AppResult<()> {
            self.inner.hard_delete(id).await
        }
        async fn status(&self) -> StoreStatus {
            self.inner.status().await
        }
    }

    fn recorded() -> (Arc<RecordingRepo>, ProductService) {
        let repo = Arc::new(RecordingRepo::default());
        let svc = ProductService::new(repo.clone(), ServiceSettings::default());
        (repo, svc)
    }

    #[tokio::test]
    async fn price_changes_write_every_pricing_column() {
        let (repo, svc) = recorded();
        let p = seeded(&svc, 4).await;

        svc.update_selling_price(p.id, 15_000, "tester").await.unwrap();
        assert_eq!(repo.last_value("margin_cents"), Some(Value::from(3_000_i64)));
        assert_eq!(repo.last_value("margin_percentage"), Some(Value::from(25.0)));

        svc.update_margin_percentage(p.id, 50.0, "tester").await.unwrap();
        assert_eq!(repo.last_value("selling_price_cents"), Some(Value::from(18_000_i64)));
        assert_eq!(repo.last_value("margin_cents"), Some(Value::from(6_000_i64)));

        svc.update_stock(p.id, 9, "tester").await.unwrap();

        let writes = repo.written_columns();
        assert_eq!(writes.len(), 3);
        for columns in &writes[..2] {
            for column in PRICING_COLUMNS {
                assert_eq!(
                    columns.iter().filter(|c| *c == column).count(),
                    1,
                    "{column} in {columns:?}"
                );
            }
        }
        assert!(writes[2].contains(&"stock"));
        assert!(!writes[2].iter().any(|c| PRICING_COLUMNS.contains(c)));
    }
}
