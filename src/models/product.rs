use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use crate::error::{AppError, AppResult};
use crate::models::audit::Audit;
use crate::repository::{Entity, Value};

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Available,
    Reserved,
    Sold,
    Damaged,
}

impl ProductStatus {
    pub const ALL: [ProductStatus; 4] = [
        ProductStatus::Available,
        ProductStatus::Reserved,
        ProductStatus::Sold,
        ProductStatus::Damaged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProductStatus::Available => "available",
            ProductStatus::Reserved => "reserved",
            ProductStatus::Sold => "sold",
            ProductStatus::Damaged => "damaged",
        }
    }

    /// Statuses reachable in one step. Damaged is terminal; a sold unit can
    /// only come back as damaged.
    pub fn next_states(self) -> &'static [ProductStatus] {
        use ProductStatus::*;
        match self {
            Available => &[Reserved, Sold, Damaged],
            Reserved => &[Available, Sold, Damaged],
            Sold => &[Damaged],
            Damaged => &[],
        }
    }

    /// Same-state moves are accepted as no-ops.
    pub fn can_transition_to(self, next: ProductStatus) -> bool {
        self == next || self.next_states().contains(&next)
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(ProductStatus::Available),
            "reserved" => Ok(ProductStatus::Reserved),
            "sold" => Ok(ProductStatus::Sold),
            "damaged" | "inactive" => Ok(ProductStatus::Damaged),
            other => Err(AppError::validation(format!(
                "unknown status '{}' (expected one of: {})",
                other,
                ProductStatus::ALL.map(ProductStatus::as_str).join(", ")
            ))),
        }
    }
}

// ── Pricing ───────────────────────────────────────────────────────────────────

/// Cost and price breakdown, all money in integer cents.
///
/// The derived fields (`total_cost_cents`, `margin_cents`,
/// `margin_percentage`) are only ever produced by [`Pricing::compute`], so
/// they cannot drift from the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pricing {
    purchase_price_cents: i64,
    transport_cost_cents: i64,
    other_costs_cents: i64,
    total_cost_cents: i64,
    selling_price_cents: i64,
    margin_cents: i64,
    margin_percentage: f64,
}

impl Pricing {
    pub fn compute(
        purchase_price_cents: i64,
        transport_cost_cents: i64,
        other_costs_cents: i64,
        selling_price_cents: i64,
    ) -> AppResult<Self> {
        for (field, value) in [
            ("purchase_price_cents", purchase_price_cents),
            ("transport_cost_cents", transport_cost_cents),
            ("other_costs_cents", other_costs_cents),
            ("selling_price_cents", selling_price_cents),
        ] {
            if value < 0 {
                return Err(AppError::validation(format!("{} must be >= 0", field)));
            }
        }

        let total_cost_cents = purchase_price_cents
            .checked_add(transport_cost_cents)
            .and_then(|t| t.checked_add(other_costs_cents))
            .ok_or_else(|| AppError::validation("total cost overflows"))?;
        let margin_cents = selling_price_cents - total_cost_cents;
        let margin_percentage = if total_cost_cents > 0 {
            margin_cents as f64 / total_cost_cents as f64 * 100.0
        } else {
            0.0
        };

        Ok(Self {
            purchase_price_cents,
            transport_cost_cents,
            other_costs_cents,
            total_cost_cents,
            selling_price_cents,
            margin_cents,
            margin_percentage,
        })
    }

    /// Selling price that yields `margin_percentage` over `total_cost_cents`,
    /// rounded to the nearest cent.
    pub fn selling_price_for_margin(total_cost_cents: i64, margin_percentage: f64) -> AppResult<i64> {
        if !margin_percentage.is_finite() || margin_percentage < -100.0 {
            return Err(AppError::validation("margin_percentage must be >= -100"));
        }
        if total_cost_cents <= 0 {
            return Err(AppError::validation(
                "cannot target a margin on a product with zero total cost",
            ));
        }
        Ok((total_cost_cents as f64 * (1.0 + margin_percentage / 100.0)).round() as i64)
    }

    pub fn with_selling_price(&self, selling_price_cents: i64) -> AppResult<Self> {
        Self::compute(
            self.purchase_price_cents,
            self.transport_cost_cents,
            self.other_costs_cents,
            selling_price_cents,
        )
    }

    pub fn purchase_price_cents(&self) -> i64 {
        self.purchase_price_cents
    }

    pub fn transport_cost_cents(&self) -> i64 {
        self.transport_cost_cents
    }

    pub fn other_costs_cents(&self) -> i64 {
        self.other_costs_cents
    }

    pub fn total_cost_cents(&self) -> i64 {
        self.total_cost_cents
    }

    pub fn selling_price_cents(&self) -> i64 {
        self.selling_price_cents
    }

    pub fn margin_cents(&self) -> i64 {
        self.margin_cents
    }

    pub fn margin_percentage(&self) -> f64 {
        self.margin_percentage
    }

    fn values(&self) -> [(&'static str, Value); 7] {
        [
            ("purchase_price_cents", Value::from(self.purchase_price_cents)),
            ("transport_cost_cents", Value::from(self.transport_cost_cents)),
            ("other_costs_cents", Value::from(self.other_costs_cents)),
            ("total_cost_cents", Value::from(self.total_cost_cents)),
            ("selling_price_cents", Value::from(self.selling_price_cents)),
            ("margin_cents", Value::from(self.margin_cents)),
            ("margin_percentage", Value::from(self.margin_percentage)),
        ]
    }
}

/// Stored pricing columns, inputs before the values derived from them.
pub const PRICING_COLUMNS: &[&str] = &[
    "purchase_price_cents",
    "transport_cost_cents",
    "other_costs_cents",
    "total_cost_cents",
    "selling_price_cents",
    "margin_cents",
    "margin_percentage",
];

// ── Product ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub brand: String,
    pub model: String,
    pub storage: Option<String>,
    pub color: Option<String>,
    pub memory: Option<String>,
    pub processor: Option<String>,
    pub screen_size: Option<String>,
    pub condition: String,
    #[serde(flatten)]
    pub pricing: Pricing,
    pub stock: i64,
    pub min_stock_level: i64,
    pub supplier_name: String,
    pub supplier_city: String,
    pub purchase_date: NaiveDate,
    pub arrival_date: Option<NaiveDate>,
    pub import_batch: String,
    pub invoice_number: String,
    pub status: ProductStatus,
    #[serde(flatten)]
    pub audit: Audit,
}

impl Product {
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.min_stock_level
    }

    pub fn total_value_cents(&self) -> i64 {
        self.stock.saturating_mul(self.pricing.selling_price_cents())
    }

    /// Whole days since arrival, or since the record was created when the
    /// arrival date is unknown. Never negative.
    pub fn days_in_stock(&self, today: NaiveDate) -> i64 {
        let since = self
            .arrival_date
            .unwrap_or_else(|| self.audit.created_at.date_naive());
        (today - since).num_days().max(0)
    }

    pub fn view(self, today: NaiveDate) -> ProductView {
        ProductView {
            is_low_stock: self.is_low_stock(),
            total_value_cents: self.total_value_cents(),
            days_in_stock: self.days_in_stock(today),
            product: self,
        }
    }

    /// Rejects values no write may persist.
    pub fn validate(&self) -> AppResult<()> {
        for (field, value) in [
            ("name", &self.name),
            ("category", &self.category),
            ("brand", &self.brand),
            ("model", &self.model),
            ("condition", &self.condition),
            ("supplier_name", &self.supplier_name),
            ("supplier_city", &self.supplier_city),
            ("import_batch", &self.import_batch),
            ("invoice_number", &self.invoice_number),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::validation(format!("{} must not be empty", field)));
            }
        }
        if self.stock < 0 {
            return Err(AppError::validation("stock must be >= 0"));
        }
        if self.min_stock_level < 0 {
            return Err(AppError::validation("min_stock_level must be >= 0"));
        }
        Ok(())
    }

    fn recompute_pricing(
        &mut self,
        purchase: Option<i64>,
        transport: Option<i64>,
        other: Option<i64>,
        selling: Option<i64>,
    ) -> AppResult<()> {
        let p = &self.pricing;
        self.pricing = Pricing::compute(
            purchase.unwrap_or(p.purchase_price_cents),
            transport.unwrap_or(p.transport_cost_cents),
            other.unwrap_or(p.other_costs_cents),
            selling.unwrap_or(p.selling_price_cents),
        )?;
        Ok(())
    }
}

/// Product plus the fields derived at read time.
#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    pub is_low_stock: bool,
    pub total_value_cents: i64,
    pub days_in_stock: i64,
}

impl Entity for Product {
    const TABLE: &'static str = "products";
    const NAME: &'static str = "Product";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "description",
        "category",
        "brand",
        "model",
        "storage",
        "color",
        "memory",
        "processor",
        "screen_size",
        "condition",
        "purchase_price_cents",
        "transport_cost_cents",
        "other_costs_cents",
        "total_cost_cents",
        "selling_price_cents",
        "margin_cents",
        "margin_percentage",
        "stock",
        "min_stock_level",
        "supplier_name",
        "supplier_city",
        "purchase_date",
        "arrival_date",
        "import_batch",
        "invoice_number",
        "status",
    ];

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn audit(&self) -> &Audit {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut Audit {
        &mut self.audit
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        let mut values = vec![
            ("name", Value::from(self.name.as_str())),
            ("description", Value::from(self.description.clone())),
            ("category", Value::from(self.category.as_str())),
            ("brand", Value::from(self.brand.as_str())),
            ("model", Value::from(self.model.as_str())),
            ("storage", Value::from(self.storage.clone())),
            ("color", Value::from(self.color.clone())),
            ("memory", Value::from(self.memory.clone())),
            ("processor", Value::from(self.processor.clone())),
            ("screen_size", Value::from(self.screen_size.clone())),
            ("condition", Value::from(self.condition.as_str())),
        ];
        values.extend(self.pricing.values());
        values.extend([
            ("stock", Value::from(self.stock)),
            ("min_stock_level", Value::from(self.min_stock_level)),
            ("supplier_name", Value::from(self.supplier_name.as_str())),
            ("supplier_city", Value::from(self.supplier_city.as_str())),
            ("purchase_date", Value::from(self.purchase_date)),
            ("arrival_date", Value::from(self.arrival_date)),
            ("import_batch", Value::from(self.import_batch.as_str())),
            ("invoice_number", Value::from(self.invoice_number.as_str())),
            ("status", Value::from(self.status.as_str())),
        ]);
        values
    }

    fn assign(&mut self, column: &str, value: Value) -> AppResult<()> {
        match column {
            "name" => self.name = value.into_text(column)?,
            "description" => self.description = value.into_opt_text(column)?,
            "category" => self.category = value.into_text(column)?,
            "brand" => self.brand = value.into_text(column)?,
            "model" => self.model = value.into_text(column)?,
            "storage" => self.storage = value.into_opt_text(column)?,
            "color" => self.color = value.into_opt_text(column)?,
            "memory" => self.memory = value.into_opt_text(column)?,
            "processor" => self.processor = value.into_opt_text(column)?,
            "screen_size" => self.screen_size = value.into_opt_text(column)?,
            "condition" => self.condition = value.into_text(column)?,
            "purchase_price_cents" => {
                self.recompute_pricing(Some(value.into_int(column)?), None, None, None)?
            }
            "transport_cost_cents" => {
                self.recompute_pricing(None, Some(value.into_int(column)?), None, None)?
            }
            "other_costs_cents" => {
                self.recompute_pricing(None, None, Some(value.into_int(column)?), None)?
            }
            "selling_price_cents" => {
                self.recompute_pricing(None, None, None, Some(value.into_int(column)?))?
            }
            // Derived columns are accepted only when they agree with the inputs.
            "total_cost_cents" | "margin_cents" | "margin_percentage" => {
                let current = self
                    .pricing
                    .values()
                    .into_iter()
                    .find(|(name, _)| *name == column)
                    .map(|(_, v)| v);
                if current.as_ref() != Some(&value) {
                    return Err(AppError::validation(format!(
                        "{} is derived from the cost and selling price and cannot be set",
                        column
                    )));
                }
            }
            "stock" => self.stock = value.into_int(column)?,
            "min_stock_level" => self.min_stock_level = value.into_int(column)?,
            "supplier_name" => self.supplier_name = value.into_text(column)?,
            "supplier_city" => self.supplier_city = value.into_text(column)?,
            "purchase_date" => self.purchase_date = value.into_date(column)?,
            "arrival_date" => self.arrival_date = value.into_opt_date(column)?,
            "import_batch" => self.import_batch = value.into_text(column)?,
            "invoice_number" => self.invoice_number = value.into_text(column)?,
            "status" => self.status = value.into_text(column)?.parse()?,
            other => {
                return Err(AppError::validation(format!(
                    "Product has no writable field '{}'",
                    other
                )))
            }
        }
        Ok(())
    }
}

impl<'r> FromRow<'r, PgRow> for Product {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<ProductStatus>()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: e.to_string().into(),
            })?;

        // Trust the stored derived columns; they were computed on write.
        let pricing = Pricing {
            purchase_price_cents: row.try_get("purchase_price_cents")?,
            transport_cost_cents: row.try_get("transport_cost_cents")?,
            other_costs_cents: row.try_get("other_costs_cents")?,
            total_cost_cents: row.try_get("total_cost_cents")?,
            selling_price_cents: row.try_get("selling_price_cents")?,
            margin_cents: row.try_get("margin_cents")?,
            margin_percentage: row.try_get("margin_percentage")?,
        };

        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            brand: row.try_get("brand")?,
            model: row.try_get("model")?,
            storage: row.try_get("storage")?,
            color: row.try_get("color")?,
            memory: row.try_get("memory")?,
            processor: row.try_get("processor")?,
            screen_size: row.try_get("screen_size")?,
            condition: row.try_get("condition")?,
            pricing,
            stock: row.try_get("stock")?,
            min_stock_level: row.try_get("min_stock_level")?,
            supplier_name: row.try_get("supplier_name")?,
            supplier_city: row.try_get("supplier_city")?,
            purchase_date: row.try_get("purchase_date")?,
            arrival_date: row.try_get("arrival_date")?,
            import_batch: row.try_get("import_batch")?,
            invoice_number: row.try_get("invoice_number")?,
            status,
            audit: Audit::from_row(row)?,
        })
    }
}

// ── Request payloads ─────────────────────────────────────────────────────────

fn default_condition() -> String {
    "New".to_string()
}

/// Body of `POST /api/products`. Derived pricing fields are not part of the
/// payload; if a client sends them they are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub brand: String,
    pub model: String,
    pub storage: Option<String>,
    pub color: Option<String>,
    pub memory: Option<String>,
    pub processor: Option<String>,
    pub screen_size: Option<String>,
    #[serde(default = "default_condition")]
    pub condition: String,
    pub purchase_price_cents: i64,
    #[serde(default)]
    pub transport_cost_cents: i64,
    #[serde(default)]
    pub other_costs_cents: i64,
    pub selling_price_cents: i64,
    #[serde(default)]
    pub stock: i64,
    pub min_stock_level: Option<i64>,
    pub supplier_name: String,
    pub supplier_city: String,
    /// Defaults to today.
    pub purchase_date: Option<NaiveDate>,
    pub arrival_date: Option<NaiveDate>,
    pub import_batch: String,
    pub invoice_number: String,
    pub status: Option<ProductStatus>,
}

impl CreateProduct {
    pub fn into_product(self, actor: &str, default_min_stock_level: i64) -> AppResult<Product> {
        let pricing = Pricing::compute(
            self.purchase_price_cents,
            self.transport_cost_cents,
            self.other_costs_cents,
            self.selling_price_cents,
        )?;

        let product = Product {
            id: 0,
            name: self.name.trim().to_string(),
            description: self.description,
            category: self.category.trim().to_string(),
            brand: self.brand.trim().to_string(),
            model: self.model.trim().to_string(),
            storage: self.storage,
            color: self.color,
            memory: self.memory,
            processor: self.processor,
            screen_size: self.screen_size,
            condition: self.condition.trim().to_string(),
            pricing,
            stock: self.stock,
            min_stock_level: self.min_stock_level.unwrap_or(default_min_stock_level),
            supplier_name: self.supplier_name.trim().to_string(),
            supplier_city: self.supplier_city.trim().to_string(),
            purchase_date: self.purchase_date.unwrap_or_else(|| Utc::now().date_naive()),
            arrival_date: self.arrival_date,
            import_batch: self.import_batch.trim().to_string(),
            invoice_number: self.invoice_number.trim().to_string(),
            status: self.status.unwrap_or(ProductStatus::Available),
            audit: Audit::new(actor),
        };
        product.validate()?;
        Ok(product)
    }
}

/// Body of `PUT /api/products/:id`. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProduct {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub storage: Option<String>,
    pub color: Option<String>,
    pub memory: Option<String>,
    pub processor: Option<String>,
    pub screen_size: Option<String>,
    pub condition: Option<String>,
    pub purchase_price_cents: Option<i64>,
    pub transport_cost_cents: Option<i64>,
    pub other_costs_cents: Option<i64>,
    pub selling_price_cents: Option<i64>,
    pub stock: Option<i64>,
    pub min_stock_level: Option<i64>,
    pub supplier_name: Option<String>,
    pub supplier_city: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub arrival_date: Option<NaiveDate>,
    pub import_batch: Option<String>,
    pub invoice_number: Option<String>,
    /// Expected row version; when present a stale version is a conflict.
    pub version: Option<i64>,
}

impl UpdateProduct {
    /// Merge into `product`, recomputing pricing. Status is changed through
    /// the status endpoints only.
    pub fn apply(&self, product: &mut Product) -> AppResult<()> {
        fn merge(target: &mut String, value: &Option<String>) {
            if let Some(v) = value {
                *target = v.trim().to_string();
            }
        }
        fn merge_opt(target: &mut Option<String>, value: &Option<String>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        merge(&mut product.name, &self.name);
        merge_opt(&mut product.description, &self.description);
        merge(&mut product.category, &self.category);
        merge(&mut product.brand, &self.brand);
        merge(&mut product.model, &self.model);
        merge_opt(&mut product.storage, &self.storage);
        merge_opt(&mut product.color, &self.color);
        merge_opt(&mut product.memory, &self.memory);
        merge_opt(&mut product.processor, &self.processor);
        merge_opt(&mut product.screen_size, &self.screen_size);
        merge(&mut product.condition, &self.condition);
        merge(&mut product.supplier_name, &self.supplier_name);
        merge(&mut product.supplier_city, &self.supplier_city);
        merge(&mut product.import_batch, &self.import_batch);
        merge(&mut product.invoice_number, &self.invoice_number);

        product.recompute_pricing(
            self.purchase_price_cents,
            self.transport_cost_cents,
            self.other_costs_cents,
            self.selling_price_cents,
        )?;

        if let Some(stock) = self.stock {
            product.stock = stock;
        }
        if let Some(level) = self.min_stock_level {
            product.min_stock_level = level;
        }
        if let Some(date) = self.purchase_date {
            product.purchase_date = date;
        }
        if self.arrival_date.is_some() {
            product.arrival_date = self.arrival_date;
        }

        product.validate()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_create() -> CreateProduct {
        CreateProduct {
            name: "iPhone 15 Pro".to_string(),
            description: Some("Titanium, dual SIM".to_string()),
            category: "Smartphone".to_string(),
            brand: "Apple".to_string(),
            model: "A3102".to_string(),
            storage: Some("256GB".to_string()),
            color: Some("Natural Titanium".to_string()),
            memory: Some("8GB".to_string()),
            processor: Some("A17 Pro".to_string()),
            screen_size: Some("6.1\"".to_string()),
            condition: "New".to_string(),
            purchase_price_cents: 10_000,
            transport_cost_cents: 2_000,
            other_costs_cents: 0,
            selling_price_cents: 18_000,
            stock: 10,
            min_stock_level: None,
            supplier_name: "Tecno Milano Srl".to_string(),
            supplier_city: "Milano".to_string(),
            purchase_date: NaiveDate::from_ymd_opt(2024, 5, 2),
            arrival_date: NaiveDate::from_ymd_opt(2024, 5, 20),
            import_batch: "IT-2024-05".to_string(),
            invoice_number: "FT-0192".to_string(),
            status: None,
        }
    }

    fn sample() -> Product {
        sample_create().into_product("tester", 5).unwrap()
    }

    #[test]
    fn pricing_example_scenario() {
        let p = Pricing::compute(10_000, 2_000, 0, 18_000).unwrap();
        assert_eq!(p.total_cost_cents(), 12_000);
        assert_eq!(p.margin_cents(), 6_000);
        assert!((p.margin_percentage() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn pricing_counts_other_costs() {
        let p = Pricing::compute(10_000, 2_000, 500, 18_000).unwrap();
        assert_eq!(p.total_cost_cents(), 12_500);
        assert_eq!(p.margin_cents(), 5_500);
    }

    #[test]
    fn zero_cost_has_zero_margin_percentage() {
        let p = Pricing::compute(0, 0, 0, 5_000).unwrap();
        assert_eq!(p.margin_cents(), 5_000);
        assert_eq!(p.margin_percentage(), 0.0);
    }

    #[test]
    fn negative_money_is_rejected() {
        assert!(matches!(
            Pricing::compute(-1, 0, 0, 100),
            Err(AppError::Validation(_))
        ));
        assert!(Pricing::compute(100, 0, 0, -5).is_err());
    }

    #[test]
    fn selling_price_for_target_margin() {
        assert_eq!(Pricing::selling_price_for_margin(12_000, 25.0).unwrap(), 15_000);
        assert_eq!(Pricing::selling_price_for_margin(333, 10.0).unwrap(), 366);
        assert!(Pricing::selling_price_for_margin(0, 10.0).is_err());
        assert!(Pricing::selling_price_for_margin(100, -150.0).is_err());
    }

    #[test]
    fn status_transition_table() {
        use ProductStatus::*;
        assert!(Available.can_transition_to(Reserved));
        assert!(Reserved.can_transition_to(Sold));
        assert!(Reserved.can_transition_to(Available));
        assert!(Sold.can_transition_to(Damaged));
        assert!(!Sold.can_transition_to(Available));
        assert!(!Sold.can_transition_to(Reserved));
        assert!(!Damaged.can_transition_to(Available));
        assert!(Damaged.can_transition_to(Damaged));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Sold".parse::<ProductStatus>().unwrap(), ProductStatus::Sold);
        assert_eq!(
            "inactive".parse::<ProductStatus>().unwrap(),
            ProductStatus::Damaged
        );
        assert!("lost".parse::<ProductStatus>().is_err());
    }

    #[test]
    fn low_stock_is_inclusive() {
        let mut p = sample();
        p.stock = 5;
        assert!(p.is_low_stock());
        p.stock = 6;
        assert!(!p.is_low_stock());
    }

    #[test]
    fn days_in_stock_prefers_arrival_date() {
        let p = sample();
        let today = NaiveDate::from_ymd_opt(2024, 6, 19).unwrap();
        assert_eq!(p.days_in_stock(today), 30);

        let mut no_arrival = p.clone();
        no_arrival.arrival_date = None;
        let created = no_arrival.audit.created_at.date_naive();
        assert_eq!(no_arrival.days_in_stock(created), 0);
    }

    #[test]
    fn view_exposes_derived_fields() {
        let view = sample().view(NaiveDate::from_ymd_opt(2024, 5, 21).unwrap());
        assert_eq!(view.total_value_cents, 180_000);
        assert!(!view.is_low_stock);
        assert_eq!(view.days_in_stock, 1);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["margin_percentage"], 50.0);
        assert_eq!(json["status"], "available");
        assert_eq!(json["lifecycle"]["state"], "active");
    }

    #[test]
    fn create_rejects_blank_name_and_negative_stock() {
        let mut input = sample_create();
        input.name = "  ".to_string();
        assert!(input.into_product("tester", 5).is_err());

        let mut input = sample_create();
        input.stock = -1;
        assert!(input.into_product("tester", 5).is_err());
    }

    #[test]
    fn create_ignores_client_supplied_margin() {
        let json = serde_json::json!({
            "name": "Galaxy S24",
            "category": "Smartphone",
            "brand": "Samsung",
            "model": "SM-S921B",
            "purchase_price_cents": 50_000,
            "selling_price_cents": 70_000,
            "margin_cents": 999_999,
            "total_cost_cents": 1,
            "supplier_name": "Napoli Import",
            "supplier_city": "Napoli",
            "import_batch": "B-7",
            "invoice_number": "F-1"
        });
        let input: CreateProduct = serde_json::from_value(json).unwrap();
        let p = input.into_product("tester", 5).unwrap();
        assert_eq!(p.pricing.total_cost_cents(), 50_000);
        assert_eq!(p.pricing.margin_cents(), 20_000);
        assert_eq!(p.condition, "New");
        assert_eq!(p.min_stock_level, 5);
    }

    #[test]
    fn update_recomputes_pricing() {
        let mut p = sample();
        UpdateProduct {
            transport_cost_cents: Some(4_000),
            ..Default::default()
        }
        .apply(&mut p)
        .unwrap();
        assert_eq!(p.pricing.total_cost_cents(), 14_000);
        assert_eq!(p.pricing.margin_cents(), 4_000);
        assert_eq!(p.name, "iPhone 15 Pro");
    }

    #[test]
    fn derived_columns_cannot_be_forced() {
        let mut p = sample();
        assert!(p.assign("margin_cents", Value::from(1_i64)).is_err());
        assert!(p.assign("margin_cents", Value::from(6_000_i64)).is_ok());

        p.assign("selling_price_cents", Value::from(24_000_i64)).unwrap();
        assert_eq!(p.pricing.margin_cents(), 12_000);
        assert!((p.pricing.margin_percentage() - 100.0).abs() < 1e-9);
    }
}
