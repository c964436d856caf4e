use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::ProductStatus;
use crate::repository::{Direction, Query, Value};

/// Every product filter, combinable. Used as the query string of
/// `GET /api/products` and built internally by the single-purpose lookups.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductSearch {
    /// Free text matched against name and description.
    pub query: Option<String>,
    pub category: Option<String>,
    pub supplier: Option<String>,
    pub brand: Option<String>,
    pub batch: Option<String>,
    pub condition: Option<String>,
    pub status: Option<String>,
    pub city: Option<String>,
    pub invoice: Option<String>,
    pub min_price_cents: Option<i64>,
    pub max_price_cents: Option<i64>,
    pub purchased_from: Option<NaiveDate>,
    pub purchased_to: Option<NaiveDate>,
    pub min_margin: Option<f64>,
    pub max_margin: Option<f64>,
    pub arrived_since: Option<NaiveDate>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn check_range<T: PartialOrd + std::fmt::Display>(
    name: &str,
    min: Option<T>,
    max: Option<T>,
) -> AppResult<()> {
    match (min, max) {
        (Some(lo), Some(hi)) if lo > hi => Err(AppError::validation(format!(
            "{} range is empty: {} > {}",
            name, lo, hi
        ))),
        _ => Ok(()),
    }
}

impl ProductSearch {
    pub fn to_query(&self) -> AppResult<Query> {
        check_range("price", self.min_price_cents, self.max_price_cents)?;
        check_range("purchase date", self.purchased_from, self.purchased_to)?;
        check_range("margin", self.min_margin, self.max_margin)?;

        let mut query = Query::new();

        if let Some(text) = present(&self.query) {
            query = query.contains(&["name", "description"], text);
        }
        for (column, value) in [
            ("category", &self.category),
            ("supplier_name", &self.supplier),
            ("brand", &self.brand),
            ("import_batch", &self.batch),
            ("condition", &self.condition),
            ("supplier_city", &self.city),
            ("invoice_number", &self.invoice),
        ] {
            if let Some(v) = present(value) {
                query = query.eq_ignore_case(column, v);
            }
        }
        if let Some(status) = present(&self.status) {
            let status: ProductStatus = status.parse()?;
            query = query.eq("status", status.as_str());
        }

        if let Some(min) = self.min_price_cents {
            query = query.gte("selling_price_cents", min);
        }
        if let Some(max) = self.max_price_cents {
            query = query.lte("selling_price_cents", max);
        }
        if let Some(from) = self.purchased_from {
            query = query.gte("purchase_date", from);
        }
        if let Some(to) = self.purchased_to {
            query = query.lte("purchase_date", to);
        }
        if let Some(min) = self.min_margin {
            query = query.gte("margin_percentage", min);
        }
        if let Some(max) = self.max_margin {
            query = query.lte("margin_percentage", max);
        }
        if let Some(since) = self.arrived_since {
            query = query.gte("arrival_date", Value::from(since));
        }

        Ok(query)
    }
}

/// Columns a client may sort the product listing by.
pub fn sort_column(name: &str) -> AppResult<&'static str> {
    let column = match name {
        "id" => "id",
        "name" => "name",
        "category" => "category",
        "brand" => "brand",
        "price" | "selling_price_cents" => "selling_price_cents",
        "margin" | "margin_percentage" => "margin_percentage",
        "stock" => "stock",
        "purchase_date" => "purchase_date",
        "arrival_date" => "arrival_date",
        "created_at" => "created_at",
        other => {
            return Err(AppError::validation(format!(
                "cannot sort products by '{}'",
                other
            )))
        }
    };
    Ok(column)
}

/// Listing controls shared by the product list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort: Option<String>,
    #[serde(default)]
    pub direction: Direction,
}
