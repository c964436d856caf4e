use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::Product;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryStatistics {
    pub product_count: u64,
    pub total_units: i64,
    pub total_stock_value_cents: i64,
    pub total_cost_value_cents: i64,
    /// Per-unit margin summed over products.
    pub total_margin_cents: i64,
    pub potential_profit_cents: i64,
    /// Unweighted mean over products; 0 when there are none.
    pub average_margin_percentage: f64,
    pub low_stock_count: u64,
}

/// Totals the row-level products the store cannot aggregate in one column.
pub(crate) struct ValueTotals {
    pub stock_value_cents: i64,
    pub cost_value_cents: i64,
    pub potential_profit_cents: i64,
}

pub(crate) fn value_totals(products: &[Product]) -> ValueTotals {
    let mut totals = ValueTotals {
        stock_value_cents: 0,
        cost_value_cents: 0,
        potential_profit_cents: 0,
    };
    for p in products {
        totals.stock_value_cents = totals.stock_value_cents.saturating_add(p.total_value_cents());
        totals.cost_value_cents = totals
            .cost_value_cents
            .saturating_add(p.stock.saturating_mul(p.pricing.total_cost_cents()));
        totals.potential_profit_cents = totals
            .potential_profit_cents
            .saturating_add(p.stock.saturating_mul(p.pricing.margin_cents()));
    }
    totals
}

// ── Breakdowns ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub key: String,
    pub product_count: u64,
    pub total_units: i64,
    pub stock_value_cents: i64,
    pub total_margin_cents: i64,
    pub average_margin_percentage: f64,
}

#[derive(Default)]
struct GroupAcc {
    /// First spelling seen for the group.
    label: String,
    count: u64,
    units: i64,
    value: i64,
    margin: i64,
    pct_sum: f64,
}

/// Groups `products` by `key`, trimmed and case-insensitive like the lookups,
/// sorted by the normalized key.
pub fn breakdown<F>(products: &[Product], key: F) -> Vec<GroupSummary>
where
    F: Fn(&Product) -> &str,
{
    let mut groups: BTreeMap<String, GroupAcc> = BTreeMap::new();
    for p in products {
        let raw = key(p).trim();
        let acc = groups.entry(raw.to_lowercase()).or_default();
        if acc.count == 0 {
            acc.label = raw.to_string();
        }
        acc.count += 1;
        acc.units = acc.units.saturating_add(p.stock);
        acc.value = acc.value.saturating_add(p.total_value_cents());
        acc.margin = acc.margin.saturating_add(p.pricing.margin_cents());
        acc.pct_sum += p.pricing.margin_percentage();
    }

    groups
        .into_values()
        .map(|acc| GroupSummary {
            key: acc.label,
            product_count: acc.count,
            total_units: acc.units,
            stock_value_cents: acc.value,
            total_margin_cents: acc.margin,
            average_margin_percentage: acc.pct_sum / acc.count as f64,
        })
        .collect()
}

// ── CSV export ────────────────────────────────────────────────────────────────

/// `12345` -> `"123.45"`, `-50` -> `"-0.50"`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

pub fn to_csv(products: &[Product], today: NaiveDate) -> AppResult<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "id",
        "name",
        "category",
        "brand",
        "model",
        "condition",
        "status",
        "stock",
        "min_stock_level",
        "purchase_price",
        "transport_cost",
        "other_costs",
        "total_cost",
        "selling_price",
        "margin",
        "margin_percentage",
        "stock_value",
        "supplier_name",
        "supplier_city",
        "import_batch",
        "invoice_number",
        "purchase_date",
        "arrival_date",
        "days_in_stock",
    ])?;

    for p in products {
        let pricing = &p.pricing;
        wtr.write_record([
            p.id.to_string(),
            p.name.clone(),
            p.category.clone(),
            p.brand.clone(),
            p.model.clone(),
            p.condition.clone(),
            p.status.to_string(),
            p.stock.to_string(),
            p.min_stock_level.to_string(),
            format_cents(pricing.purchase_price_cents()),
            format_cents(pricing.transport_cost_cents()),
            format_cents(pricing.other_costs_cents()),
            format_cents(pricing.total_cost_cents()),
            format_cents(pricing.selling_price_cents()),
            format_cents(pricing.margin_cents()),
            format!("{:.2}", pricing.margin_percentage()),
            format_cents(p.total_value_cents()),
            p.supplier_name.clone(),
            p.supplier_city.clone(),
            p.import_batch.clone(),
            p.invoice_number.clone(),
            p.purchase_date.to_string(),
            p.arrival_date.map(|d| d.to_string()).unwrap_or_default(),
            p.days_in_stock(today).to_string(),
        ])?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    String::from_utf8(data).map_err(|e| AppError::Internal(e.to_string()))
}
