use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::Entity;
use crate::error::{AppError, AppResult};

// ── Column values ─────────────────────────────────────────────────────────────

/// A typed column value. Nullable columns carry `None`, so the Postgres
/// backend can always bind with the right type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(Option<i64>),
    Float(Option<f64>),
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Timestamp(Option<DateTime<Utc>>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        match self {
            Value::Int(v) => v.is_none(),
            Value::Float(v) => v.is_none(),
            Value::Text(v) => v.is_none(),
            Value::Date(v) => v.is_none(),
            Value::Timestamp(v) => v.is_none(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => v.map(|n| n as f64),
            Value::Float(v) => *v,
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => v.as_deref(),
            _ => None,
        }
    }

    fn mismatch(column: &str, expected: &str) -> AppError {
        AppError::validation(format!("field '{}' expects {}", column, expected))
    }

    pub fn into_int(self, column: &str) -> AppResult<i64> {
        match self {
            Value::Int(Some(v)) => Ok(v),
            _ => Err(Self::mismatch(column, "an integer")),
        }
    }

    pub fn into_text(self, column: &str) -> AppResult<String> {
        match self {
            Value::Text(Some(v)) => Ok(v),
            _ => Err(Self::mismatch(column, "text")),
        }
    }

    pub fn into_opt_text(self, column: &str) -> AppResult<Option<String>> {
        match self {
            Value::Text(v) => Ok(v),
            _ => Err(Self::mismatch(column, "text or null")),
        }
    }

    pub fn into_date(self, column: &str) -> AppResult<NaiveDate> {
        match self {
            Value::Date(Some(v)) => Ok(v),
            _ => Err(Self::mismatch(column, "a date")),
        }
    }

    pub fn into_opt_date(self, column: &str) -> AppResult<Option<NaiveDate>> {
        match self {
            Value::Date(v) => Ok(v),
            _ => Err(Self::mismatch(column, "a date or null")),
        }
    }

    pub fn into_timestamp(self, column: &str) -> AppResult<DateTime<Utc>> {
        match self {
            Value::Timestamp(Some(v)) => Ok(v),
            _ => Err(Self::mismatch(column, "a timestamp")),
        }
    }

    /// Ordering between two non-null values of compatible kinds.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Text(Some(a)), Value::Text(Some(b))) => Some(a.cmp(b)),
            (Value::Date(Some(a)), Value::Date(Some(b))) => Some(a.cmp(b)),
            (Value::Timestamp(Some(a)), Value::Timestamp(Some(b))) => Some(a.cmp(b)),
            (Value::Int(Some(a)), Value::Int(Some(b))) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(Some(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(Some(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(Some(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(Some(v.to_string()))
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(Some(v))
    }
}

impl From<Option<NaiveDate>> for Value {
    fn from(v: Option<NaiveDate>) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(Some(v))
    }
}

impl From<Option<DateTime<Utc>>> for Value {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        Value::Timestamp(v)
    }
}

// ── Filters ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`, or `column IS NULL` for a null value.
    Eq(&'static str, Value),
    /// Case-insensitive text equality.
    EqIgnoreCase(&'static str, String),
    /// Case-insensitive substring match on any of the columns.
    Contains(Vec<&'static str>, String),
    Gte(&'static str, Value),
    Lte(&'static str, Value),
    /// `left <= right`, both columns of the same row.
    LeColumn(&'static str, &'static str),
}

impl Filter {
    pub fn columns(&self) -> Vec<&'static str> {
        match self {
            Filter::Eq(c, _) | Filter::EqIgnoreCase(c, _) | Filter::Gte(c, _) | Filter::Lte(c, _) => {
                vec![*c]
            }
            Filter::Contains(cols, _) => cols.clone(),
            Filter::LeColumn(a, b) => vec![*a, *b],
        }
    }

    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        match self {
            Filter::Eq(column, expected) => match entity.field(column) {
                Some(actual) if expected.is_null() => actual.is_null(),
                Some(actual) => actual.compare(expected) == Some(Ordering::Equal),
                None => false,
            },
            Filter::EqIgnoreCase(column, expected) => entity
                .field(column)
                .and_then(|v| v.as_text().map(|s| s.to_lowercase() == expected.to_lowercase()))
                .unwrap_or(false),
            Filter::Contains(columns, needle) => {
                let needle = needle.to_lowercase();
                columns.iter().any(|column| {
                    entity
                        .field(column)
                        .and_then(|v| v.as_text().map(|s| s.to_lowercase().contains(&needle)))
                        .unwrap_or(false)
                })
            }
            Filter::Gte(column, bound) => entity
                .field(column)
                .and_then(|v| v.compare(bound))
                .map_or(false, |o| o != Ordering::Less),
            Filter::Lte(column, bound) => entity
                .field(column)
                .and_then(|v| v.compare(bound))
                .map_or(false, |o| o != Ordering::Greater),
            Filter::LeColumn(left, right) => match (entity.field(left), entity.field(right)) {
                (Some(l), Some(r)) => l.compare(&r).map_or(false, |o| o != Ordering::Greater),
                _ => false,
            },
        }
    }
}

// ── Query ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Filter + ordering over one entity. Filters are AND-ed; rows come back in
/// insertion order (`id ASC`) unless an order is set.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filters: Vec<Filter>,
    include_deleted: bool,
    order: Option<(&'static str, Direction)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(column, value.into()))
    }

    pub fn eq_ignore_case(self, column: &'static str, value: impl Into<String>) -> Self {
        self.filter(Filter::EqIgnoreCase(column, value.into()))
    }

    pub fn contains(self, columns: &[&'static str], needle: impl Into<String>) -> Self {
        self.filter(Filter::Contains(columns.to_vec(), needle.into()))
    }

    pub fn gte(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gte(column, value.into()))
    }

    pub fn lte(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lte(column, value.into()))
    }

    pub fn le_column(self, left: &'static str, right: &'static str) -> Self {
        self.filter(Filter::LeColumn(left, right))
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn order_by(mut self, column: &'static str, direction: Direction) -> Self {
        self.order = Some((column, direction));
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    pub fn order(&self) -> Option<(&'static str, Direction)> {
        self.order
    }

    /// Every column the query touches, for validation against the entity.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns: Vec<&'static str> = self.filters.iter().flat_map(Filter::columns).collect();
        if let Some((column, _)) = self.order {
            columns.push(column);
        }
        columns
    }

    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        (self.include_deleted || entity.audit().lifecycle.is_active())
            && self.filters.iter().all(|f| f.matches(entity))
    }
}

// ── Paging ────────────────────────────────────────────────────────────────────

pub const MAX_PAGE_SIZE: u32 = 500;

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn new(number: u32, size: u32) -> Self {
        Self {
            number: number.max(1),
            size: size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.number as u64 - 1) * self.size as u64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Paged<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}
