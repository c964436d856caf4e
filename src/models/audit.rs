use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::error::AppResult;
use crate::repository::Value;

/// Audit columns a caller may write directly.
pub const AUDIT_WRITABLE_COLUMNS: &[&str] = &["updated_at", "updated_by"];

const AUDIT_COLUMNS: &[&str] = &[
    "created_at",
    "created_by",
    "updated_at",
    "updated_by",
    "deleted_at",
    "deleted_by",
    "version",
];

/// Whether a row is live or soft-deleted. Stored as the nullable pair
/// `deleted_at`/`deleted_by`, which must be both null or both set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deleted { at: DateTime<Utc>, by: String },
}

impl Lifecycle {
    pub fn is_active(&self) -> bool {
        matches!(self, Lifecycle::Active)
    }

    pub fn from_columns(at: Option<DateTime<Utc>>, by: Option<String>) -> Result<Self, String> {
        match (at, by) {
            (None, None) => Ok(Lifecycle::Active),
            (Some(at), Some(by)) => Ok(Lifecycle::Deleted { at, by }),
            (at, by) => Err(format!(
                "inconsistent soft-delete columns (deleted_at set: {}, deleted_by set: {})",
                at.is_some(),
                by.is_some()
            )),
        }
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Lifecycle::Active => None,
            Lifecycle::Deleted { at, .. } => Some(*at),
        }
    }

    pub fn deleted_by(&self) -> Option<&str> {
        match self {
            Lifecycle::Active => None,
            Lifecycle::Deleted { by, .. } => Some(by),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Audit {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub lifecycle: Lifecycle,
    /// Optimistic-concurrency token, bumped by the store on every write.
    pub version: i64,
}

impl Audit {
    pub fn new(actor: &str) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            created_by: actor.to_string(),
            updated_at: now,
            updated_by: actor.to_string(),
            lifecycle: Lifecycle::Active,
            version: 0,
        }
    }

    pub fn touch(&mut self, actor: &str) {
        self.updated_at = Utc::now();
        self.updated_by = actor.to_string();
    }

    /// The `updated_*` column pair for a partial update.
    pub fn touched_fields(actor: &str) -> [(&'static str, Value); 2] {
        [
            ("updated_at", Value::from(Utc::now())),
            ("updated_by", Value::from(actor)),
        ]
    }

    pub fn is_column(column: &str) -> bool {
        AUDIT_COLUMNS.contains(&column)
    }

    pub fn field(&self, column: &str) -> Option<Value> {
        let value = match column {
            "created_at" => Value::from(self.created_at),
            "created_by" => Value::from(self.created_by.as_str()),
            "updated_at" => Value::from(self.updated_at),
            "updated_by" => Value::from(self.updated_by.as_str()),
            "deleted_at" => Value::from(self.lifecycle.deleted_at()),
            "deleted_by" => Value::Text(self.lifecycle.deleted_by().map(str::to_string)),
            "version" => Value::from(self.version),
            _ => return None,
        };
        Some(value)
    }

    /// Writes a caller-writable audit column. Returns `false` when `column` is
    /// not one, so the entity can handle it.
    pub fn assign(&mut self, column: &str, value: Value) -> AppResult<bool> {
        match column {
            "updated_at" => self.updated_at = value.into_timestamp(column)?,
            "updated_by" => self.updated_by = value.into_text(column)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub fn from_row(row: &PgRow) -> sqlx::Result<Self> {
        let lifecycle = Lifecycle::from_columns(row.try_get("deleted_at")?, row.try_get("deleted_by")?)
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "deleted_at".to_string(),
                source: e.into(),
            })?;

        Ok(Self {
            created_at: row.try_get("created_at")?,
            created_by: row.try_get("created_by")?,
            updated_at: row.try_get("updated_at")?,
            updated_by: row.try_get("updated_by")?,
            lifecycle,
            version: row.try_get("version")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_rejects_half_deleted_rows() {
        assert_eq!(Lifecycle::from_columns(None, None), Ok(Lifecycle::Active));
        assert!(Lifecycle::from_columns(Some(Utc::now()), None).is_err());
        assert!(Lifecycle::from_columns(None, Some("ops".into())).is_err());

        let deleted = Lifecycle::from_columns(Some(Utc::now()), Some("ops".into())).unwrap();
        assert!(!deleted.is_active());
        assert_eq!(deleted.deleted_by(), Some("ops"));
    }

    #[test]
    fn only_updated_columns_are_assignable() {
        let mut audit = Audit::new("alice");
        assert!(audit.assign("updated_by", Value::from("bob")).unwrap());
        assert_eq!(audit.updated_by, "bob");
        assert!(!audit.assign("created_by", Value::from("mallory")).unwrap());
        assert_eq!(audit.created_by, "alice");
    }

    #[test]
    fn exposes_deleted_columns_as_nullable() {
        let audit = Audit::new("alice");
        assert_eq!(audit.field("deleted_at"), Some(Value::Timestamp(None)));
        assert_eq!(audit.field("deleted_by"), Some(Value::Text(None)));
        assert_eq!(audit.field("name"), None);
    }
}
