//! Lookup entities (brands, models, colors, conditions, product types).
//!
//! They all share one shape, so a single generic record covers them; the
//! marker type only picks the table and the display name.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use crate::error::{AppError, AppResult};
use crate::models::audit::Audit;
use crate::repository::{Entity, Value};

pub trait ReferenceKind: Clone + std::fmt::Debug + Send + Sync + Unpin + 'static {
    const TABLE: &'static str;
    const NAME: &'static str;
}

macro_rules! reference_kind {
    ($kind:ident, $alias:ident, $table:literal, $name:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $kind;

        impl ReferenceKind for $kind {
            const TABLE: &'static str = $table;
            const NAME: &'static str = $name;
        }

        pub type $alias = Reference<$kind>;
    };
}

reference_kind!(BrandKind, Brand, "brands", "Brand");
reference_kind!(ModelKind, Model, "models", "Model");
reference_kind!(ColorKind, Color, "colors", "Color");
reference_kind!(ConditionKind, Condition, "conditions", "Condition");
reference_kind!(ProductTypeKind, ProductType, "product_types", "Product type");

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference<K> {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    #[serde(flatten)]
    pub audit: Audit,
    #[serde(skip)]
    kind: PhantomData<K>,
}

impl<K: ReferenceKind> Reference<K> {
    pub fn draft(name: String, description: Option<String>, actor: &str) -> Self {
        Self {
            id: 0,
            name,
            description,
            audit: Audit::new(actor),
            kind: PhantomData,
        }
    }
}

impl<K: ReferenceKind> Entity for Reference<K> {
    const TABLE: &'static str = K::TABLE;
    const NAME: &'static str = K::NAME;
    const COLUMNS: &'static [&'static str] = &["name", "description"];

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
        vec![
            ("name", Value::from(self.name.as_str())),
            ("description", Value::from(self.description.clone())),
        ]
    }

    fn assign(&mut self, column: &str, value: Value) -> AppResult<()> {
        match column {
            "name" => self.name = value.into_text(column)?,
            "description" => self.description = value.into_opt_text(column)?,
            other => {
                return Err(AppError::validation(format!(
                    "{} has no writable field '{}'",
                    K::NAME,
                    other
                )))
            }
        }
        Ok(())
    }
}

impl<'r, K: ReferenceKind> FromRow<'r, PgRow> for Reference<K> {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            audit: Audit::from_row(row)?,
            kind: PhantomData,
        })
    }
}

/// Body of the reference create/update endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferencePayload {
    pub name: String,
    pub description: Option<String>,
    /// Expected row version on update.
    pub version: Option<i64>,
}

impl ReferencePayload {
    pub fn validated_name(&self) -> AppResult<String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }
        Ok(name.to_string())
    }
}
