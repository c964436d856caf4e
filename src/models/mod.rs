pub mod audit;
pub mod product;
pub mod reference;

pub use audit::Audit;
pub use product::{CreateProduct, Pricing, Product, ProductStatus, ProductView, UpdateProduct};
pub use reference::{Brand, Color, Condition, Model, ProductType, ReferencePayload};
