pub mod products;
pub mod reports;
pub mod search;

pub use products::{ProductService, ServiceSettings};
pub use search::{sort_column, ListParams, ProductSearch};
