mod metrics;
mod price_point;

pub use metrics::{Annualization, DerivedRow, MetricsRow, MetricsTable, RollingPoint};
pub use price_point::PricePoint;
