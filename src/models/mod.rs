pub mod metrics;
pub mod query;

pub use metrics::*;
pub use query::*;
