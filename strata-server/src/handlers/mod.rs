pub mod health;
pub mod metrics;

pub use health::health_check;
pub use metrics::{list_strategies, metrics};
