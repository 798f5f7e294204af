pub mod broker;
pub mod config;
pub mod metrics;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use metrics::BrokerMetrics;
