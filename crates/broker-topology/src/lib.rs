//! Shared broker (RabbitMQ) retry/DLQ topology used symmetrically by both
//! services: `disaster.topic` on the external service, `report.direct` on
//! the central service.

pub mod connection;
pub mod retry;
pub mod topology;

pub use connection::{connect_with_backoff, supervise};
pub use retry::{
    properties_with_retry_count, retry_count_from_properties, retry_or_dead_letter, RetryOutcome,
    RETRY_COUNT_HEADER,
};
pub use topology::{declare_topology, TopologyConfig, RETRY_DELAY_MS};
