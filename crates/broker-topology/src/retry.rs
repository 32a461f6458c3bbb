//! Retry-count header plumbing and the retry/DLQ decision for one delivery.

use lapin::options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions};
use lapin::types::AMQPValue;
use lapin::{BasicProperties, Channel};
use tracing::{error, warn};

pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

pub fn retry_count_from_properties(properties: &BasicProperties) -> u32 {
    properties
        .headers()
        .as_ref()
        .and_then(|h| h.inner().get(RETRY_COUNT_HEADER))
        .and_then(|v| match v {
            AMQPValue::LongLongInt(n) => Some(*n as u32),
            AMQPValue::LongInt(n) => Some(*n as u32),
            AMQPValue::ShortInt(n) => Some(*n as u32),
            _ => None,
        })
        .unwrap_or(0)
}

pub fn properties_with_retry_count(base: BasicProperties, retry_count: u32) -> BasicProperties {
    let mut headers = base.headers().clone().unwrap_or_default();
    headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongLongInt(retry_count as i64));
    base.with_headers(headers)
}

/// Outcome of handling one delivery that failed to process.
pub enum RetryOutcome {
    /// Republished to the retry exchange, original delivery acked.
    Retried { new_retry_count: u32 },
    /// `retry_count` exhausted (or republish itself failed): nacked to DLQ.
    DeadLettered,
}

/// Republishes `body` to `retry_exchange` with an incremented retry-count
/// header, preserving `routing_key`, then acks the original delivery tag.
/// Falls back to `nack(requeue=false)` (DLQ) if the republish itself fails.
pub async fn retry_or_dead_letter(
    channel: &Channel,
    retry_exchange: &str,
    routing_key: &str,
    delivery_tag: u64,
    body: &[u8],
    current_retry_count: u32,
    max_retries: u32,
) -> RetryOutcome {
    if current_retry_count >= max_retries {
        if let Err(e) = channel
            .basic_nack(delivery_tag, BasicNackOptions { requeue: false, ..Default::default() })
            .await
        {
            error!(error = %e, "failed to nack exhausted delivery to DLQ");
        }
        return RetryOutcome::DeadLettered;
    }

    let new_retry_count = current_retry_count + 1;
    let props = properties_with_retry_count(BasicProperties::default(), new_retry_count);

    let publish_result = channel
        .basic_publish(
            retry_exchange,
            routing_key,
            BasicPublishOptions::default(),
            body,
            props,
        )
        .await;

    match publish_result {
        Ok(_) => {
            if let Err(e) = channel.basic_ack(delivery_tag, BasicAckOptions::default()).await {
                error!(error = %e, "failed to ack original delivery after retry republish");
            }
            RetryOutcome::Retried { new_retry_count }
        }
        Err(e) => {
            warn!(error = %e, "retry republish failed, dead-lettering");
            if let Err(e) = channel
                .basic_nack(delivery_tag, BasicNackOptions { requeue: false, ..Default::default() })
                .await
            {
                error!(error = %e, "failed to nack after failed retry republish");
            }
            RetryOutcome::DeadLettered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::FieldTable;

    #[test]
    fn missing_header_defaults_to_zero() {
        let props = BasicProperties::default();
        assert_eq!(retry_count_from_properties(&props), 0);
    }

    #[test]
    fn properties_with_retry_count_round_trips_through_from_properties() {
        let props = properties_with_retry_count(BasicProperties::default(), 3);
        assert_eq!(retry_count_from_properties(&props), 3);
    }

    #[test]
    fn non_integer_header_value_is_ignored() {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), AMQPValue::LongString("not-a-number".into()));
        let props = BasicProperties::default().with_headers(headers);
        assert_eq!(retry_count_from_properties(&props), 0);
    }
}
