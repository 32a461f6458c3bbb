//! Declares the symmetric main/retry/DLX topology used by both services.
//!
//! - Main exchange/queue, `x-dead-letter-exchange` pointing at the DLX so a
//!   terminal `nack` routes there.
//! - DLX + DLQ for terminal failures.
//! - Retry exchange + wait queue: the wait queue has `x-message-ttl` and a
//!   `x-dead-letter-exchange` pointing back at the main exchange, so TTL
//!   expiry re-enters the main flow. For direct exchanges the
//!   dead-letter-routing-key is set explicitly so the routing key survives
//!   the round trip.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};

pub const RETRY_DELAY_MS: i32 = 10_000;

#[derive(Debug, Clone)]
pub struct TopologyConfig {
    pub main_exchange: String,
    pub main_exchange_kind: ExchangeKind,
    pub main_queue: String,
    /// Routing keys the main queue binds to. For a topic exchange this may
    /// be a wildcard pattern; for a direct exchange, an exact key.
    pub routing_keys: Vec<String>,
    pub dlx_exchange: String,
    pub dlq_queue: String,
    pub retry_exchange: String,
    pub retry_queue: String,
}

impl TopologyConfig {
    /// `disaster.topic` / `disaster_retry` / `disaster_dlx` as consumed by ES.
    pub fn disaster_side() -> Self {
        TopologyConfig {
            main_exchange: "disaster.topic".to_owned(),
            main_exchange_kind: ExchangeKind::Topic,
            main_queue: "disaster.queue".to_owned(),
            routing_keys: vec!["disaster.#".to_owned()],
            dlx_exchange: "disaster_dlx".to_owned(),
            dlq_queue: "disaster.dlq".to_owned(),
            retry_exchange: "disaster_retry".to_owned(),
            retry_queue: "disaster.retry.wait".to_owned(),
        }
    }

    /// `report.direct` / `report_retry` / `report_dlx` as consumed by CS.
    pub fn report_side() -> Self {
        TopologyConfig {
            main_exchange: "report.direct".to_owned(),
            main_exchange_kind: ExchangeKind::Direct,
            main_queue: "report.queue".to_owned(),
            routing_keys: vec!["report.external".to_owned()],
            dlx_exchange: "report_dlx".to_owned(),
            dlq_queue: "report.dlq".to_owned(),
            retry_exchange: "report_retry".to_owned(),
            retry_queue: "report.retry.wait".to_owned(),
        }
    }

    fn is_direct(&self) -> bool {
        matches!(self.main_exchange_kind, ExchangeKind::Direct)
    }
}

pub async fn declare_topology(channel: &Channel, cfg: &TopologyConfig) -> Result<(), lapin::Error> {
    channel
        .exchange_declare(
            &cfg.main_exchange,
            cfg.main_exchange_kind.clone(),
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .exchange_declare(
            &cfg.dlx_exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .exchange_declare(
            &cfg.retry_exchange,
            cfg.main_exchange_kind.clone(),
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    let mut main_queue_args = FieldTable::default();
    main_queue_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(cfg.dlx_exchange.clone().into()),
    );
    channel
        .queue_declare(
            &cfg.main_queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            main_queue_args,
        )
        .await?;

    for key in &cfg.routing_keys {
        channel
            .queue_bind(
                &cfg.main_queue,
                &cfg.main_exchange,
                key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    channel
        .queue_declare(
            &cfg.dlq_queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    let dlq_routing_key = if cfg.is_direct() { &cfg.routing_keys[0] } else { "#" };
    channel
        .queue_bind(
            &cfg.dlq_queue,
            &cfg.dlx_exchange,
            dlq_routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let mut retry_queue_args = FieldTable::default();
    retry_queue_args.insert(
        "x-message-ttl".into(),
        AMQPValue::LongInt(RETRY_DELAY_MS),
    );
    retry_queue_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(cfg.main_exchange.clone().into()),
    );
    if cfg.is_direct() {
        retry_queue_args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(cfg.routing_keys[0].clone().into()),
        );
    }
    channel
        .queue_declare(
            &cfg.retry_queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            retry_queue_args,
        )
        .await?;

    for key in &cfg.routing_keys {
        channel
            .queue_bind(
                &cfg.retry_queue,
                &cfg.retry_exchange,
                key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    Ok(())
}
