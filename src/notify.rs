use crate::errors::{SettlementError, SettlementResult};
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outbound notification events.
///
/// Each event is self-contained, named in the past tense, and keyed by
/// user so delivery stays ordered per user. Events are published after
/// the financial mutation commits and are strictly best-effort: a
/// publish failure never unwinds a committed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum SettlementEvent {
    #[serde(rename = "TOPUP_COMPLETED")]
    TopupCompleted {
        user_id: String,
        amount: i64,
        new_balance: i64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "ORDER_CREATED")]
    OrderCreated {
        user_id: String,
        order_id: String,
        total: i64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "ORDER_ARRIVED")]
    OrderArrived {
        user_id: String,
        order_id: String,
        shipping_outstanding: i64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "ORDER_REFUNDED")]
    OrderRefunded {
        user_id: String,
        order_id: String,
        refund_total: i64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "TIER_UPGRADED")]
    TierUpgraded {
        user_id: String,
        tier: String,
        fee_debited: i64,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "LOGIN_DISABLED")]
    LoginDisabled {
        user_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl SettlementEvent {
    pub fn event_type(&self) -> &str {
        match self {
            SettlementEvent::TopupCompleted { .. } => "TOPUP_COMPLETED",
            SettlementEvent::OrderCreated { .. } => "ORDER_CREATED",
            SettlementEvent::OrderArrived { .. } => "ORDER_ARRIVED",
            SettlementEvent::OrderRefunded { .. } => "ORDER_REFUNDED",
            SettlementEvent::TierUpgraded { .. } => "TIER_UPGRADED",
            SettlementEvent::LoginDisabled { .. } => "LOGIN_DISABLED",
        }
    }

    /// Partition key: all events for one user stay ordered.
    pub fn user_id(&self) -> &str {
        match self {
            SettlementEvent::TopupCompleted { user_id, .. }
            | SettlementEvent::OrderCreated { user_id, .. }
            | SettlementEvent::OrderArrived { user_id, .. }
            | SettlementEvent::OrderRefunded { user_id, .. }
            | SettlementEvent::TierUpgraded { user_id, .. }
            | SettlementEvent::LoginDisabled { user_id, .. } => user_id,
        }
    }
}

/// Kafka producer wrapper for outbound notifications.
pub struct Notifier {
    producer: FutureProducer,
    topic: String,
}

impl Notifier {
    pub fn new(brokers: &str, topic: String) -> SettlementResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", "snappy")
            .set("batch.size", "16384")
            .set("linger.ms", "10")
            .create()
            .map_err(|e| SettlementError::Notify(format!("Failed to create producer: {}", e)))?;

        Ok(Self { producer, topic })
    }

    /// Publish after commit, best-effort. Failures are logged and
    /// swallowed; the caller's financial operation already committed and
    /// must still be reported as successful.
    pub async fn publish_best_effort(&self, event: SettlementEvent) {
        if let Err(e) = self.publish(event).await {
            tracing::error!(error = %e, "Notification publish failed (ignored)");
        }
    }

    async fn publish(&self, event: SettlementEvent) -> SettlementResult<()> {
        let key = event.user_id().to_string();
        let payload = serde_json::to_string(&event).map_err(|e| {
            SettlementError::Internal(format!("Failed to serialize event: {}", e))
        })?;

        tracing::debug!(
            event_type = event.event_type(),
            user_id = %key,
            "Publishing notification event"
        );

        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok(_) => Ok(()),
            Err((e, _)) => Err(SettlementError::Notify(format!(
                "Failed to publish event: {}",
                e
            ))),
        }
    }
}
