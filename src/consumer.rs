//! NATS consumer for incoming orders

use crate::models::FraudScorer;
use crate::types::{OrderId, OrderRecord, ScoreResponse};
use anyhow::Result;
use async_nats::{Client, Subscriber};
use tracing::{debug, info};

/// Subscribes to the order subject
pub struct OrderConsumer {
    client: Client,
    subject: String,
}

impl OrderConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to order subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Decode a message payload into an order.
///
/// Malformed payloads and orders without an `order_id` come back as the
/// error response to publish instead.
pub fn decode_order(payload: &[u8]) -> std::result::Result<OrderRecord, ScoreResponse> {
    let record: OrderRecord = serde_json::from_slice(payload).map_err(|e| {
        debug!(error = %e, "Rejected malformed order payload");
        ScoreResponse::failed(OrderId::unknown(), format!("invalid order payload: {}", e))
    })?;
    if record.order_id.is_none() {
        debug!("Rejected order without order_id");
        return Err(ScoreResponse::failed(OrderId::unknown(), "missing order_id"));
    }
    Ok(record)
}

/// Decode and score one message payload.
pub fn handle_payload(scorer: &FraudScorer, payload: &[u8]) -> ScoreResponse {
    match decode_order(payload) {
        Ok(record) => scorer.score(&record),
        Err(response) => response,
    }
}
