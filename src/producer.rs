//! NATS producer for score responses

use crate::types::ScoreResponse;
use anyhow::Result;
use async_nats::{Client, Subject};
use tracing::{debug, error};

#[derive(Clone)]
pub struct ScoreProducer {
    client: Client,
    subject: String,
}

impl ScoreProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish a response on the score subject
    pub async fn publish(&self, response: &ScoreResponse) -> Result<()> {
        let payload = serde_json::to_vec(response)?;
        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            order_id = %response.order_id,
            fraud_probability = ?response.fraud_probability,
            is_fraud = ?response.is_fraud,
            "Published score"
        );
        Ok(())
    }

    /// Answer a request on its reply subject
    pub async fn reply(&self, reply: Subject, response: &ScoreResponse) -> Result<()> {
        let payload = serde_json::to_vec(response)?;
        self.client.publish(reply, payload.into()).await?;
        Ok(())
    }

    /// Publish to the score subject and, when given, the reply subject.
    /// Failures are logged.
    pub async fn deliver(&self, reply: Option<Subject>, response: &ScoreResponse) {
        if let Err(e) = self.publish(response).await {
            error!(order_id = %response.order_id, error = %e, "Failed to publish score");
        }
        if let Some(reply) = reply {
            if let Err(e) = self.reply(reply, response).await {
                error!(order_id = %response.order_id, error = %e, "Failed to send reply");
            }
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
