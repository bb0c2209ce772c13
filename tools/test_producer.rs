//! Test Order Producer
//!
//! Publishes random orders to NATS for exercising the scoring loop.

use fraud_graph_pipeline::synthetic::PAYMENT_TYPES;
use fraud_graph_pipeline::types::{OrderId, OrderRecord};
use rand::rngs::ThreadRng;
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

struct OrderGenerator {
    rng: ThreadRng,
    counter: i64,
}

impl OrderGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            counter: 0,
        }
    }

    fn next_id(&mut self) -> OrderId {
        self.counter += 1;
        OrderId::Number(self.counter)
    }

    fn payment_type(&mut self) -> String {
        PAYMENT_TYPES[self.rng.gen_range(0..PAYMENT_TYPES.len())].to_string()
    }

    fn generate_legitimate(&mut self) -> OrderRecord {
        OrderRecord {
            order_id: Some(self.next_id()),
            user_age: Some(self.rng.gen_range(18..70) as f64),
            account_age_days: Some(self.rng.gen_range(30..2000) as f64),
            user_total_orders: Some(self.rng.gen_range(1..50) as f64),
            order_amount: Some(self.rng.gen_range(10.0..500.0)),
            num_items: Some(self.rng.gen_range(1..10) as f64),
            payment_type: Some(self.payment_type()),
            ..OrderRecord::default()
        }
    }

    /// Large basket on a young account
    fn generate_suspicious(&mut self) -> OrderRecord {
        OrderRecord {
            order_id: Some(self.next_id()),
            user_age: Some(self.rng.gen_range(18..70) as f64),
            account_age_days: Some(self.rng.gen_range(1..30) as f64),
            user_total_orders: Some(self.rng.gen_range(0..3) as f64),
            order_amount: Some(self.rng.gen_range(400.0..2000.0)),
            num_items: Some(self.rng.gen_range(5..15) as f64),
            payment_type: Some(self.payment_type()),
            ..OrderRecord::default()
        }
    }

    fn generate(&mut self, fraud_rate: f64) -> (OrderRecord, bool) {
        if self.rng.gen_bool(fraud_rate) {
            (self.generate_suspicious(), true)
        } else {
            (self.generate_legitimate(), false)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(String::as_str).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(String::as_str).unwrap_or("orders");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args
        .get(4)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.05_f64)
        .clamp(0.0, 1.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        "Starting test order producer"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS, running in dry-run mode");
            return run_dry_mode(count, fraud_rate, delay_ms).await;
        }
    };

    let mut generator = OrderGenerator::new();
    let mut suspicious = 0u64;
    for i in 0..count {
        let (order, is_suspicious) = generator.generate(fraud_rate);
        suspicious += u64::from(is_suspicious);

        let payload = serde_json::to_vec(&order)?;
        client.publish(subject.to_string(), payload.into()).await?;

        if (i + 1) % 10 == 0 {
            info!(
                "Published {}/{} orders ({} suspicious)",
                i + 1,
                count,
                suspicious
            );
        }
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    client.flush().await?;

    info!(published = count, suspicious = suspicious, "Done");
    Ok(())
}

async fn run_dry_mode(count: u64, fraud_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    let mut generator = OrderGenerator::new();
    for i in 0..count {
        let (order, _) = generator.generate(fraud_rate);
        if i == 0 || (i + 1) % 10 == 0 {
            info!("Sample order {}:\n{}", i + 1, serde_json::to_string_pretty(&order)?);
        }
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    Ok(())
}
