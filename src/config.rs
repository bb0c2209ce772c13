//! Configuration management for the fraud graph pipeline

use crate::graph::SplitConfig;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub data: DataConfig,
    pub graph: SplitConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub detection: DetectionConfig,
    pub nats: NatsConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// Location of the users/orders/payments CSV files
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    /// Write synthetic tables when the directory holds none
    #[serde(default = "default_true")]
    pub generate_if_missing: bool,
}

/// Encoder hyper-parameters
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Shared hidden width of every node type
    pub hidden: usize,
    pub num_heads: usize,
    /// Rounds of message passing
    pub num_layers: usize,
    #[serde(default = "default_negative_slope")]
    pub negative_slope: f64,
    /// Allow the attention-relational variant; false forces per-type dense
    #[serde(default = "default_true")]
    pub relational_attention: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub epochs: usize,
    pub patience: usize,
    pub checkpoint_path: PathBuf,
    /// Put the run id in the checkpoint file name
    #[serde(default)]
    pub run_scoped_checkpoints: bool,
}

/// Detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Probability at or above which an order is flagged
    pub threshold: f64,
    /// Prefer the threshold picked on the test partition after training
    #[serde(default)]
    pub use_learned_threshold: bool,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming orders
    pub order_subject: String,
    /// Subject for outgoing scores
    pub score_subject: String,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent scoring tasks
    pub workers: usize,
    /// Seconds between metrics summaries
    pub report_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

fn default_true() -> bool {
    true
}

fn default_negative_slope() -> f64 {
    0.01
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden: 64,
            num_heads: 4,
            num_layers: 2,
            negative_slope: default_negative_slope(),
            relational_attention: true,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            weight_decay: 5e-4,
            epochs: 20,
            patience: 5,
            checkpoint_path: PathBuf::from("models/best_fraud_model.safetensors"),
            run_scoped_checkpoints: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig {
                data_dir: PathBuf::from("data"),
                generate_if_missing: true,
            },
            graph: SplitConfig::default(),
            model: ModelConfig::default(),
            training: TrainingConfig::default(),
            detection: DetectionConfig {
                threshold: 0.5,
                use_learned_threshold: false,
            },
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                order_subject: "orders".to_string(),
                score_subject: "fraud.scores".to_string(),
            },
            pipeline: PipelineConfig {
                workers: 4,
                report_interval_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.detection.threshold, 0.5);
        assert_eq!(config.model.hidden % config.model.num_heads, 0);
        assert_eq!(config.training.patience, 5);
        assert_eq!(config.graph.seed, 42);
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[data]
data_dir = "d"

[graph]
test_fraction = 0.3
val_fraction = 0.1
seed = 1
require_positives = true

[model]
hidden = 16
num_heads = 2
num_layers = 1

[training]
learning_rate = 0.01
weight_decay = 0.0
epochs = 3
patience = 1
checkpoint_path = "m.safetensors"

[detection]
threshold = 0.4

[nats]
url = "nats://example:4222"
order_subject = "o"
score_subject = "s"

[pipeline]
workers = 2
report_interval_secs = 5

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.model.hidden, 16);
        assert!(config.model.relational_attention);
        assert_eq!(config.model.negative_slope, 0.01);
        assert!(config.data.generate_if_missing);
        assert!(config.graph.require_positives);
        assert!(!config.training.run_scoped_checkpoints);
        assert!(!config.detection.use_learned_threshold);
    }
}
