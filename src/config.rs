//! Run configuration, loadable from JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layers::recurrent::CellKind;

/// Architecture of the recurrent language model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Word embedding dimension
    pub emb_dim: usize,
    /// Hidden state dimension
    pub hid_dim: usize,
    pub cell: CellKind,
    /// Number of stacked recurrent layers
    pub n_layers: usize,
    /// Dropout probability on embeddings and on the top recurrent outputs
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            emb_dim: 128,
            hid_dim: 128,
            cell: CellKind::Gru,
            n_layers: 1,
            dropout: 0.4,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.emb_dim == 0 || self.hid_dim == 0 {
            return Err(Error::Config("embedding and hidden dimensions must be positive".into()));
        }
        if self.n_layers == 0 {
            return Err(Error::Config("at least one recurrent layer is required".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config(format!("dropout must be in [0, 1), got {}", self.dropout)));
        }
        Ok(())
    }
}

/// Configuration for training hyperparameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    /// Number of parallel streams per window
    pub batch_size: usize,
    /// Truncated BPTT window length
    pub bptt_steps: usize,
    pub learning_rate: f64,
    /// Global gradient norm threshold; values <= 0 disable clipping
    pub clip_gradient_norm: f64,
    /// Progress is logged every this many training windows
    pub log_every: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 5,
            batch_size: 16,
            bptt_steps: 35,
            learning_rate: 0.002,
            clip_gradient_norm: 1.0,
            log_every: 500,
            seed: 0,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be positive".into()));
        }
        if self.bptt_steps == 0 {
            return Err(Error::Config("BPTT window must be positive".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Everything one training run needs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: ModelConfig,
    pub training: TrainingConfig,
}

impl RunConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.training.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.model.cell, CellKind::Gru);
        assert_eq!(config.model.emb_dim, 128);
        assert_eq!(config.training.bptt_steps, 35);
        assert_eq!(config.training.batch_size, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{ "model": { "cell": "lstm", "n_layers": 2 }, "training": { "epochs": 1 } }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model.cell, CellKind::Lstm);
        assert_eq!(config.model.n_layers, 2);
        assert_eq!(config.model.hid_dim, 128);
        assert_eq!(config.training.epochs, 1);
        assert_eq!(config.training.learning_rate, 0.002);
    }

    #[test]
    fn test_unknown_cell_is_rejected() {
        let json = r#"{ "model": { "cell": "transformer" } }"#;
        assert!(serde_json::from_str::<RunConfig>(json).is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = RunConfig::default();
        config.training.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = RunConfig::default();
        config.model.dropout = 1.0;
        assert!(config.validate().is_err());
    }
}
