//! Hyperparameters for the encoder and its classification head.
use crate::error::{EncoderError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Epsilon of the embedding layer norm.
pub const EMBEDDING_LAYER_NORM_EPS: f32 = 1e-12;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    #[serde(alias = "num_tokens")]
    pub vocab_size: usize,
    #[serde(alias = "max_len")]
    pub max_position_embeddings: usize,
    #[serde(alias = "embedding_dim")]
    pub hidden_size: usize,
    pub num_heads: usize,
    pub head_dim: usize,
    #[serde(alias = "inter_dim")]
    pub intermediate_size: usize,
    pub dropout_prob: f32,
    #[serde(alias = "n_hidden_layers")]
    pub num_layers: usize,
    pub num_labels: usize,
    pub layer_norm_eps: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            vocab_size: 75_000,
            max_position_embeddings: 512,
            hidden_size: 768,
            num_heads: 12,
            head_dim: 64,
            intermediate_size: 768 * 4,
            dropout_prob: 0.2,
            num_layers: 12,
            num_labels: 2,
            layer_norm_eps: 1e-5,
        }
    }
}

impl EncoderConfig {
    /// Config with derived `head_dim` and a 4x feed-forward expansion.
    /// Other fields take their defaults; call [`validate`](Self::validate) before use.
    pub fn new(
        vocab_size: usize,
        max_position_embeddings: usize,
        hidden_size: usize,
        num_heads: usize,
    ) -> Self {
        EncoderConfig {
            vocab_size,
            max_position_embeddings,
            hidden_size,
            num_heads,
            head_dim: if num_heads == 0 {
                0
            } else {
                hidden_size / num_heads
            },
            intermediate_size: hidden_size * 4,
            ..EncoderConfig::default()
        }
    }

    pub fn with_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    pub fn with_labels(mut self, num_labels: usize) -> Self {
        self.num_labels = num_labels;
        self
    }

    pub fn with_dropout(mut self, dropout_prob: f32) -> Self {
        self.dropout_prob = dropout_prob;
        self
    }

    pub fn with_intermediate_size(mut self, intermediate_size: usize) -> Self {
        self.intermediate_size = intermediate_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("vocab_size", self.vocab_size),
            ("max_position_embeddings", self.max_position_embeddings),
            ("hidden_size", self.hidden_size),
            ("num_heads", self.num_heads),
            ("intermediate_size", self.intermediate_size),
            ("num_labels", self.num_labels),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(EncoderError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.hidden_size % self.num_heads != 0 {
            return Err(EncoderError::InvalidConfig(format!(
                "hidden_size {} is not divisible by num_heads {}",
                self.hidden_size, self.num_heads
            )));
        }
        if self.head_dim * self.num_heads != self.hidden_size {
            return Err(EncoderError::InvalidConfig(format!(
                "head_dim {} x num_heads {} must equal hidden_size {}",
                self.head_dim, self.num_heads, self.hidden_size
            )));
        }
        if !(0.0..=1.0).contains(&self.dropout_prob) {
            return Err(EncoderError::InvalidConfig(format!(
                "dropout_prob {} must lie in [0, 1]",
                self.dropout_prob
            )));
        }
        if !(self.layer_norm_eps > 0.0 && self.layer_norm_eps.is_finite()) {
            return Err(EncoderError::InvalidConfig(format!(
                "layer_norm_eps {} must be a positive finite number",
                self.layer_norm_eps
            )));
        }
        if self.dropout_prob == 1.0 {
            log::warn!("dropout_prob is 1.0: every activation is zeroed in training mode");
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EncoderConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let config: EncoderConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}
