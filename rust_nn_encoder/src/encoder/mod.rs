pub mod blocks;
pub mod classifier;

use crate::config::EncoderConfig;
use crate::cpu_utils::join_name;
use crate::dropout::ForwardMode;
use crate::error::{EncoderError, Result};
use crate::layer::{Layer, Parameters};
use crate::tensor::Tensor3;
use blocks::{Embeddings, EncoderLayer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Embeddings followed by a stack of pre-norm encoder layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Encoder {
    config: EncoderConfig,
    embeddings: Embeddings,
    layers: Vec<EncoderLayer>,
}

impl Encoder {
    /// Randomly initialized encoder; entropy-seeded.
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        Self::with_rng(config, &mut StdRng::from_entropy())
    }

    /// Reproducible initialization from `seed`.
    pub fn with_seed(config: &EncoderConfig, seed: u64) -> Result<Self> {
        Self::with_rng(config, &mut StdRng::seed_from_u64(seed))
    }

    pub fn with_rng<R: Rng + ?Sized>(config: &EncoderConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let embeddings = Embeddings::new(config, rng);
        let layers = (0..config.num_layers)
            .map(|_| EncoderLayer::new(config, rng))
            .collect::<Result<Vec<_>>>()?;
        let encoder = Encoder {
            config: config.clone(),
            embeddings,
            layers,
        };
        log::info!(
            "built encoder: layers={} heads={} hidden={} head_dim={} vocab={} params={}",
            config.num_layers,
            config.num_heads,
            config.hidden_size,
            config.head_dim,
            config.vocab_size,
            encoder.num_parameters()
        );
        Ok(encoder)
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn embeddings(&self) -> &Embeddings {
        &self.embeddings
    }

    pub fn layers(&self) -> &[EncoderLayer] {
        &self.layers
    }

    /// `(B, L)` token ids to `(B, L, hidden_size)`.
    pub fn forward(&self, ids: &[Vec<usize>], mode: &mut ForwardMode) -> Result<Tensor3> {
        let mut x = self.embeddings.forward(ids, mode)?;
        log::debug!(
            "encoder forward: shape={:?} training={}",
            x.shape(),
            mode.is_training()
        );
        for layer in &self.layers {
            x = layer.forward(&x, mode)?;
        }
        Ok(x)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let encoder: Encoder = serde_json::from_reader(reader)?;
        encoder.check_consistency()?;
        Ok(encoder)
    }

    /// Re-validate config and parameter shapes, e.g. after deserialization.
    pub fn check_consistency(&self) -> Result<()> {
        self.config.validate()?;
        if self.layers.len() != self.config.num_layers {
            return Err(EncoderError::InvalidConfig(format!(
                "config declares {} layers but {} are present",
                self.config.num_layers,
                self.layers.len()
            )));
        }
        self.embeddings.check_consistency(&self.config)?;
        for layer in &self.layers {
            layer.check_consistency(&self.config)?;
        }
        Ok(())
    }
}

impl Parameters for Encoder {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32])) {
        self.embeddings.visit_parameters(&join_name(prefix, "embeddings"), f);
        for (i, layer) in self.layers.iter().enumerate() {
            layer.visit_parameters(&join_name(prefix, &format!("layers.{i}")), f);
        }
    }

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32])) {
        self.embeddings.visit_parameters_mut(&join_name(prefix, "embeddings"), f);
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.visit_parameters_mut(&join_name(prefix, &format!("layers.{i}")), f);
        }
    }
}
