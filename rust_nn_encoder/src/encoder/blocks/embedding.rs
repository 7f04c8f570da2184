//! Token plus learned positional embeddings, normalized and regularized.
//!
//! Ids and sequence length are validated before any table lookup.

use super::layernorm::LayerNorm;
use crate::config::{EMBEDDING_LAYER_NORM_EPS, EncoderConfig};
use crate::cpu_utils::{embedding_init, join_name};
use crate::dropout::{Dropout, ForwardMode};
use crate::error::{EncoderError, Result};
use crate::layer::{Layer, Parameters};
use crate::tensor::Tensor3;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Embeddings {
    vocab_size: usize,
    max_positions: usize,
    hidden_size: usize,
    token_table: Vec<f32>,    // [vocab_size][hidden_size]
    position_table: Vec<f32>, // [max_positions][hidden_size]
    norm: LayerNorm,
    dropout: Dropout,
}

impl Embeddings {
    pub fn new<R: Rng + ?Sized>(config: &EncoderConfig, rng: &mut R) -> Self {
        Embeddings {
            vocab_size: config.vocab_size,
            max_positions: config.max_position_embeddings,
            hidden_size: config.hidden_size,
            token_table: embedding_init(rng, config.vocab_size, config.hidden_size),
            position_table: embedding_init(rng, config.max_position_embeddings, config.hidden_size),
            norm: LayerNorm::new(config.hidden_size, EMBEDDING_LAYER_NORM_EPS),
            dropout: Dropout::new(config.dropout_prob),
        }
    }

    /// Check that `ids` is a rectangular `(B, L)` batch of in-vocabulary ids with
    /// `L <= max_positions`. Returns `(B, L)`.
    pub fn validate_ids(&self, ids: &[Vec<usize>]) -> Result<(usize, usize)> {
        let batch = ids.len();
        let seq_len = ids.first().map_or(0, |row| row.len());
        if seq_len > self.max_positions {
            return Err(EncoderError::SequenceTooLong {
                len: seq_len,
                max: self.max_positions,
            });
        }
        for (b, row) in ids.iter().enumerate() {
            if row.len() != seq_len {
                return Err(EncoderError::shape(
                    "token ids",
                    format!("{seq_len} ids in every sequence"),
                    format!("{} ids in sequence {b}", row.len()),
                ));
            }
            if let Some((position, &id)) = row
                .iter()
                .enumerate()
                .find(|(_, id)| **id >= self.vocab_size)
            {
                return Err(EncoderError::TokenOutOfRange {
                    id,
                    batch: b,
                    position,
                    vocab_size: self.vocab_size,
                });
            }
        }
        Ok((batch, seq_len))
    }

    fn token_row(&self, id: usize) -> &[f32] {
        &self.token_table[id * self.hidden_size..(id + 1) * self.hidden_size]
    }

    fn position_row(&self, position: usize) -> &[f32] {
        &self.position_table[position * self.hidden_size..(position + 1) * self.hidden_size]
    }

    /// `(B, L)` token ids to `(B, L, hidden_size)` vectors.
    pub fn forward(&self, ids: &[Vec<usize>], mode: &mut ForwardMode) -> Result<Tensor3> {
        let (batch, seq_len) = self.validate_ids(ids)?;
        let mut data = Vec::with_capacity(batch * seq_len * self.hidden_size);
        for row in ids {
            for (position, &id) in row.iter().enumerate() {
                data.extend(
                    self.token_row(id)
                        .iter()
                        .zip(self.position_row(position))
                        .map(|(t, p)| t + p),
                );
            }
        }
        let summed = Tensor3::new(batch, seq_len, self.hidden_size, data)?;
        let normed = self.norm.forward(&summed, mode)?;
        Ok(self.dropout.forward(normed, mode))
    }

    pub(crate) fn check_consistency(&self, config: &EncoderConfig) -> Result<()> {
        if self.vocab_size != config.vocab_size
            || self.max_positions != config.max_position_embeddings
            || self.hidden_size != config.hidden_size
        {
            return Err(EncoderError::shape(
                "embeddings",
                format!(
                    "vocab {}, {} positions, hidden {}",
                    config.vocab_size, config.max_position_embeddings, config.hidden_size
                ),
                format!(
                    "vocab {}, {} positions, hidden {}",
                    self.vocab_size, self.max_positions, self.hidden_size
                ),
            ));
        }
        if self.token_table.len() != self.vocab_size * self.hidden_size
            || self.position_table.len() != self.max_positions * self.hidden_size
        {
            return Err(EncoderError::shape(
                "embedding tables",
                format!(
                    "[{}][{h}] tokens and [{}][{h}] positions",
                    self.vocab_size,
                    self.max_positions,
                    h = self.hidden_size
                ),
                format!(
                    "{} token and {} position values",
                    self.token_table.len(),
                    self.position_table.len()
                ),
            ));
        }
        self.norm
            .check_consistency("embedding layer norm", self.hidden_size)?;
        self.dropout
            .check_consistency("embedding", config.dropout_prob)
    }
}

impl Parameters for Embeddings {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32])) {
        f(&join_name(prefix, "token_table"), &self.token_table);
        f(&join_name(prefix, "position_table"), &self.position_table);
        self.norm.visit_parameters(&join_name(prefix, "norm"), f);
    }

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32])) {
        f(&join_name(prefix, "token_table"), &mut self.token_table);
        f(&join_name(prefix, "position_table"), &mut self.position_table);
        self.norm.visit_parameters_mut(&join_name(prefix, "norm"), f);
    }
}
