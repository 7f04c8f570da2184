use super::linear::Linear;
use crate::config::EncoderConfig;
use crate::cpu_utils::join_name;
use crate::dropout::{Dropout, ForwardMode};
use crate::error::Result;
use crate::gelu::gelu;
use crate::layer::{Layer, Parameters};
use crate::tensor::Tensor3;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Position-wise feed-forward: Linear -> GELU -> Linear -> Dropout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedForward {
    linear1: Linear,
    linear2: Linear,
    dropout: Dropout,
}

impl FeedForward {
    pub fn new<R: Rng + ?Sized>(config: &EncoderConfig, rng: &mut R) -> Self {
        FeedForward {
            linear1: Linear::new(config.hidden_size, config.intermediate_size, rng),
            linear2: Linear::new(config.intermediate_size, config.hidden_size, rng),
            dropout: Dropout::new(config.dropout_prob),
        }
    }

    pub fn forward_vec(&self, x: &[f32]) -> Result<Vec<f32>> {
        let h = self.linear1.forward_vec(x)?;
        let h_gelu: Vec<f32> = h.into_iter().map(gelu).collect();
        self.linear2.forward_vec(&h_gelu)
    }

    pub(crate) fn check_consistency(&self, config: &EncoderConfig) -> Result<()> {
        self.linear1.check_consistency(
            "feed-forward expansion",
            config.hidden_size,
            config.intermediate_size,
        )?;
        self.linear2.check_consistency(
            "feed-forward projection",
            config.intermediate_size,
            config.hidden_size,
        )?;
        self.dropout
            .check_consistency("feed-forward", config.dropout_prob)
    }
}

impl Layer for FeedForward {
    fn forward(&self, x: &Tensor3, mode: &mut ForwardMode) -> Result<Tensor3> {
        x.expect_dim("feed-forward input", self.linear1.in_dim())?;
        let projected = x.map_rows(self.linear2.out_dim(), |row| self.forward_vec(row))?;
        Ok(self.dropout.forward(projected, mode))
    }
}

impl Parameters for FeedForward {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32])) {
        self.linear1.visit_parameters(&join_name(prefix, "linear1"), f);
        self.linear2.visit_parameters(&join_name(prefix, "linear2"), f);
    }

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32])) {
        self.linear1.visit_parameters_mut(&join_name(prefix, "linear1"), f);
        self.linear2.visit_parameters_mut(&join_name(prefix, "linear2"), f);
    }
}
