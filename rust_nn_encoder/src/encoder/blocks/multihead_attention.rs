use super::attention::{AttentionHead, Masking};
use super::linear::Linear;
use crate::config::EncoderConfig;
use crate::cpu_utils::join_name;
use crate::dropout::ForwardMode;
use crate::error::{EncoderError, Result};
use crate::layer::{Layer, Parameters};
use crate::tensor::Tensor3;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiHeadAttention {
    hidden_size: usize,
    heads: Vec<AttentionHead>,
    w_o: Linear,
}

impl MultiHeadAttention {
    pub fn new<R: Rng + ?Sized>(config: &EncoderConfig, rng: &mut R) -> Result<Self> {
        if config.num_heads == 0 || config.hidden_size % config.num_heads != 0 {
            return Err(EncoderError::InvalidConfig(format!(
                "hidden_size {} is not divisible by num_heads {}",
                config.hidden_size, config.num_heads
            )));
        }
        if config.head_dim * config.num_heads != config.hidden_size {
            return Err(EncoderError::InvalidConfig(format!(
                "{} heads of width {} do not concatenate to hidden_size {}",
                config.num_heads, config.head_dim, config.hidden_size
            )));
        }
        let heads = (0..config.num_heads)
            .map(|_| AttentionHead::new(config.hidden_size, config.head_dim, rng))
            .collect();
        Ok(MultiHeadAttention {
            hidden_size: config.hidden_size,
            heads,
            w_o: Linear::new(config.hidden_size, config.hidden_size, rng),
        })
    }

    /// Apply the same masking to every head.
    pub fn with_masking(mut self, masking: Masking) -> Self {
        self.heads = self
            .heads
            .into_iter()
            .map(|head| head.with_masking(masking))
            .collect();
        self
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    /// Output plus each head's `(B, L, L)` attention weights, in head order.
    pub fn forward_with_weights(&self, x: &Tensor3) -> Result<(Tensor3, Vec<Tensor3>)> {
        x.expect_dim("multi-head attention input", self.hidden_size)?;
        // Parallelize over heads, each thread returns (head output, head weights)
        let head_results: Vec<(Tensor3, Tensor3)> = self
            .heads
            .par_iter()
            .map(|head| {
                head.forward_with_weights(x)
                    .map(|out| (out.output, out.weights))
            })
            .collect::<Result<_>>()?;
        let (outputs, weights): (Vec<Tensor3>, Vec<Tensor3>) = head_results.into_iter().unzip();
        let concat = Tensor3::concat_features(&outputs)?;
        concat.expect_dim("concatenated heads", self.hidden_size)?;
        Ok((self.w_o.forward(&concat)?, weights))
    }

    pub(crate) fn check_consistency(&self, config: &EncoderConfig) -> Result<()> {
        if self.hidden_size != config.hidden_size || self.heads.len() != config.num_heads {
            return Err(EncoderError::shape(
                "multi-head attention",
                format!("{} heads over hidden {}", config.num_heads, config.hidden_size),
                format!("{} heads over hidden {}", self.heads.len(), self.hidden_size),
            ));
        }
        for head in &self.heads {
            head.check_consistency(config.hidden_size, config.head_dim)?;
        }
        self.w_o.check_consistency(
            "attention output projection",
            config.hidden_size,
            config.hidden_size,
        )
    }
}

impl Layer for MultiHeadAttention {
    fn forward(&self, x: &Tensor3, _mode: &mut ForwardMode) -> Result<Tensor3> {
        Ok(self.forward_with_weights(x)?.0)
    }
}

impl Parameters for MultiHeadAttention {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32])) {
        for (i, head) in self.heads.iter().enumerate() {
            head.visit_parameters(&join_name(prefix, &format!("heads.{i}")), f);
        }
        self.w_o.visit_parameters(&join_name(prefix, "w_o"), f);
    }

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32])) {
        for (i, head) in self.heads.iter_mut().enumerate() {
            head.visit_parameters_mut(&join_name(prefix, &format!("heads.{i}")), f);
        }
        self.w_o.visit_parameters_mut(&join_name(prefix, "w_o"), f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn input(rng: &mut StdRng, batch: usize, len: usize, dim: usize) -> Result<Tensor3> {
        let data = (0..batch * len * dim)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        Tensor3::new(batch, len, dim, data)
    }

    #[test]
    fn output_shape_equals_input_shape() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(31);
        let config = EncoderConfig::new(100, 16, 8, 2);
        let mha = MultiHeadAttention::new(&config, &mut rng)?;
        let x = input(&mut rng, 2, 5, 8)?;
        let y = mha.forward(&x, &mut ForwardMode::inference())?;
        assert_eq!(y.shape(), x.shape());
        assert!(y.is_finite());
        Ok(())
    }

    #[test]
    fn indivisible_heads_fail_at_construction() {
        let mut rng = StdRng::seed_from_u64(32);
        let config = EncoderConfig::new(100, 16, 9, 2);
        assert!(matches!(
            MultiHeadAttention::new(&config, &mut rng),
            Err(EncoderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn heads_are_independent_and_returned_in_order() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(33);
        let config = EncoderConfig::new(100, 16, 12, 3);
        let mha = MultiHeadAttention::new(&config, &mut rng)?;
        let x = input(&mut rng, 1, 4, 12)?;
        let (_, weights) = mha.forward_with_weights(&x)?;
        assert_eq!(weights.len(), 3);
        assert_eq!(weights[0].shape(), (1, 4, 4));
        assert_ne!(weights[0], weights[1]);
        for (i, head) in mha.heads.iter().enumerate() {
            assert_eq!(head.forward_with_weights(&x)?.weights, weights[i]);
        }
        Ok(())
    }

    #[test]
    fn parameter_count_covers_every_head() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(34);
        let config = EncoderConfig::new(100, 16, 8, 2);
        let mha = MultiHeadAttention::new(&config, &mut rng)?;
        // per head: 3 x (8*4 + 4); output: 8*8 + 8
        assert_eq!(mha.num_parameters(), 2 * 3 * 36 + 72);
        let names = mha.parameter_names();
        assert!(names.contains(&"heads.1.value.bias".to_string()));
        assert_eq!(names.last().map(String::as_str), Some("w_o.bias"));
        Ok(())
    }

    #[test]
    fn causal_masking_reaches_every_head() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(35);
        let config = EncoderConfig::new(100, 16, 8, 2);
        let mha = MultiHeadAttention::new(&config, &mut rng)?.with_masking(Masking::Causal);
        let x = input(&mut rng, 1, 3, 8)?;
        let (_, weights) = mha.forward_with_weights(&x)?;
        for w in &weights {
            assert_eq!(w.row(0, 0)[1], 0.0);
            assert_eq!(w.row(0, 1)[2], 0.0);
        }
        Ok(())
    }

    #[test]
    fn wrong_hidden_width_is_rejected() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(36);
        let config = EncoderConfig::new(100, 16, 8, 2);
        let mha = MultiHeadAttention::new(&config, &mut rng)?;
        let x = input(&mut rng, 1, 3, 6)?;
        assert!(mha.forward(&x, &mut ForwardMode::inference()).is_err());
        Ok(())
    }
}
