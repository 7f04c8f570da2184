use super::{FeedForward, LayerNorm, MultiHeadAttention, PreNormResidual};
use crate::config::EncoderConfig;
use crate::cpu_utils::join_name;
use crate::dropout::ForwardMode;
use crate::error::Result;
use crate::layer::{Layer, Parameters};
use crate::tensor::Tensor3;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Pre-norm encoder layer:
/// `x = x + attn(norm1(x)); x = x + ff(norm2(x))`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncoderLayer {
    attention: PreNormResidual<MultiHeadAttention>,
    feed_forward: PreNormResidual<FeedForward>,
}

impl EncoderLayer {
    pub fn new<R: Rng + ?Sized>(config: &EncoderConfig, rng: &mut R) -> Result<Self> {
        Ok(EncoderLayer {
            attention: PreNormResidual::new(
                LayerNorm::new(config.hidden_size, config.layer_norm_eps),
                MultiHeadAttention::new(config, rng)?,
            ),
            feed_forward: PreNormResidual::new(
                LayerNorm::new(config.hidden_size, config.layer_norm_eps),
                FeedForward::new(config, rng),
            ),
        })
    }

    pub fn attention(&self) -> &MultiHeadAttention {
        self.attention.inner()
    }

    pub fn feed_forward(&self) -> &FeedForward {
        self.feed_forward.inner()
    }

    pub(crate) fn check_consistency(&self, config: &EncoderConfig) -> Result<()> {
        self.attention
            .norm()
            .check_consistency("attention layer norm", config.hidden_size)?;
        self.feed_forward
            .norm()
            .check_consistency("feed-forward layer norm", config.hidden_size)?;
        self.attention.inner().check_consistency(config)?;
        self.feed_forward.inner().check_consistency(config)
    }
}

impl Layer for EncoderLayer {
    fn forward(&self, x: &Tensor3, mode: &mut ForwardMode) -> Result<Tensor3> {
        let x = self.attention.forward(x, mode)?;
        self.feed_forward.forward(&x, mode)
    }
}

impl Parameters for EncoderLayer {
    fn visit_parameters(&self, prefix: &str, f: &mut dyn FnMut(&str, &[f32])) {
        self.attention.visit_parameters(&join_name(prefix, "attention"), f);
        self.feed_forward.visit_parameters(&join_name(prefix, "feed_forward"), f);
    }

    fn visit_parameters_mut(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut [f32])) {
        self.attention.visit_parameters_mut(&join_name(prefix, "attention"), f);
        self.feed_forward.visit_parameters_mut(&join_name(prefix, "feed_forward"), f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn setup() -> Result<(EncoderLayer, Tensor3)> {
        let mut rng = StdRng::seed_from_u64(51);
        let config = EncoderConfig::new(100, 16, 8, 2);
        let layer = EncoderLayer::new(&config, &mut rng)?;
        let data = (0..2 * 5 * 8).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Ok((layer, Tensor3::new(2, 5, 8, data)?))
    }

    #[test]
    fn shape_is_preserved() -> Result<()> {
        let (layer, x) = setup()?;
        let y = layer.forward(&x, &mut ForwardMode::inference())?;
        assert_eq!(y.shape(), x.shape());
        assert!(y.is_finite());
        Ok(())
    }

    #[test]
    fn zeroed_sub_blocks_reduce_to_identity() -> Result<()> {
        let (mut layer, x) = setup()?;
        layer.visit_parameters_mut("", &mut |name, values| {
            if name.starts_with("attention.inner.w_o")
                || name.starts_with("feed_forward.inner.linear2")
            {
                values.iter_mut().for_each(|v| *v = 0.0);
            }
        });
        let y = layer.forward(&x, &mut ForwardMode::inference())?;
        assert_eq!(y, x);
        Ok(())
    }

    #[test]
    fn output_is_input_plus_two_residual_deltas() -> Result<()> {
        let (layer, x) = setup()?;
        let mut mode = ForwardMode::inference();
        let attn_delta = layer
            .attention()
            .forward(&layer.attention.norm().forward(&x, &mut mode)?, &mut mode)?;
        let mid = x.add(&attn_delta)?;
        let ff_delta = layer
            .feed_forward()
            .forward(&layer.feed_forward.norm().forward(&mid, &mut mode)?, &mut mode)?;
        let expected = mid.add(&ff_delta)?;
        assert_eq!(layer.forward(&x, &mut mode)?, expected);
        Ok(())
    }

    #[test]
    fn parameters_are_namespaced_by_sub_block() -> Result<()> {
        let (layer, _) = setup()?;
        let names = layer.parameter_names();
        assert_eq!(names[0], "attention.norm.gamma");
        assert!(names.contains(&"attention.inner.heads.0.query.weight".to_string()));
        assert!(names.contains(&"feed_forward.inner.linear1.bias".to_string()));
        Ok(())
    }
}
